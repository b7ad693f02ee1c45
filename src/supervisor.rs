//! Top-level control loop.
//!
//! The supervisor owns the session state machine: `Bootstrapping` builds a
//! fresh session from configuration, `Listening` runs the intake→dispatch
//! cycle until something goes wrong or an interrupt arrives, and any
//! unhandled failure tears the session down and bootstraps a new one with
//! the same identity — crash-only recovery, no backoff, no retry ceiling.
//! Only an interrupt leads to `ShuttingDown` and process exit.
//!
//! The interrupt is caught by a process-lifetime watcher task that sets a
//! watch flag; the flag is observed everywhere the session sleeps or
//! iterates, so Ctrl-C lands no matter where the cycle currently is.

use anyhow::{bail, Result};
use chrono::Utc;
use nostr_sdk::prelude::*;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dedup::ProcessedIds;
use crate::dispatch::dispatch_event;
use crate::generate::GenerationClient;
use crate::intake::IntakeQueue;
use crate::relay::{EndpointState, RelayPool, Subscription};
use crate::reply::OutboundReply;

/// Supervisor states. `Terminated` is implicit in returning from [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Bootstrapping,
    Listening,
    ShuttingDown,
}

/// Process-wide shutdown flag. Set once, never cleared.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    rx: watch::Receiver<bool>,
}

impl ShutdownFlag {
    /// Flag plus the trigger that sets it.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// Register the SIGINT handler once for the whole process lifetime.
    /// A signal arriving at any point sets the flag.
    pub fn from_ctrl_c() -> Self {
        let (tx, flag) = Self::new();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    let _ = tx.send(true);
                }
                Err(e) => error!("Failed to listen for interrupt: {}", e),
            }
        });
        flag
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is set, immediately if it already is. If the
    /// watcher is gone without ever firing there is nothing to wait for.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run sessions until an interrupt. Returns `Ok(())` only on a graceful
/// shutdown; the caller decides the process exit code.
pub async fn run(config: &Config) -> Result<()> {
    let shutdown = ShutdownFlag::from_ctrl_c();

    loop {
        info!("Supervisor: {:?}", SupervisorState::Bootstrapping);
        let mut session = Session::bootstrap(config, shutdown.clone()).await;

        match session.listen().await {
            Ok(()) => {
                info!("Supervisor: {:?}", SupervisorState::ShuttingDown);
                session.teardown().await;
                return Ok(());
            }
            Err(e) => {
                error!("Session failed: {:#} — restarting", e);
                session.teardown().await;
                if shutdown.is_set() {
                    info!("Supervisor: {:?}", SupervisorState::ShuttingDown);
                    return Ok(());
                }
            }
        }
    }
}

/// One listening session: identity, relay connections, intake queue,
/// dedup store, generation client. Rebuilt from scratch on every restart;
/// only the identity and configuration survive across sessions.
pub struct Session {
    keys: Keys,
    config: Config,
    pool: RelayPool,
    intake: IntakeQueue,
    processed: ProcessedIds,
    generator: GenerationClient,
    shutdown: ShutdownFlag,
    /// Subscription lower bound: events older than session start are not requested.
    since: u64,
    connections_opened: bool,
}

impl Session {
    /// Build a session. Relay connection failures are tolerated per
    /// endpoint later; identity and configuration are already validated,
    /// so bootstrapping itself cannot fail.
    pub async fn bootstrap(config: &Config, shutdown: ShutdownFlag) -> Self {
        let keys = config.keys.clone();
        let npub = keys
            .public_key()
            .to_bech32()
            .unwrap_or_else(|_| keys.public_key().to_hex());
        info!("Pubkey: {}", npub);
        info!("Pubkey (hex): {}", keys.public_key().to_hex());

        let (intake, intake_tx) = IntakeQueue::new();
        let mut pool = RelayPool::new(intake_tx);
        for url in &config.relays {
            pool.add_endpoint(url);
        }

        let generator = GenerationClient::new(
            config.ollama_host.clone(),
            config.model.clone(),
            config.generation_timeout,
        );

        Self {
            keys,
            config: config.clone(),
            pool,
            intake,
            processed: ProcessedIds::new(),
            generator,
            shutdown,
            since: Utc::now().timestamp() as u64,
            connections_opened: false,
        }
    }

    /// The intake→dispatch cycle. Returns `Ok(())` on interrupt; any error
    /// bubbling out restarts the whole session.
    pub async fn listen(&mut self) -> Result<()> {
        info!("Supervisor: {:?}", SupervisorState::Listening);

        loop {
            if self.shutdown.is_set() {
                info!("Interrupt received");
                return Ok(());
            }

            // Persistent connections by default; reconnect-per-cycle is the
            // configurable alternative. Either way this is the only place
            // an endpoint leaves the Error state.
            if self.config.reconnect_each_cycle || !self.connections_opened {
                self.pool.close_all().await;
                self.pool.open_all().await;
                self.connections_opened = true;
                self.ensure_endpoints_usable()?;
            }

            // Fresh subscription every cycle, closed before the next one.
            let sub = Subscription::for_inbox(&self.keys.public_key(), self.since);
            self.pool.subscribe_all(&sub).await;

            tokio::select! {
                _ = self.shutdown.triggered() => {
                    info!("Interrupt received");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let drained = self.intake.drain();

            // Operational signals first, then events.
            for notice in &drained.notices {
                warn!("Notice from {}: {}", notice.relay_url, notice.message);
            }

            for received in &drained.events {
                if self.shutdown.is_set() {
                    info!("Interrupt received");
                    return Ok(());
                }

                debug!(
                    "Dispatching event {} from {}",
                    received.event.id.to_hex(),
                    received.relay_url
                );
                if let Some(reply) = dispatch_event(
                    &received.event,
                    &self.keys,
                    &mut self.processed,
                    &self.generator,
                    self.config.public_reply_cooldown,
                )
                .await
                {
                    self.publish_reply(reply).await;
                }
            }

            self.pool.unsubscribe_all(&sub).await;
        }
    }

    /// With every endpoint failed nothing can be received or published;
    /// restart the session rather than idle on it.
    fn ensure_endpoints_usable(&self) -> Result<()> {
        let states = self.pool.endpoint_states();
        if !states.is_empty() && states.iter().all(|(_, s)| *s == EndpointState::Error) {
            bail!("all {} relay endpoint(s) failed to connect", states.len());
        }
        Ok(())
    }

    async fn publish_reply(&mut self, reply: OutboundReply) {
        self.pool.publish(reply.event()).await;

        match reply {
            OutboundReply::Direct(_) => info!("Encrypted reply sent"),
            OutboundReply::Note { cooldown, .. } => {
                info!(
                    "Public reply sent, cooling down for {}s",
                    cooldown.as_secs()
                );
                tokio::select! {
                    _ = self.shutdown.triggered() => {
                        info!("Interrupt received, cutting cool-down short");
                    }
                    _ = tokio::time::sleep(cooldown) => {}
                }
            }
        }
    }

    /// Orderly connection teardown; run on both shutdown and crash-restart.
    pub async fn teardown(&mut self) {
        self.pool.close_all().await;
        info!(
            "Session closed ({} event(s) processed)",
            self.processed.len()
        );
    }
}
