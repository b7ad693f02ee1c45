//! Relay connection set.
//!
//! One websocket connection per relay endpoint. Each open connection gets
//! a reader task that parses relay frames and forwards events and notices
//! into the intake queue; writes (REQ, CLOSE, EVENT) go through a shared
//! sink. Endpoints fail independently: any I/O error moves that endpoint
//! to `Error` and it stays there until the supervisor drives the next
//! reconnect. Publishing is best-effort fan-out, never retried.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nostr_sdk::{Event, PublicKey};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::intake::IntakeMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type SharedSink = Arc<tokio::sync::Mutex<WsSink>>;

/// Connection state of a single relay endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Disconnected,
    Connecting,
    Subscribed,
    Error,
}

/// One subscription, applied identically to every endpoint for one cycle.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub filter: serde_json::Value,
}

impl Subscription {
    /// Filter for our inbox: encrypted DMs and public notes tagging us,
    /// from the session start onwards.
    pub fn for_inbox(pubkey: &PublicKey, since: u64) -> Self {
        let filter = json!({
            "kinds": [4, 1],
            "#p": [pubkey.to_hex()],
            "since": since,
        });
        Self {
            id: Uuid::new_v4().simple().to_string(),
            filter,
        }
    }

    pub fn req_frame(&self) -> String {
        json!(["REQ", self.id, self.filter]).to_string()
    }

    pub fn close_frame(&self) -> String {
        json!(["CLOSE", self.id]).to_string()
    }
}

/// A parsed relay-to-client frame.
#[derive(Debug)]
pub enum RelayFrame {
    Event(Event),
    Notice(String),
    EndOfStored(String),
    PublishAck {
        event_id: String,
        accepted: bool,
        message: String,
    },
}

/// Parse one relay frame. Unknown or malformed frames yield `None`.
pub fn parse_relay_frame(text: &str) -> Option<RelayFrame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let arr = value.as_array()?;

    match arr.first()?.as_str()? {
        "EVENT" => {
            let event: Event = match serde_json::from_value(arr.get(2)?.clone()) {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to parse event: {}", e);
                    return None;
                }
            };
            Some(RelayFrame::Event(event))
        }
        "NOTICE" => Some(RelayFrame::Notice(
            arr.get(1)?.as_str().unwrap_or("").to_string(),
        )),
        "EOSE" => Some(RelayFrame::EndOfStored(
            arr.get(1)?.as_str().unwrap_or("?").to_string(),
        )),
        "OK" => Some(RelayFrame::PublishAck {
            event_id: arr.get(1)?.as_str().unwrap_or("").to_string(),
            accepted: arr.get(2)?.as_bool().unwrap_or(false),
            message: arr
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        }),
        _ => None,
    }
}

struct RelayEndpoint {
    url: String,
    state: Arc<Mutex<EndpointState>>,
    sink: Option<SharedSink>,
    reader: Option<JoinHandle<()>>,
}

impl RelayEndpoint {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: Arc::new(Mutex::new(EndpointState::Disconnected)),
            sink: None,
            reader: None,
        }
    }

    fn state(&self) -> EndpointState {
        *self.state.lock()
    }

    fn set_state(&self, state: EndpointState) {
        *self.state.lock() = state;
    }

    /// Connected (or at least connecting) with a live sink.
    fn is_open(&self) -> bool {
        self.sink.is_some()
            && matches!(
                self.state(),
                EndpointState::Connecting | EndpointState::Subscribed
            )
    }
}

/// The set of relay connections. Owned by the session; all mutation is
/// driven by the single supervisor thread of control.
pub struct RelayPool {
    endpoints: Vec<RelayEndpoint>,
    intake: UnboundedSender<IntakeMessage>,
}

impl RelayPool {
    pub fn new(intake: UnboundedSender<IntakeMessage>) -> Self {
        Self {
            endpoints: Vec::new(),
            intake,
        }
    }

    /// Register an endpoint. Duplicate URLs are ignored.
    pub fn add_endpoint(&mut self, url: &str) {
        if self.endpoints.iter().any(|e| e.url == url) {
            return;
        }
        info!("Adding relay: {}", url);
        self.endpoints.push(RelayEndpoint::new(url));
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoint_states(&self) -> Vec<(String, EndpointState)> {
        self.endpoints
            .iter()
            .map(|e| (e.url.clone(), e.state()))
            .collect()
    }

    /// Open every endpoint that is not already open. Idempotent per URL;
    /// endpoints that fail to connect go to `Error` and are left alone
    /// until the next reconnect driven by the supervisor.
    pub async fn open_all(&mut self) {
        for ep in &mut self.endpoints {
            if ep.is_open() {
                continue;
            }
            ep.set_state(EndpointState::Connecting);

            match connect_async(ep.url.as_str()).await {
                Ok((ws, _)) => {
                    let (sink, stream) = ws.split();
                    let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));
                    ep.sink = Some(sink.clone());
                    ep.reader = Some(tokio::spawn(read_loop(
                        ep.url.clone(),
                        stream,
                        sink,
                        ep.state.clone(),
                        self.intake.clone(),
                    )));
                    info!("Connected to {}", ep.url);
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", ep.url, e);
                    ep.set_state(EndpointState::Error);
                    ep.sink = None;
                }
            }
        }
    }

    /// Issue the same subscription request to every open endpoint.
    /// Partial failure is tolerated; the set degrades to whatever is
    /// reachable, with no quorum requirement.
    pub async fn subscribe_all(&self, sub: &Subscription) {
        let frame = sub.req_frame();
        let mut subscribed = 0usize;

        for ep in self.endpoints.iter().filter(|e| e.is_open()) {
            let Some(sink) = ep.sink.clone() else { continue };
            match sink.lock().await.send(WsMessage::Text(frame.clone().into())).await {
                Ok(()) => {
                    ep.set_state(EndpointState::Subscribed);
                    subscribed += 1;
                }
                Err(e) => {
                    warn!("Subscribe failed on {}: {}", ep.url, e);
                    ep.set_state(EndpointState::Error);
                }
            };
        }

        debug!(
            "Subscription {} active on {}/{} relay(s)",
            sub.id,
            subscribed,
            self.endpoints.len()
        );
    }

    /// Close the subscription on every endpoint that carries it.
    pub async fn unsubscribe_all(&self, sub: &Subscription) {
        let frame = sub.close_frame();
        for ep in self
            .endpoints
            .iter()
            .filter(|e| e.state() == EndpointState::Subscribed)
        {
            let Some(sink) = ep.sink.clone() else { continue };
            if let Err(e) = sink.lock().await.send(WsMessage::Text(frame.clone().into())).await {
                warn!("Failed to close subscription on {}: {}", ep.url, e);
                ep.set_state(EndpointState::Error);
            };
        }
    }

    /// Fan a signed event out to every open endpoint. Best-effort: failures
    /// are logged and the endpoint marked, nothing is retried or surfaced.
    pub async fn publish(&self, event: &Event) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize outbound event: {}", e);
                return;
            }
        };
        let frame = format!(r#"["EVENT",{}]"#, json);
        let mut delivered = 0usize;

        for ep in self.endpoints.iter().filter(|e| e.is_open()) {
            let Some(sink) = ep.sink.clone() else { continue };
            match sink.lock().await.send(WsMessage::Text(frame.clone().into())).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Publish to {} failed: {}", ep.url, e);
                    ep.set_state(EndpointState::Error);
                }
            };
        }

        info!(
            "Published event {} to {}/{} relay(s)",
            event.id.to_hex(),
            delivered,
            self.endpoints.len()
        );
    }

    /// Tear down every connection: abort readers, close sinks, reset state.
    pub async fn close_all(&mut self) {
        for ep in &mut self.endpoints {
            if let Some(reader) = ep.reader.take() {
                reader.abort();
            }
            if let Some(sink) = ep.sink.take() {
                let _ = sink.lock().await.close().await;
            }
            ep.set_state(EndpointState::Disconnected);
        }
        debug!("All relay connections closed");
    }
}

/// Per-connection reader: forwards events and notices into the intake
/// queue, answers pings, and marks the endpoint on any failure.
async fn read_loop(
    url: String,
    mut stream: SplitStream<WsStream>,
    sink: SharedSink,
    state: Arc<Mutex<EndpointState>>,
    intake: UnboundedSender<IntakeMessage>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("Read error on {}: {}", url, e);
                *state.lock() = EndpointState::Error;
                return;
            }
        };

        let text = match msg {
            WsMessage::Text(t) => t.to_string(),
            WsMessage::Ping(data) => {
                sink.lock().await.send(WsMessage::Pong(data)).await.ok();
                continue;
            }
            WsMessage::Close(_) => {
                info!("Relay {} closed the connection", url);
                *state.lock() = EndpointState::Error;
                return;
            }
            _ => continue,
        };

        match parse_relay_frame(&text) {
            Some(RelayFrame::Event(event)) => {
                debug!("Event {} from {}", event.id.to_hex(), url);
                if intake
                    .send(IntakeMessage::Event {
                        relay_url: url.clone(),
                        event,
                    })
                    .is_err()
                {
                    return; // intake consumer gone, session is over
                }
            }
            Some(RelayFrame::Notice(message)) => {
                if intake
                    .send(IntakeMessage::Notice {
                        relay_url: url.clone(),
                        message,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Some(RelayFrame::EndOfStored(sub_id)) => {
                debug!("End of stored events on {} for '{}'", url, sub_id);
            }
            Some(RelayFrame::PublishAck {
                event_id,
                accepted,
                message,
            }) => {
                if accepted {
                    debug!("Relay {} accepted event {}", url, event_id);
                } else {
                    warn!("Relay {} rejected event {}: {}", url, event_id, message);
                }
            }
            None => debug!("Unhandled frame from {}", url),
        }
    }

    // Stream ended without a close frame
    *state.lock() = EndpointState::Error;
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::RelayPool;
    use crate::intake::IntakeQueue;
    use nostr_sdk::prelude::*;

    #[test]
    fn add_endpoint_is_idempotent() {
        let (_queue, tx) = IntakeQueue::new();
        let mut pool = RelayPool::new(tx);

        pool.add_endpoint("wss://relay.example");
        pool.add_endpoint("wss://relay.example");
        pool.add_endpoint("wss://other.example");

        assert_eq!(pool.endpoint_count(), 2);
    }

    #[test]
    fn endpoints_start_disconnected() {
        let (_queue, tx) = IntakeQueue::new();
        let mut pool = RelayPool::new(tx);
        pool.add_endpoint("wss://relay.example");

        let states = pool.endpoint_states();
        assert_eq!(states[0].1, EndpointState::Disconnected);
    }

    #[test]
    fn inbox_subscription_filter_shape() {
        let keys = Keys::generate();
        let sub = Subscription::for_inbox(&keys.public_key(), 1_700_000_000);

        assert_eq!(sub.filter["kinds"], serde_json::json!([4, 1]));
        assert_eq!(
            sub.filter["#p"][0].as_str().unwrap(),
            keys.public_key().to_hex()
        );
        assert_eq!(sub.filter["since"].as_u64().unwrap(), 1_700_000_000);
    }

    #[test]
    fn req_and_close_frames_carry_the_subscription_id() {
        let keys = Keys::generate();
        let sub = Subscription::for_inbox(&keys.public_key(), 0);

        let req: serde_json::Value = serde_json::from_str(&sub.req_frame()).unwrap();
        assert_eq!(req[0], "REQ");
        assert_eq!(req[1].as_str().unwrap(), sub.id);

        let close: serde_json::Value = serde_json::from_str(&sub.close_frame()).unwrap();
        assert_eq!(close[0], "CLOSE");
        assert_eq!(close[1].as_str().unwrap(), sub.id);
    }

    #[test]
    fn parses_event_frame() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::TextNote, "hello")
            .sign_with_keys(&keys)
            .unwrap();
        let frame = format!(
            r#"["EVENT","sub1",{}]"#,
            serde_json::to_string(&event).unwrap()
        );

        match parse_relay_frame(&frame) {
            Some(RelayFrame::Event(parsed)) => {
                assert_eq!(parsed.id, event.id);
                assert_eq!(parsed.content, "hello");
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn parses_notice_and_eose_and_ok() {
        match parse_relay_frame(r#"["NOTICE","slow down"]"#) {
            Some(RelayFrame::Notice(msg)) => assert_eq!(msg, "slow down"),
            other => panic!("expected notice, got {other:?}"),
        }

        match parse_relay_frame(r#"["EOSE","sub1"]"#) {
            Some(RelayFrame::EndOfStored(id)) => assert_eq!(id, "sub1"),
            other => panic!("expected EOSE, got {other:?}"),
        }

        match parse_relay_frame(r#"["OK","abcd",false,"blocked: spam"]"#) {
            Some(RelayFrame::PublishAck {
                event_id,
                accepted,
                message,
            }) => {
                assert_eq!(event_id, "abcd");
                assert!(!accepted);
                assert_eq!(message, "blocked: spam");
            }
            other => panic!("expected OK frame, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_ignored() {
        assert!(parse_relay_frame("not json").is_none());
        assert!(parse_relay_frame(r#"{"not":"an array"}"#).is_none());
        assert!(parse_relay_frame(r#"["AUTH","challenge"]"#).is_none());
        assert!(parse_relay_frame(r#"["EVENT","sub1",{"bad":"event"}]"#).is_none());
    }
}
