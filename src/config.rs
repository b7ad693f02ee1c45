//! Environment configuration and identity loading.
//!
//! All runtime configuration comes from environment variables. The model
//! identifier and the private key are required; everything else has a
//! default. Missing required values are typed so `main` can distinguish
//! "no key yet" (keygen flow) from a plainly broken setup.

use nostr_sdk::Keys;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Relays used when the `RELAYS` environment variable is absent.
pub const DEFAULT_RELAYS: &str =
    "wss://nos.lol,wss://nostr.bitcoiner.social,wss://relay.nostr.band,wss://relay.damus.io";

const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUBLIC_REPLY_COOLDOWN_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the environment variable \"OLLAMA_MODEL\" is not set")]
    MissingModel,
    #[error("the environment variable \"PRIVATE_KEY\" is not set")]
    MissingKey,
    #[error("invalid private key: {0}")]
    InvalidKey(String),
}

/// Immutable process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ollama chat model identifier.
    pub model: String,
    /// Agent identity keypair.
    pub keys: Keys,
    /// Relay endpoint URLs.
    pub relays: Vec<String>,
    /// Base URL of the Ollama HTTP API.
    pub ollama_host: String,
    /// Main-loop poll interval.
    pub poll_interval: Duration,
    /// Upper bound on a single generation call.
    pub generation_timeout: Duration,
    /// Cool-down enforced after publishing a public note reply.
    pub public_reply_cooldown: Duration,
    /// Close and reopen all relay connections every cycle instead of
    /// keeping them open for the session lifetime.
    pub reconnect_each_cycle: bool,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let model = env::var("OLLAMA_MODEL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingModel)?;

        let key_str = env::var("PRIVATE_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingKey)?;
        let keys =
            Keys::parse(key_str.trim()).map_err(|e| ConfigError::InvalidKey(e.to_string()))?;

        Ok(Self {
            model,
            keys,
            relays: parse_relay_list(env::var("RELAYS").ok()),
            ollama_host: env::var("OLLAMA_HOST")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            poll_interval: env_secs("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS),
            generation_timeout: env_secs(
                "GENERATION_TIMEOUT_SECS",
                DEFAULT_GENERATION_TIMEOUT_SECS,
            ),
            public_reply_cooldown: env_secs(
                "PUBLIC_REPLY_COOLDOWN_SECS",
                DEFAULT_PUBLIC_REPLY_COOLDOWN_SECS,
            ),
            reconnect_each_cycle: env_flag("RECONNECT_EACH_CYCLE"),
        })
    }
}

/// Split a comma-separated relay list, falling back to the default set.
pub fn parse_relay_list(raw: Option<String>) -> Vec<String> {
    raw.filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RELAYS.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_list_defaults_when_absent() {
        let relays = parse_relay_list(None);
        assert_eq!(relays.len(), 4);
        assert_eq!(relays[0], "wss://nos.lol");
    }

    #[test]
    fn relay_list_splits_and_trims() {
        let relays = parse_relay_list(Some(
            "wss://a.example, wss://b.example ,,wss://c.example".to_string(),
        ));
        assert_eq!(
            relays,
            vec!["wss://a.example", "wss://b.example", "wss://c.example"]
        );
    }

    #[test]
    fn empty_relay_var_uses_defaults() {
        let relays = parse_relay_list(Some("   ".to_string()));
        assert_eq!(relays.len(), 4);
    }
}
