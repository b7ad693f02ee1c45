//! Outbound reply construction.
//!
//! Direct replies are NIP-04 encrypted kind-4 events addressed to the
//! original sender; public replies are kind-1 notes threaded onto the
//! original event with an `e` reply tag and a `p` tag for its author.

use anyhow::{Context, Result};
use nostr_sdk::nips::nip04;
use nostr_sdk::prelude::*;
use std::time::Duration;

/// A reply ready to be published.
#[derive(Debug, Clone)]
pub enum OutboundReply {
    /// Encrypted direct message; published immediately, no cool-down.
    Direct(Event),
    /// Public threaded note; the supervisor sleeps `cooldown` after
    /// publishing to throttle public-channel reply storms.
    Note { event: Event, cooldown: Duration },
}

impl OutboundReply {
    pub fn event(&self) -> &Event {
        match self {
            OutboundReply::Direct(event) => event,
            OutboundReply::Note { event, .. } => event,
        }
    }
}

/// Build a signed, NIP-04 encrypted direct-message reply.
pub fn compose_dm_reply(keys: &Keys, recipient: &PublicKey, plaintext: &str) -> Result<Event> {
    let ciphertext = nip04::encrypt(keys.secret_key(), recipient, plaintext)
        .context("Failed to encrypt DM reply")?;

    let event = EventBuilder::new(Kind::EncryptedDirectMessage, ciphertext)
        .tag(Tag::public_key(*recipient))
        .sign_with_keys(keys)
        .context("Failed to sign DM reply")?;
    Ok(event)
}

/// Build a signed public note replying to `parent`.
pub fn compose_note_reply(keys: &Keys, parent: &Event, plaintext: &str) -> Result<Event> {
    let tags = vec![
        Tag::custom(
            TagKind::custom("e"),
            vec![parent.id.to_hex(), String::new(), "reply".to_string()],
        ),
        Tag::public_key(parent.pubkey),
    ];

    let event = EventBuilder::new(Kind::TextNote, plaintext)
        .tags(tags)
        .sign_with_keys(keys)
        .context("Failed to sign note reply")?;
    Ok(event)
}
