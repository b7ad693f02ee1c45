//! Per-event dispatch: one deduplicated inbound event in, at most one
//! outbound reply out.
//!
//! Publishing stays with the supervisor; this module only decides. Every
//! non-duplicate event is recorded exactly once, after its decision, so a
//! redelivery can never produce a second reply — including events that
//! fail decryption or content validation.

use nostr_sdk::nips::nip04;
use nostr_sdk::prelude::*;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classify::{classify, is_substantial, strip_profile_refs, InboundKind};
use crate::dedup::ProcessedIds;
use crate::generate::{system_prompt, GenerationClient};
use crate::reply::{compose_dm_reply, compose_note_reply, OutboundReply};

/// Decide what to do with one inbound event.
///
/// Duplicates produce no side effects at all. Everything else is recorded
/// as processed, then answered if it passes classification.
pub async fn dispatch_event(
    event: &Event,
    keys: &Keys,
    processed: &mut ProcessedIds,
    generator: &GenerationClient,
    note_cooldown: Duration,
) -> Option<OutboundReply> {
    if processed.has(&event.id) {
        debug!("Skipping already-processed event {}", event.id.to_hex());
        return None;
    }

    let reply = decide(event, keys, generator, note_cooldown).await;
    processed.record(event.id);
    reply
}

async fn decide(
    event: &Event,
    keys: &Keys,
    generator: &GenerationClient,
    note_cooldown: Duration,
) -> Option<OutboundReply> {
    match classify(event) {
        InboundKind::PrivateMessage => {
            let plaintext =
                match nip04::decrypt(keys.secret_key(), &event.pubkey, &event.content) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Failed to decrypt DM {}: {}", event.id.to_hex(), e);
                        return None;
                    }
                };

            if !is_substantial(&plaintext) {
                debug!("Skipping too-short DM {}", event.id.to_hex());
                return None;
            }

            info!(
                "Private message '{}' from {}",
                plaintext,
                event.pubkey.to_hex()
            );
            let text = generate_or_excuse(generator, &plaintext).await;

            match compose_dm_reply(keys, &event.pubkey, &text) {
                Ok(reply) => Some(OutboundReply::Direct(reply)),
                Err(e) => {
                    warn!("Failed to compose DM reply: {:#}", e);
                    None
                }
            }
        }

        InboundKind::PublicNote => {
            if event.pubkey == keys.public_key() {
                debug!("Skipping our own note {}", event.id.to_hex());
                return None;
            }

            let cleaned = strip_profile_refs(&event.content);
            if !is_substantial(&cleaned) {
                debug!("Skipping too-short note {}", event.id.to_hex());
                return None;
            }

            info!("Public note '{}' from {}", cleaned, event.pubkey.to_hex());
            let text = generate_or_excuse(generator, &cleaned).await;

            match compose_note_reply(keys, event, &text) {
                Ok(reply) => Some(OutboundReply::Note {
                    event: reply,
                    cooldown: note_cooldown,
                }),
                Err(e) => {
                    warn!("Failed to compose note reply: {:#}", e);
                    None
                }
            }
        }

        InboundKind::Other => {
            debug!(
                "Ignoring event {} of kind {}",
                event.id.to_hex(),
                event.kind.as_u16()
            );
            None
        }
    }
}

/// The agent always answers, even to say it failed: a generation failure
/// becomes a literal reply describing the failure.
async fn generate_or_excuse(generator: &GenerationClient, content: &str) -> String {
    match generator.generate(&system_prompt(), content).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Generation failed: {}", e);
            format!("Sorry, I could not come up with a reply: {e}")
        }
    }
}
