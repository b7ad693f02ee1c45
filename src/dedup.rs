//! Processed-event tracking.
//!
//! Relays deliver at-least-once: the same event arrives from multiple
//! relays and is redelivered after reconnects. This set records every
//! event id for which a dispatch decision has been made, whether or not a
//! reply was sent. It grows for the process lifetime; a session restart
//! resets it together with the subscription `since` timestamp, so old
//! events are not refetched.

use nostr_sdk::EventId;
use std::collections::HashSet;

/// Append-only set of event ids that have already been dispatched.
#[derive(Debug, Default)]
pub struct ProcessedIds {
    seen: HashSet<EventId>,
}

impl ProcessedIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a dispatch decision was already made for this event.
    pub fn has(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    /// Record a dispatch decision. Inserting the same id twice is a no-op.
    pub fn record(&mut self, id: EventId) {
        self.seen.insert(id);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    fn test_event_id(content: &str) -> EventId {
        let keys = Keys::generate();
        EventBuilder::new(Kind::TextNote, content)
            .sign_with_keys(&keys)
            .unwrap()
            .id
    }

    #[test]
    fn record_and_check() {
        let mut set = ProcessedIds::new();
        let id = test_event_id("one");

        assert!(!set.has(&id));
        set.record(id);
        assert!(set.has(&id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicate_record_is_idempotent() {
        let mut set = ProcessedIds::new();
        let id = test_event_id("two");

        set.record(id);
        set.record(id);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn distinct_ids_are_tracked_independently() {
        let mut set = ProcessedIds::new();
        let a = test_event_id("a");
        let b = test_event_id("b");

        set.record(a);
        assert!(set.has(&a));
        assert!(!set.has(&b));
    }
}
