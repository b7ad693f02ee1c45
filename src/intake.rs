//! Fan-in queue merging events and notices from all relay connections.
//!
//! Each relay reader task pushes into one unbounded channel; the main loop
//! is the single consumer. A drain hands back everything received since
//! the last drain, with notices separated out so operational signals can
//! be logged before any event is processed.

use nostr_sdk::Event;
use tokio::sync::mpsc;

/// A message produced by a relay reader task.
#[derive(Debug)]
pub enum IntakeMessage {
    Event { relay_url: String, event: Event },
    Notice { relay_url: String, message: String },
}

/// A relay-originated informational message.
#[derive(Debug, Clone)]
pub struct RelayNotice {
    pub relay_url: String,
    pub message: String,
}

/// An inbound event together with the relay that delivered it.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub relay_url: String,
    pub event: Event,
}

/// Everything received since the previous drain. Events keep arrival order.
#[derive(Debug, Default)]
pub struct Drained {
    pub notices: Vec<RelayNotice>,
    pub events: Vec<ReceivedEvent>,
}

/// Single-consumer end of the intake channel.
pub struct IntakeQueue {
    rx: mpsc::UnboundedReceiver<IntakeMessage>,
}

impl IntakeQueue {
    /// Create the queue and the sender handed to relay reader tasks.
    pub fn new() -> (Self, mpsc::UnboundedSender<IntakeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }

    /// Take everything currently queued without waiting.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                IntakeMessage::Event { relay_url, event } => {
                    drained.events.push(ReceivedEvent { relay_url, event })
                }
                IntakeMessage::Notice { relay_url, message } => {
                    drained.notices.push(RelayNotice { relay_url, message })
                }
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    fn note(content: &str) -> Event {
        EventBuilder::new(Kind::TextNote, content)
            .sign_with_keys(&Keys::generate())
            .unwrap()
    }

    #[test]
    fn drain_separates_notices_from_events() {
        let (mut queue, tx) = IntakeQueue::new();

        tx.send(IntakeMessage::Event {
            relay_url: "wss://a".into(),
            event: note("first"),
        })
        .unwrap();
        tx.send(IntakeMessage::Notice {
            relay_url: "wss://a".into(),
            message: "rate limited".into(),
        })
        .unwrap();
        tx.send(IntakeMessage::Event {
            relay_url: "wss://b".into(),
            event: note("second"),
        })
        .unwrap();

        let drained = queue.drain();
        assert_eq!(drained.notices.len(), 1);
        assert_eq!(drained.notices[0].message, "rate limited");
        assert_eq!(drained.events.len(), 2);
        assert_eq!(drained.events[0].event.content, "first");
        assert_eq!(drained.events[0].relay_url, "wss://a");
        assert_eq!(drained.events[1].event.content, "second");
        assert_eq!(drained.events[1].relay_url, "wss://b");
    }

    #[test]
    fn drain_on_empty_queue_returns_nothing() {
        let (mut queue, _tx) = IntakeQueue::new();
        let drained = queue.drain();
        assert!(drained.notices.is_empty());
        assert!(drained.events.is_empty());
    }

    #[test]
    fn second_drain_only_sees_new_messages() {
        let (mut queue, tx) = IntakeQueue::new();

        tx.send(IntakeMessage::Event {
            relay_url: "wss://a".into(),
            event: note("old"),
        })
        .unwrap();
        queue.drain();

        tx.send(IntakeMessage::Event {
            relay_url: "wss://a".into(),
            event: note("new"),
        })
        .unwrap();
        let drained = queue.drain();
        assert_eq!(drained.events.len(), 1);
        assert_eq!(drained.events[0].event.content, "new");
    }
}
