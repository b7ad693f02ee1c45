//! Content classification for inbound events.
//!
//! Maps raw event kinds onto the two reply paths, strips embedded profile
//! references (`npub1…` / `nprofile1…`, with or without the `nostr:`
//! prefix) from note text, and gates out content too short to answer.

use nostr_sdk::{Event, Kind};
use regex::Regex;
use std::sync::LazyLock;

/// Minimum number of characters a cleaned message must have to be answered.
pub const MIN_CONTENT_CHARS: usize = 4;

/// Profile reference tokens embedded in note content, including any
/// trailing whitespace so stripping leaves no double spaces behind.
static PROFILE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(nostr:)?(nprofile|npub)[0-9a-z]+\s*").unwrap());

/// Which reply path an inbound event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    /// NIP-04 encrypted direct message (kind 4).
    PrivateMessage,
    /// Public text note mentioning us (kind 1).
    PublicNote,
    /// Anything else; ignored.
    Other,
}

pub fn classify(event: &Event) -> InboundKind {
    match event.kind {
        Kind::EncryptedDirectMessage => InboundKind::PrivateMessage,
        Kind::TextNote => InboundKind::PublicNote,
        _ => InboundKind::Other,
    }
}

/// Remove embedded profile reference tokens from note content.
///
/// Idempotent: stripping already-stripped content changes nothing.
pub fn strip_profile_refs(content: &str) -> String {
    PROFILE_REF_RE.replace_all(content, "").into_owned()
}

/// Whether cleaned content is long enough to be worth a generation call.
pub fn is_substantial(content: &str) -> bool {
    content.chars().count() >= MIN_CONTENT_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    #[test]
    fn classify_by_kind() {
        let keys = Keys::generate();
        let dm = EventBuilder::new(Kind::EncryptedDirectMessage, "x")
            .sign_with_keys(&keys)
            .unwrap();
        let note = EventBuilder::new(Kind::TextNote, "x")
            .sign_with_keys(&keys)
            .unwrap();
        let other = EventBuilder::new(Kind::Metadata, "{}")
            .sign_with_keys(&keys)
            .unwrap();

        assert_eq!(classify(&dm), InboundKind::PrivateMessage);
        assert_eq!(classify(&note), InboundKind::PublicNote);
        assert_eq!(classify(&other), InboundKind::Other);
    }

    #[test]
    fn strips_npub_with_prefix() {
        let npub = Keys::generate().public_key().to_bech32().unwrap();
        let content = format!("nostr:{npub} what do you think?");
        assert_eq!(strip_profile_refs(&content), "what do you think?");
    }

    #[test]
    fn strips_bare_npub_and_nprofile() {
        let npub = Keys::generate().public_key().to_bech32().unwrap();
        let content = format!("{npub} hello nprofile1qqs2e5hcdn world");
        assert_eq!(strip_profile_refs(&content), "hello world");
    }

    #[test]
    fn stripping_is_idempotent() {
        let npub = Keys::generate().public_key().to_bech32().unwrap();
        let content = format!("hey nostr:{npub} are you there?");
        let once = strip_profile_refs(&content);
        let twice = strip_profile_refs(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn plain_text_is_unchanged() {
        let content = "no references here, just a question?";
        assert_eq!(strip_profile_refs(content), content);
    }

    #[test]
    fn length_gate() {
        assert!(!is_substantial(""));
        assert!(!is_substantial("hi"));
        assert!(!is_substantial("gm!"));
        assert!(is_substantial("gm!!"));
        assert!(is_substantial("what do you think?"));
    }
}
