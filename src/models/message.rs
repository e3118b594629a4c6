//! The canonical message: the pipeline's unit of work.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide message ID counter. IDs are monotonically non-decreasing and
/// unique within a process lifetime; the durable queue keeps its own index.
static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Replacement content for messages carrying an unparseable code point.
pub const EMOJI_FALLBACK: &str = "emoji parse failed";

/// A normalized inbound message on its way to the webhook target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Pipeline-assigned identifier, used in logs.
    pub id: u64,
    /// Source conversation.
    pub chat_id: i64,
    /// Human-readable source label, synthesized as `group(<chat_id>)` when
    /// the upstream title is absent.
    pub chat_title: String,
    /// Preferred handle if present, else composed full name.
    pub sender: String,
    /// Sanitized UTF-8 text.
    pub content: String,
    /// When true the outbound client uses the rich (markdown) envelope.
    pub is_rich: bool,
    /// Wall-clock time at normalization.
    pub created_at: DateTime<Utc>,
    /// Completed send attempts. Incremented only on failure.
    pub attempts: u32,
    /// Time of the most recent failed attempt; `None` until the first one.
    pub last_attempt: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new message with a fresh pipeline ID.
    pub fn new(content: String, sender: String, chat_id: i64, chat_title: String) -> Self {
        Self {
            id: MESSAGE_COUNTER.fetch_add(1, Ordering::SeqCst),
            chat_id,
            chat_title,
            sender,
            content,
            is_rich: false,
            created_at: Utc::now(),
            attempts: 0,
            last_attempt: None,
        }
    }

    /// Record a failed send attempt.
    pub fn record_failure(&mut self) {
        self.attempts += 1;
        self.last_attempt = Some(Utc::now());
    }
}

/// Replace content containing the Unicode replacement character with a fixed
/// fallback. Whole-message substitution, not character stripping: a single
/// `U+FFFD` anywhere means the upstream text was already mangled.
pub fn sanitize_content(content: &str) -> String {
    if content.contains('\u{FFFD}') {
        EMOJI_FALLBACK.to_string()
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_ids_monotonic() {
        let a = Message::new("a".into(), "@u".into(), 1, "t".into());
        let b = Message::new("b".into(), "@u".into(), 1, "t".into());
        assert!(b.id > a.id);
    }

    #[test]
    fn test_new_message_attempt_invariants() {
        let msg = Message::new("hello".into(), "@u".into(), -100, "g".into());
        assert_eq!(msg.attempts, 0);
        assert!(msg.last_attempt.is_none());
    }

    #[test]
    fn test_record_failure_sets_last_attempt() {
        let mut msg = Message::new("hello".into(), "@u".into(), 1, "g".into());
        msg.record_failure();
        assert_eq!(msg.attempts, 1);
        let last = msg.last_attempt.expect("last_attempt set");
        assert!(last >= msg.created_at);
    }

    #[test]
    fn test_json_round_trip_identity() {
        let mut msg = Message::new("hello world".into(), "@alice".into(), -42, "ops".into());
        msg.is_rich = true;
        msg.record_failure();

        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: Message = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_sanitize_passes_clean_content() {
        assert_eq!(sanitize_content("hello ☀ world"), "hello ☀ world");
    }

    #[test]
    fn test_sanitize_replaces_whole_content() {
        assert_eq!(sanitize_content("hello\u{FFFD}world"), EMOJI_FALLBACK);
        assert_eq!(sanitize_content("\u{FFFD}"), EMOJI_FALLBACK);
    }
}
