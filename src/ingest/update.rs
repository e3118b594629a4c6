//! Upstream-facing update model.
//!
//! This is the shape the adapter consumes; the wire format of the upstream
//! API stays inside its [`super::UpdateSource`] implementation.

/// One upstream update. Updates without a message are dropped silently.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: i64,
    pub message: Option<IncomingMessage>,
}

/// A message as received from upstream, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Upstream message ID.
    pub id: i64,
    pub chat_id: i64,
    /// May be empty for direct chats.
    pub chat_title: String,
    /// Handle without the `@` prefix; may be empty.
    pub from_username: String,
    pub from_first_name: String,
    pub from_last_name: String,
    /// Upstream send time, seconds since epoch.
    pub date: i64,
    pub kind: MessageKind,
}

/// Message content, dispatched on by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text {
        text: String,
    },
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    Document {
        file_id: String,
        file_name: String,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Video {
        file_id: String,
        caption: Option<String>,
    },
    Audio {
        file_id: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Sticker,
    Voice,
    VideoNote,
    Location,
    Contact,
    Poll,
    Dice,
    Venue,
    Unknown,
}
