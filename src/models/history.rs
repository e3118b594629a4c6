//! Persisted audit entry for every accepted message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of chat history. Created at ingest, immutable, never deleted.
///
/// `timestamp` is the upstream message time, not the local ingest time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Upstream message ID.
    pub id: i64,
    pub chat_id: i64,
    pub text: String,
    pub sender: String,
    pub group_name: String,
    pub timestamp: DateTime<Utc>,
}
