//! Inbound update ingestion.
//!
//! The adapter drives one long-poll loop against an [`UpdateSource`],
//! normalizes accepted updates into canonical messages, records history, and
//! offers the result to the engine's bounded intake channel without blocking.

mod adapter;
mod telegram;
mod update;

pub use adapter::IngestAdapter;
pub use telegram::TelegramSource;
pub use update::{IncomingMessage, MessageKind, Update};

use async_trait::async_trait;

/// Upstream long-poll feed consumed by the adapter.
#[async_trait]
pub trait UpdateSource: Send {
    /// Block until the next batch of updates arrives (or the poll times out
    /// and returns an empty batch).
    async fn next_updates(&mut self) -> anyhow::Result<Vec<Update>>;

    /// Fetch the raw bytes of a media attachment.
    async fn fetch_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>>;
}

/// Media attachment sink. The object-storage implementation lives outside
/// the core; the pipeline only consumes the returned URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        data: Vec<u8>,
        object_path: &str,
        content_type: &str,
    ) -> anyhow::Result<String>;
}

/// Uploader used when no object storage is configured. Media messages then
/// degrade to their processing-failed markers.
pub struct DisabledUploader;

#[async_trait]
impl Uploader for DisabledUploader {
    async fn upload(
        &self,
        _data: Vec<u8>,
        _object_path: &str,
        _content_type: &str,
    ) -> anyhow::Result<String> {
        anyhow::bail!("media uploads are disabled")
    }
}
