//! Ingest adapter: long-poll loop, filtering, and normalization.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bootstrap::Shutdown;
use crate::history::HistoryStore;
use crate::metrics::ForwardMetrics;
use crate::models::{sanitize_content, HistoryRecord, Message};

use super::update::{IncomingMessage, MessageKind, Update};
use super::{UpdateSource, Uploader};

/// Pause after a failed poll before retrying.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

pub struct IngestAdapter<S: UpdateSource> {
    source: S,
    uploader: Arc<dyn Uploader>,
    history: Arc<HistoryStore>,
    allowed: HashSet<i64>,
    intake: mpsc::Sender<Message>,
    metrics: Arc<ForwardMetrics>,
}

impl<S: UpdateSource> IngestAdapter<S> {
    pub fn new(
        source: S,
        uploader: Arc<dyn Uploader>,
        history: Arc<HistoryStore>,
        allowed_chats: &[i64],
        intake: mpsc::Sender<Message>,
        metrics: Arc<ForwardMetrics>,
    ) -> Self {
        Self {
            source,
            uploader,
            history,
            allowed: allowed_chats.iter().copied().collect(),
            intake,
            metrics,
        }
    }

    /// Run the long-poll loop until shutdown.
    pub async fn run(mut self, shutdown: Shutdown) {
        info!(allowed_chats = self.allowed.len(), "ingest adapter started");

        let mut stop = shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = stop.changed() => {
                    if *stop.borrow_and_update() {
                        info!("ingest adapter shutting down");
                        break;
                    }
                }

                batch = self.source.next_updates() => match batch {
                    Ok(updates) => {
                        for update in updates {
                            self.handle_update(update).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "update poll failed");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        info!("ingest adapter stopped");
    }

    async fn handle_update(&mut self, update: Update) {
        let Some(message) = update.message else {
            debug!(update_id = update.id, "non-message update ignored");
            return;
        };

        if !self.allowed.contains(&message.chat_id) {
            warn!(
                chat_id = message.chat_id,
                "message from unconfigured chat, ignoring"
            );
            return;
        }

        let group_name = if message.chat_title.is_empty() {
            format!("group({})", message.chat_id)
        } else {
            message.chat_title.clone()
        };

        let sender = compose_sender(&message);
        let (content, is_rich) = self.render_content(&message).await;
        let content = sanitize_content(&content);

        let timestamp = Utc
            .timestamp_opt(message.date, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let record = HistoryRecord {
            id: message.id,
            chat_id: message.chat_id,
            text: content.clone(),
            sender: sender.clone(),
            group_name: group_name.clone(),
            timestamp,
        };

        // History must never block forwarding.
        if let Err(e) = self.history.save(&record) {
            error!(message_id = message.id, error = %e, "failed to save history record");
        }

        let mut msg = Message::new(content, sender, message.chat_id, group_name);
        msg.is_rich = is_rich;

        match self.intake.try_send(msg) {
            Ok(()) => debug!("message offered to intake channel"),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(message_id = msg.id, "intake channel full, dropping message");
                self.metrics.inc_dropped_intake();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("intake channel closed");
            }
        }
    }

    /// Compute content and richness by message kind. Media kinds resolve to
    /// an uploaded URL; on failure they fall back to a processing-failed
    /// marker and stay plain.
    async fn render_content(&self, message: &IncomingMessage) -> (String, bool) {
        match &message.kind {
            MessageKind::Text { text } => (text.clone(), false),

            MessageKind::Photo { file_id, caption } => {
                self.media_content(
                    "photo",
                    None,
                    "images",
                    file_id,
                    &format!("{}.jpg", message.id),
                    "image/jpeg",
                    caption.as_deref(),
                )
                .await
            }

            MessageKind::Document {
                file_id,
                file_name,
                mime_type,
                caption,
            } => {
                self.media_content(
                    "document",
                    Some(file_name.as_str()),
                    "documents",
                    file_id,
                    file_name,
                    mime_type.as_deref().unwrap_or("application/octet-stream"),
                    caption.as_deref(),
                )
                .await
            }

            MessageKind::Video { file_id, caption } => {
                self.media_content(
                    "video",
                    None,
                    "videos",
                    file_id,
                    &format!("{}.mp4", message.id),
                    "video/mp4",
                    caption.as_deref(),
                )
                .await
            }

            MessageKind::Audio {
                file_id,
                file_name,
                mime_type,
                caption,
            } => {
                let filename = file_name
                    .clone()
                    .unwrap_or_else(|| format!("{}.mp3", message.id));
                self.media_content(
                    "audio",
                    file_name.as_deref(),
                    "audios",
                    file_id,
                    &filename,
                    mime_type.as_deref().unwrap_or("audio/mpeg"),
                    caption.as_deref(),
                )
                .await
            }

            MessageKind::Sticker => ("[sticker]".into(), false),
            MessageKind::Voice => ("[voice]".into(), false),
            MessageKind::VideoNote => ("[video note]".into(), false),
            MessageKind::Location => ("[location]".into(), false),
            MessageKind::Contact => ("[contact]".into(), false),
            MessageKind::Poll => ("[poll]".into(), false),
            MessageKind::Dice => ("[dice]".into(), false),
            MessageKind::Venue => ("[venue]".into(), false),
            MessageKind::Unknown => ("[unknown message type]".into(), false),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn media_content(
        &self,
        kind: &str,
        label: Option<&str>,
        category: &str,
        file_id: &str,
        filename: &str,
        content_type: &str,
        caption: Option<&str>,
    ) -> (String, bool) {
        let url = match self
            .fetch_and_upload(category, file_id, filename, content_type)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                error!(file_id, error = %e, "media processing failed");
                return (format!("[{kind} (processing failed)]"), false);
            }
        };

        let marker = match label {
            Some(name) => format!("[{kind}: {name}]"),
            None => format!("[{kind}]"),
        };

        let content = match caption {
            Some(caption) if !caption.is_empty() => format!("{marker} {caption}\n{url}"),
            _ => format!("{marker}\n{url}"),
        };

        (content, true)
    }

    async fn fetch_and_upload(
        &self,
        category: &str,
        file_id: &str,
        filename: &str,
        content_type: &str,
    ) -> anyhow::Result<String> {
        let data = self.source.fetch_file(file_id).await?;
        let object_path = format!("{category}/{filename}");
        self.uploader.upload(data, &object_path, content_type).await
    }
}

fn compose_sender(message: &IncomingMessage) -> String {
    if !message.from_username.is_empty() {
        return format!("@{}", message.from_username);
    }

    let mut name = message.from_first_name.clone();
    if !message.from_last_name.is_empty() {
        if !name.is_empty() {
            name.push(' ');
        }
        name.push_str(&message.from_last_name);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::DisabledUploader;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubSource {
        file: Option<Vec<u8>>,
    }

    #[async_trait]
    impl UpdateSource for StubSource {
        async fn next_updates(&mut self) -> anyhow::Result<Vec<Update>> {
            Ok(Vec::new())
        }

        async fn fetch_file(&self, _file_id: &str) -> anyhow::Result<Vec<u8>> {
            self.file
                .clone()
                .ok_or_else(|| anyhow::anyhow!("file unavailable"))
        }
    }

    struct StubUploader {
        url: String,
    }

    #[async_trait]
    impl Uploader for StubUploader {
        async fn upload(
            &self,
            _data: Vec<u8>,
            _object_path: &str,
            _content_type: &str,
        ) -> anyhow::Result<String> {
            Ok(self.url.clone())
        }
    }

    struct Fixture {
        adapter: IngestAdapter<StubSource>,
        intake: mpsc::Receiver<Message>,
        history: Arc<HistoryStore>,
        metrics: Arc<ForwardMetrics>,
        _dir: TempDir,
    }

    fn fixture(capacity: usize, uploader: Arc<dyn Uploader>, file: Option<Vec<u8>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let history = Arc::new(HistoryStore::open(dir.path()).unwrap());
        let metrics = ForwardMetrics::new();
        let (tx, rx) = mpsc::channel(capacity);

        let adapter = IngestAdapter::new(
            StubSource { file },
            uploader,
            history.clone(),
            &[-100],
            tx,
            metrics.clone(),
        );

        Fixture {
            adapter,
            intake: rx,
            history,
            metrics,
            _dir: dir,
        }
    }

    fn text_message(chat_id: i64, text: &str) -> Update {
        Update {
            id: 1,
            message: Some(IncomingMessage {
                id: 555,
                chat_id,
                chat_title: "ops".into(),
                from_username: "alice".into(),
                from_first_name: "Alice".into(),
                from_last_name: "Ada".into(),
                date: 1717236000,
                kind: MessageKind::Text { text: text.into() },
            }),
        }
    }

    #[tokio::test]
    async fn test_text_message_normalized() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        fx.adapter.handle_update(text_message(-100, "deploy done")).await;

        let msg = fx.intake.try_recv().unwrap();
        assert_eq!(msg.content, "deploy done");
        assert_eq!(msg.sender, "@alice");
        assert_eq!(msg.chat_title, "ops");
        assert!(!msg.is_rich);
    }

    #[tokio::test]
    async fn test_disallowed_chat_dropped() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        fx.adapter.handle_update(text_message(-999, "hi")).await;

        assert!(fx.intake.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_message_update_dropped_silently() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        fx.adapter.handle_update(Update { id: 9, message: None }).await;

        assert!(fx.intake.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replacement_character_substitutes_content() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        fx.adapter
            .handle_update(text_message(-100, "hello\u{FFFD}world"))
            .await;

        let msg = fx.intake.try_recv().unwrap();
        assert_eq!(msg.content, "emoji parse failed");
        assert!(!msg.content.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_history_saved_with_upstream_timestamp() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        fx.adapter.handle_update(text_message(-100, "audit me")).await;

        let start = Utc.timestamp_opt(1717235000, 0).unwrap();
        let end = Utc.timestamp_opt(1717237000, 0).unwrap();
        let records = fx.history.query_range(-100, &start, &end).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 555);
        assert_eq!(records[0].text, "audit me");
        assert_eq!(records[0].group_name, "ops");
        assert_eq!(records[0].timestamp.timestamp(), 1717236000);
    }

    #[tokio::test]
    async fn test_sender_falls_back_to_full_name() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        let mut update = text_message(-100, "hi");
        update.message.as_mut().unwrap().from_username = String::new();
        fx.adapter.handle_update(update).await;

        let msg = fx.intake.try_recv().unwrap();
        assert_eq!(msg.sender, "Alice Ada");
    }

    #[tokio::test]
    async fn test_empty_chat_title_synthesized() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        let mut update = text_message(-100, "hi");
        update.message.as_mut().unwrap().chat_title = String::new();
        fx.adapter.handle_update(update).await;

        let msg = fx.intake.try_recv().unwrap();
        assert_eq!(msg.chat_title, "group(-100)");
    }

    #[tokio::test]
    async fn test_photo_uploaded_becomes_rich() {
        let uploader = Arc::new(StubUploader {
            url: "https://cdn.example.com/images/555.jpg".into(),
        });
        let mut fx = fixture(10, uploader, Some(vec![1, 2, 3]));

        let mut update = text_message(-100, "");
        update.message.as_mut().unwrap().kind = MessageKind::Photo {
            file_id: "F1".into(),
            caption: Some("sunset".into()),
        };
        fx.adapter.handle_update(update).await;

        let msg = fx.intake.try_recv().unwrap();
        assert!(msg.is_rich);
        assert_eq!(
            msg.content,
            "[photo] sunset\nhttps://cdn.example.com/images/555.jpg"
        );
    }

    #[tokio::test]
    async fn test_media_failure_falls_back_to_marker() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), Some(vec![1]));

        let mut update = text_message(-100, "");
        update.message.as_mut().unwrap().kind = MessageKind::Photo {
            file_id: "F1".into(),
            caption: None,
        };
        fx.adapter.handle_update(update).await;

        let msg = fx.intake.try_recv().unwrap();
        assert!(!msg.is_rich);
        assert_eq!(msg.content, "[photo (processing failed)]");
    }

    #[tokio::test]
    async fn test_marker_kinds() {
        let mut fx = fixture(10, Arc::new(DisabledUploader), None);

        let mut update = text_message(-100, "");
        update.message.as_mut().unwrap().kind = MessageKind::Sticker;
        fx.adapter.handle_update(update).await;

        let msg = fx.intake.try_recv().unwrap();
        assert_eq!(msg.content, "[sticker]");
    }

    #[tokio::test]
    async fn test_full_intake_drops_and_counts() {
        let mut fx = fixture(1, Arc::new(DisabledUploader), None);

        fx.adapter.handle_update(text_message(-100, "first")).await;
        fx.adapter.handle_update(text_message(-100, "second")).await;

        assert_eq!(fx.metrics.snapshot().dropped_intake_messages, 1);

        // The already-queued message is unaffected.
        let msg = fx.intake.try_recv().unwrap();
        assert_eq!(msg.content, "first");
        assert!(fx.intake.try_recv().is_err());
    }
}
