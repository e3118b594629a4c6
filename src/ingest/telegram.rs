//! Telegram Bot API long-poll source.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::update::{IncomingMessage, MessageKind, Update};
use super::UpdateSource;

/// Hang timeout for the getUpdates long poll.
const LONG_POLL_TIMEOUT_SECS: u64 = 60;

/// Long-poll client for the Bot API.
pub struct TelegramSource {
    http: reqwest::Client,
    api_base: String,
    file_base: String,
    offset: i64,
}

impl TelegramSource {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        // The HTTP timeout must outlast the server-side hang.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 10))
            .build()
            .context("failed to build telegram HTTP client")?;

        Ok(Self {
            http,
            api_base: format!("https://api.telegram.org/bot{token}"),
            file_base: format!("https://api.telegram.org/file/bot{token}"),
            offset: 0,
        })
    }
}

#[async_trait]
impl UpdateSource for TelegramSource {
    async fn next_updates(&mut self) -> anyhow::Result<Vec<Update>> {
        let url = format!(
            "{}/getUpdates?timeout={}&offset={}",
            self.api_base, LONG_POLL_TIMEOUT_SECS, self.offset
        );

        let reply: ApiReply<Vec<WireUpdate>> = self
            .http
            .get(&url)
            .send()
            .await
            .context("getUpdates request failed")?
            .error_for_status()
            .context("getUpdates returned an error status")?
            .json()
            .await
            .context("getUpdates returned an unreadable body")?;

        if !reply.ok {
            anyhow::bail!(
                "getUpdates rejected: {}",
                reply.description.unwrap_or_else(|| "unknown error".into())
            );
        }

        let wire = reply.result.unwrap_or_default();

        for update in &wire {
            self.offset = self.offset.max(update.update_id + 1);
        }

        debug!(count = wire.len(), offset = self.offset, "updates received");

        Ok(wire.into_iter().map(WireUpdate::into_update).collect())
    }

    async fn fetch_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "{}/getFile?file_id={}",
            self.api_base,
            urlencoding::encode(file_id)
        );

        let reply: ApiReply<WireFile> = self
            .http
            .get(&url)
            .send()
            .await
            .context("getFile request failed")?
            .error_for_status()
            .context("getFile returned an error status")?
            .json()
            .await
            .context("getFile returned an unreadable body")?;

        let path = reply
            .result
            .and_then(|f| f.file_path)
            .context("getFile reply carried no file path")?;

        let bytes = self
            .http
            .get(format!("{}/{}", self.file_base, path))
            .send()
            .await
            .context("file download failed")?
            .error_for_status()
            .context("file download returned an error status")?
            .bytes()
            .await
            .context("file download body unreadable")?;

        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    update_id: i64,
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    #[serde(default)]
    date: i64,
    chat: WireChat,
    from: Option<WireUser>,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<Vec<WirePhotoSize>>,
    document: Option<WireDocument>,
    video: Option<WireVideo>,
    audio: Option<WireAudio>,
    sticker: Option<serde_json::Value>,
    voice: Option<serde_json::Value>,
    video_note: Option<serde_json::Value>,
    location: Option<serde_json::Value>,
    contact: Option<serde_json::Value>,
    poll: Option<serde_json::Value>,
    dice: Option<serde_json::Value>,
    venue: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WireUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireVideo {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct WireAudio {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

impl WireUpdate {
    fn into_update(self) -> Update {
        Update {
            id: self.update_id,
            message: self.message.map(WireMessage::into_message),
        }
    }
}

impl WireMessage {
    fn into_message(self) -> IncomingMessage {
        let from = self.from.unwrap_or_default();
        let caption = self.caption.clone();

        let kind = if let Some(photo) = self.photo.as_ref().filter(|p| !p.is_empty()) {
            // Sizes arrive smallest first; forward the largest rendition.
            MessageKind::Photo {
                file_id: photo[photo.len() - 1].file_id.clone(),
                caption,
            }
        } else if let Some(doc) = self.document {
            MessageKind::Document {
                file_id: doc.file_id,
                file_name: doc.file_name.unwrap_or_else(|| "file".into()),
                mime_type: doc.mime_type,
                caption,
            }
        } else if let Some(video) = self.video {
            MessageKind::Video {
                file_id: video.file_id,
                caption,
            }
        } else if let Some(audio) = self.audio {
            MessageKind::Audio {
                file_id: audio.file_id,
                file_name: audio.file_name,
                mime_type: audio.mime_type,
                caption,
            }
        } else if let Some(text) = self.text.as_ref().filter(|t| !t.is_empty()) {
            MessageKind::Text { text: text.clone() }
        } else if self.sticker.is_some() {
            MessageKind::Sticker
        } else if self.voice.is_some() {
            MessageKind::Voice
        } else if self.video_note.is_some() {
            MessageKind::VideoNote
        } else if self.location.is_some() {
            MessageKind::Location
        } else if self.contact.is_some() {
            MessageKind::Contact
        } else if self.poll.is_some() {
            MessageKind::Poll
        } else if self.dice.is_some() {
            MessageKind::Dice
        } else if self.venue.is_some() {
            MessageKind::Venue
        } else if let Some(caption) = self.caption.filter(|c| !c.is_empty()) {
            // Captioned media kinds we do not mirror still carry their text.
            MessageKind::Text { text: caption }
        } else {
            MessageKind::Unknown
        };

        IncomingMessage {
            id: self.message_id,
            chat_id: self.chat.id,
            chat_title: self.chat.title.unwrap_or_default(),
            from_username: from.username.unwrap_or_default(),
            from_first_name: from.first_name.unwrap_or_default(),
            from_last_name: from.last_name.unwrap_or_default(),
            date: self.date,
            kind,
        }
    }
}
