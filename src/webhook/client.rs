//! Outbound webhook client.
//!
//! Each send is signed with an HMAC-SHA-256 over `"<timestamp>\n<secret>"`
//! and classified into a three-way outcome the engine switches on.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use crate::config::DingTalkConfig;
use crate::models::Message;

/// Per-request HTTP timeout.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one delivery attempt.
///
/// `Transient` failures are re-enqueued by the engine; `Permanent` ones
/// terminate the message's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Transient(String),
    Permanent(String),
}

/// Provider-level reply carried in a 2xx response body.
#[derive(Debug, Deserialize)]
struct ProviderReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Webhook notification client.
pub struct WebhookClient {
    http: reqwest::Client,
    config: DingTalkConfig,
}

impl WebhookClient {
    pub fn new(config: DingTalkConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()?;

        Ok(Self { http, config })
    }

    /// Attempt one delivery and classify the result.
    pub async fn send(&self, msg: &Message) -> SendOutcome {
        let url = self.signed_url();
        let body = self.build_body(msg);

        debug!(message_id = msg.id, is_rich = msg.is_rich, "sending webhook request");

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return SendOutcome::Transient(format!("request timed out: {e}"));
            }
            Err(e) if e.is_connect() => {
                return SendOutcome::Transient(format!("connection failed: {e}"));
            }
            // DNS failures and other transport errors are retryable too.
            Err(e) => return SendOutcome::Transient(format!("request failed: {e}")),
        };

        let status = response.status();

        if status.is_success() {
            let reply: ProviderReply = match response.json().await {
                Ok(reply) => reply,
                Err(e) => {
                    return SendOutcome::Transient(format!("unreadable response body: {e}"));
                }
            };

            if reply.errcode == 0 {
                return SendOutcome::Delivered;
            }

            // The provider rejected the payload; it will never succeed as-is.
            return SendOutcome::Permanent(format!(
                "provider error {}: {}",
                reply.errcode, reply.errmsg
            ));
        }

        match status.as_u16() {
            408 | 429 => SendOutcome::Transient(format!("status {status}")),
            400..=499 => SendOutcome::Permanent(format!("status {status}")),
            _ => SendOutcome::Transient(format!("status {status}")),
        }
    }

    /// Webhook URL with `&timestamp=<ms>&sign=<escaped HMAC>` appended.
    /// An empty secret disables signing.
    fn signed_url(&self) -> String {
        if self.config.secret.is_empty() {
            return self.config.webhook_url.clone();
        }

        let timestamp = Utc::now().timestamp_millis();
        let sign = sign_request(timestamp, &self.config.secret);

        format!(
            "{}&timestamp={}&sign={}",
            self.config.webhook_url, timestamp, sign
        )
    }

    fn build_body(&self, msg: &Message) -> serde_json::Value {
        let title = self.title(msg);

        let mut body = if msg.is_rich {
            let text = if self.config.notify_verbose {
                format!("### {}\n{}", title, msg.content)
            } else {
                format!("### {title}")
            };

            json!({
                "msgtype": "markdown",
                "markdown": { "title": title, "text": text },
            })
        } else {
            let content = if self.config.notify_verbose {
                format!("{}:\n{}", title, msg.content)
            } else {
                title
            };

            json!({
                "msgtype": "text",
                "text": { "content": content },
            })
        };

        if self.config.enable_at {
            body["at"] = json!({
                "atMobiles": self.config.at_mobiles,
                "isAtAll": self.config.is_at_all,
            });
        }

        body
    }

    fn title(&self, msg: &Message) -> String {
        if msg.chat_title.is_empty() {
            format!("Message from {}", msg.sender)
        } else {
            format!("Message from {} ({})", msg.sender, msg.chat_title)
        }
    }
}

/// Base64 HMAC-SHA-256 of `"<timestamp>\n<secret>"` keyed by the secret,
/// URL-escaped for use as a query parameter.
fn sign_request(timestamp: i64, secret: &str) -> String {
    let payload = format!("{timestamp}\n{secret}");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());

    let digest = BASE64.encode(mac.finalize().into_bytes());
    urlencoding::encode(&digest).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(verbose: bool) -> DingTalkConfig {
        DingTalkConfig {
            webhook_url: "https://oapi.example.com/robot/send?access_token=x".into(),
            secret: "SEC123".into(),
            notify_verbose: verbose,
            ..Default::default()
        }
    }

    fn msg(content: &str, rich: bool) -> Message {
        let mut m = Message::new(content.into(), "@alice".into(), -1, "ops".into());
        m.is_rich = rich;
        m
    }

    #[test]
    fn test_sign_is_deterministic_and_escaped() {
        let a = sign_request(1700000000000, "secret");
        let b = sign_request(1700000000000, "secret");
        assert_eq!(a, b);

        // Base64 '+' and '=' must not survive unescaped.
        assert!(!a.contains('+'));
        assert!(!a.contains('='));
    }

    #[test]
    fn test_sign_varies_with_timestamp() {
        assert_ne!(
            sign_request(1700000000000, "secret"),
            sign_request(1700000000001, "secret")
        );
    }

    #[test]
    fn test_signed_url_has_parameters() {
        let client = WebhookClient::new(config(true)).unwrap();
        let url = client.signed_url();
        assert!(url.starts_with("https://oapi.example.com/robot/send?access_token=x&timestamp="));
        assert!(url.contains("&sign="));
    }

    #[test]
    fn test_unsigned_url_when_secret_empty() {
        let mut cfg = config(true);
        cfg.secret = String::new();
        let client = WebhookClient::new(cfg).unwrap();
        assert!(!client.signed_url().contains("timestamp="));
    }

    #[test]
    fn test_text_body_verbose() {
        let client = WebhookClient::new(config(true)).unwrap();
        let body = client.build_body(&msg("hello", false));

        assert_eq!(body["msgtype"], "text");
        let content = body["text"]["content"].as_str().unwrap();
        assert!(content.contains("Message from @alice (ops)"));
        assert!(content.contains("hello"));
        assert!(body.get("at").is_none());
    }

    #[test]
    fn test_text_body_summary_omits_content() {
        let client = WebhookClient::new(config(false)).unwrap();
        let body = client.build_body(&msg("hello", false));
        assert!(!body["text"]["content"].as_str().unwrap().contains("hello"));
    }

    #[test]
    fn test_rich_body_uses_markdown_envelope() {
        let client = WebhookClient::new(config(true)).unwrap();
        let body = client.build_body(&msg("[photo]\nhttps://cdn/x.jpg", true));

        assert_eq!(body["msgtype"], "markdown");
        assert!(body["markdown"]["text"]
            .as_str()
            .unwrap()
            .contains("https://cdn/x.jpg"));
    }

    #[test]
    fn test_mention_payload_only_when_enabled() {
        let mut cfg = config(true);
        cfg.enable_at = true;
        cfg.at_mobiles = vec!["13800000000".into()];
        cfg.is_at_all = false;

        let client = WebhookClient::new(cfg).unwrap();
        let body = client.build_body(&msg("hi", false));

        assert_eq!(body["at"]["atMobiles"][0], "13800000000");
        assert_eq!(body["at"]["isAtAll"], false);
    }
}
