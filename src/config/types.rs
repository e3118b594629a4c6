use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for tg-forward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream chat feed.
    pub telegram: TelegramConfig,

    /// Outbound webhook target.
    pub dingtalk: DingTalkConfig,

    /// Retry queue storage.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Retry drain behavior.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Metrics collection and admin HTTP surface.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging sink.
    #[serde(default)]
    pub log: LogConfig,
}

/// Upstream long-poll API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API credential (required).
    pub token: String,

    /// Allowed source chat IDs. Empty means accept nothing.
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

/// Outbound webhook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DingTalkConfig {
    /// Webhook URL (required).
    pub webhook_url: String,

    /// HMAC signing key. Empty disables signing.
    #[serde(default)]
    pub secret: String,

    /// Attach the mention payload to outbound messages.
    #[serde(default)]
    pub enable_at: bool,

    /// Mobile numbers to mention.
    #[serde(default)]
    pub at_mobiles: Vec<String>,

    /// Mention everyone.
    #[serde(default)]
    pub is_at_all: bool,

    /// Send full content instead of a kind-only summary.
    #[serde(default)]
    pub notify_verbose: bool,
}

/// Queue backend selection.
///
/// `leveldb` is kept as the on-disk variant name for compatibility with
/// existing deployment files; it selects the embedded LSM store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    #[default]
    Leveldb,
}

/// Retry queue storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue type: `memory` or `leveldb` (durable).
    #[serde(rename = "type", default)]
    pub backend: QueueBackend,

    /// Durable queue root directory. The history store lives in a
    /// `chat_history` sibling under the same root.
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            path: default_queue_path(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("./data/queue")
}

/// Retry drain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Per-message attempt cap; messages at the cap are dropped with a warning.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Drain tick period in seconds.
    #[serde(default = "default_retry_interval")]
    pub interval: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval: default_retry_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_interval() -> u64 {
    60
}

/// Metrics collection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the periodic snapshot reporter.
    #[serde(default)]
    pub enabled: bool,

    /// Snapshot interval in seconds.
    #[serde(default = "default_metrics_interval")]
    pub interval: u64,

    /// Optional JSON snapshot file.
    #[serde(default)]
    pub output_file: Option<PathBuf>,

    /// Admin HTTP surface.
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_metrics_interval() -> u64 {
    60
}

/// Admin HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve the admin surface on a dedicated metrics port as well.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Metrics API path.
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Require an API key on every request.
    #[serde(default)]
    pub auth: bool,

    /// API key value.
    #[serde(default)]
    pub api_key: String,

    /// Header carrying the API key.
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// TLS settings. Parsed for compatibility; termination is delegated to a
    /// fronting proxy.
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_http_port(),
            path: default_metrics_path(),
            auth: false,
            api_key: String::new(),
            header_name: default_header_name(),
            tls: TlsConfig::default(),
        }
    }
}

fn default_http_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_header_name() -> String {
    "X-API-Key".to_string()
}

/// TLS configuration for the admin surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub cert_file: String,

    #[serde(default)]
    pub key_file: String,

    #[serde(default)]
    pub port: u16,

    /// Redirect plaintext requests to the TLS port.
    #[serde(default)]
    pub force_https: bool,
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file, written in addition to stdout.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Maximum file size in MB. Accepted for compatibility; rotation is
    /// delegated to the operator.
    #[serde(default)]
    pub max_size: u64,

    /// Maximum retained files. Accepted for compatibility.
    #[serde(default)]
    pub max_files: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: None,
            max_size: 0,
            max_files: 0,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
