use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::types::{Config, QueueBackend};

/// Environment variable naming an explicit config file.
const CONFIG_ENV: &str = "TG_FORWARD_CONFIG";

/// System-wide config location.
const SYSTEM_CONFIG: &str = "/etc/tg-forward/config.yaml";

/// Resolve the configuration file path.
///
/// Order: explicit CLI flag, `TG_FORWARD_CONFIG`, `./config.yaml`,
/// `/etc/tg-forward/config.yaml`.
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    let local = PathBuf::from("config.yaml");
    if local.exists() {
        return local;
    }

    PathBuf::from(SYSTEM_CONFIG)
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        info!(
            token = %mask(&config.telegram.token),
            chat_ids = ?config.telegram.chat_ids,
            webhook_url = %mask(&config.dingtalk.webhook_url),
            secret = %mask(&config.dingtalk.secret),
            queue_type = ?config.queue.backend,
            queue_path = %config.queue.path.display(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.is_empty() {
            anyhow::bail!("telegram.token is required");
        }

        if self.dingtalk.webhook_url.is_empty() {
            anyhow::bail!("dingtalk.webhook_url is required");
        }

        if self.telegram.chat_ids.is_empty() {
            warn!("telegram.chat_ids is empty; no messages will be forwarded");
        }

        if self.queue.backend == QueueBackend::Leveldb && self.queue.path.as_os_str().is_empty() {
            anyhow::bail!("queue.path is required for the durable queue");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        if self.retry.interval == 0 {
            anyhow::bail!("retry.interval must be at least 1 second");
        }

        let http = &self.metrics.http;
        if http.auth && http.api_key.is_empty() {
            anyhow::bail!("metrics.http.api_key is required when auth is enabled");
        }

        if http.tls.enabled && (http.tls.cert_file.is_empty() || http.tls.key_file.is_empty()) {
            anyhow::bail!("metrics.http.tls requires cert_file and key_file");
        }

        Ok(())
    }
}

/// Hide the middle of a credential in startup logs.
fn mask(s: &str) -> String {
    if s.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &s[..4], &s[s.len() - 4..])
}
