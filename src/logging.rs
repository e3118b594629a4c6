//! Tracing initialization.

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Initialize the tracing subscriber from config, with an optional CLI-level
/// override. Returns the file writer guard, which must stay alive for the
/// process lifetime when a log file is configured.
pub fn init_logging(config: &LogConfig, override_level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = override_level.unwrap_or(&config.level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true));

    let guard = match &config.file_path {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("failed to create log directory: {}", dir.display())
                })?;
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path.display()))?;

            let (writer, guard) = tracing_appender::non_blocking(file);

            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();

            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    };

    info!(level = %level, file = ?config.file_path, "logging initialized");

    Ok(guard)
}
