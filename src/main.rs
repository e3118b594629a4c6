use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tg_forward::bootstrap::Shutdown;
use tg_forward::config::{resolve_config_path, Config, QueueConfig};
use tg_forward::forwarder::{Engine, INTAKE_CAPACITY};
use tg_forward::history::HistoryStore;
use tg_forward::ingest::{DisabledUploader, IngestAdapter, TelegramSource};
use tg_forward::logging;
use tg_forward::metrics::{AdminServer, AdminState, ForwardMetrics, Reporter};
use tg_forward::queue::{create_queue, MemoryQueue, SharedQueue};
use tg_forward::webhook::WebhookClient;

#[derive(Parser, Debug)]
#[command(name = "tg-forward")]
#[command(author, version, about = "Forward chat messages to a signed webhook target")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// History API port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Metrics port override
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.clone());
    let config = Config::load(&config_path)?;

    let _log_guard = logging::init_logging(&config.log, args.log_level.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        pid = std::process::id(),
        "starting tg-forward"
    );

    let history = Arc::new(HistoryStore::open(&config.queue.path.join("chat_history"))?);
    let queue = open_queue(&config.queue);
    let metrics = ForwardMetrics::new();
    let webhook = Arc::new(WebhookClient::new(config.dingtalk.clone())?);
    let shutdown = Shutdown::new();

    let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);

    let source = TelegramSource::new(&config.telegram.token)?;
    let adapter = IngestAdapter::new(
        source,
        Arc::new(DisabledUploader),
        history.clone(),
        &config.telegram.chat_ids,
        intake_tx,
        metrics.clone(),
    );
    let ingest_handle = tokio::spawn(adapter.run(shutdown.clone()));

    let engine = Engine::new(
        queue.clone(),
        history.clone(),
        webhook,
        metrics.clone(),
        config.retry.max_attempts,
        Duration::from_secs(config.retry.interval),
    );
    let engine_handle = tokio::spawn(engine.run(intake_rx, shutdown.clone()));

    let admin_state = AdminState::new(
        metrics.clone(),
        queue.clone(),
        history.clone(),
        &config.metrics.http,
    );

    spawn_admin_server(
        ([0, 0, 0, 0], args.http_port).into(),
        &config,
        admin_state.clone(),
        shutdown.clone(),
    );

    if config.metrics.http.enabled {
        if config.metrics.http.tls.enabled {
            warn!("metrics.http.tls is configured; TLS termination is delegated to a fronting proxy");
        }

        let metrics_port = args.metrics_port.unwrap_or(config.metrics.http.port);
        if metrics_port != args.http_port {
            spawn_admin_server(
                ([0, 0, 0, 0], metrics_port).into(),
                &config,
                admin_state.clone(),
                shutdown.clone(),
            );
        }
    }

    if config.metrics.enabled {
        let reporter = Reporter::new(
            queue.clone(),
            metrics.clone(),
            Duration::from_secs(config.metrics.interval),
            config.metrics.output_file.clone(),
        );
        tokio::spawn(reporter.run(shutdown.clone()));
        info!(
            interval = config.metrics.interval,
            output_file = ?config.metrics.output_file,
            "metrics collection enabled"
        );
    }

    info!("service started, press Ctrl+C to stop");

    wait_for_signal().await;

    info!("shutting down");
    shutdown.trigger();

    let _ = ingest_handle.await;
    // The engine closes the queue and history store after its tasks exit.
    let _ = engine_handle.await;

    info!("service stopped");
    Ok(())
}

/// Open the configured queue, falling back to a volatile in-memory queue when
/// the durable store cannot be opened.
fn open_queue(config: &QueueConfig) -> SharedQueue {
    match create_queue(config) {
        Ok(queue) => queue,
        Err(e) => {
            warn!(error = %e, "durable queue unavailable, falling back to in-memory queue");
            Arc::new(MemoryQueue::new())
        }
    }
}

fn spawn_admin_server(
    addr: SocketAddr,
    config: &Config,
    state: Arc<AdminState>,
    shutdown: Shutdown,
) {
    let server = AdminServer::new(addr, config.metrics.http.path.clone(), state);
    tokio::spawn(async move {
        if let Err(e) = server.run(shutdown).await {
            error!(address = %addr, error = %e, "admin server failed");
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = term.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}
