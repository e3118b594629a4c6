//! Forwarding engine.
//!
//! Two long-running tasks share the queue and webhook client:
//!
//! 1. the **sender** reads the bounded intake channel and attempts first
//!    delivery, enqueueing transient failures;
//! 2. the **drain** wakes on a timer and re-attempts queued messages up to
//!    the per-message attempt cap.
//!
//! FIFO holds within the queue; there is no ordering between fast-path and
//! retry-path deliveries. Shutdown is cooperative: each task finishes its
//! current message, then the engine closes queue and history.

mod processor;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::bootstrap::Shutdown;
use crate::history::HistoryStore;
use crate::metrics::ForwardMetrics;
use crate::models::Message;
use crate::queue::{QueueError, SharedQueue};
use crate::webhook::WebhookClient;

/// Intake channel capacity. The channel is deliberately small and lossy at
/// the ingest edge; the durable queue absorbs outbound failure, not upstream
/// bursts.
pub const INTAKE_CAPACITY: usize = 100;

pub struct Engine {
    queue: SharedQueue,
    history: Arc<HistoryStore>,
    webhook: Arc<WebhookClient>,
    metrics: Arc<ForwardMetrics>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl Engine {
    pub fn new(
        queue: SharedQueue,
        history: Arc<HistoryStore>,
        webhook: Arc<WebhookClient>,
        metrics: Arc<ForwardMetrics>,
        max_attempts: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            queue,
            history,
            webhook,
            metrics,
            max_attempts,
            retry_interval,
        }
    }

    /// Run the sender and drain tasks until shutdown, then close storage.
    pub async fn run(self, intake: mpsc::Receiver<Message>, shutdown: Shutdown) {
        info!(
            max_attempts = self.max_attempts,
            retry_interval_secs = self.retry_interval.as_secs(),
            "forwarding engine started"
        );

        let sender = tokio::spawn(processor::run_sender(
            self.queue.clone(),
            self.webhook.clone(),
            self.metrics.clone(),
            intake,
            shutdown.clone(),
        ));

        let drain = tokio::spawn(retry::run_drain(
            self.queue.clone(),
            self.webhook.clone(),
            self.metrics.clone(),
            self.max_attempts,
            self.retry_interval,
            shutdown.clone(),
        ));

        let _ = sender.await;
        let _ = drain.await;

        // Storage closes only after every task has exited.
        match self.queue.close() {
            Ok(()) | Err(QueueError::Closed) => {}
            Err(e) => error!(error = %e, "failed to close queue"),
        }

        if let Err(e) = self.history.close() {
            error!(error = %e, "failed to close history store");
        }

        info!("forwarding engine stopped");
    }
}
