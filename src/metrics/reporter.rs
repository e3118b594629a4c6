//! Periodic metrics snapshot reporter.
//!
//! Refreshes the queue-size gauge, logs the snapshot, and optionally writes
//! it as pretty JSON to a file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bootstrap::Shutdown;
use crate::queue::{QueueError, SharedQueue};

use super::ForwardMetrics;

pub struct Reporter {
    queue: SharedQueue,
    metrics: Arc<ForwardMetrics>,
    interval: Duration,
    output_file: Option<PathBuf>,
}

impl Reporter {
    pub fn new(
        queue: SharedQueue,
        metrics: Arc<ForwardMetrics>,
        interval: Duration,
        output_file: Option<PathBuf>,
    ) -> Self {
        Self {
            queue,
            metrics,
            interval,
            output_file,
        }
    }

    /// Run until shutdown. Collects on every tick, starting immediately.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            interval_secs = self.interval.as_secs(),
            output_file = ?self.output_file,
            "metrics reporter started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        let mut stop = shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = stop.changed() => {
                    if *stop.borrow_and_update() {
                        info!("metrics reporter shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.collect_and_report();
                }
            }
        }
    }

    fn collect_and_report(&self) {
        match self.queue.size() {
            Ok(size) => self.metrics.set_queue_size(size),
            Err(QueueError::Closed) => return,
            Err(e) => {
                error!(error = %e, "failed to read queue size");
                return;
            }
        }

        let snapshot = self.metrics.snapshot();

        info!(
            queue_size = snapshot.queue_size,
            processed = snapshot.processed_messages,
            failed = snapshot.failed_messages,
            retried = snapshot.retry_messages,
            success_rate = snapshot.success_rate,
            "queue statistics"
        );

        if let Some(path) = &self.output_file {
            if let Some(dir) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    error!(error = %e, "failed to create metrics directory");
                    return;
                }
            }

            match serde_json::to_vec_pretty(&snapshot) {
                Ok(data) => {
                    if let Err(e) = std::fs::write(path, data) {
                        error!(path = %path.display(), error = %e, "failed to write metrics file");
                    } else {
                        debug!(path = %path.display(), "metrics snapshot written");
                    }
                }
                Err(e) => error!(error = %e, "failed to encode metrics snapshot"),
            }
        }
    }
}
