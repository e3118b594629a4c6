//! Drain task: periodic redelivery of queued messages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::bootstrap::Shutdown;
use crate::metrics::ForwardMetrics;
use crate::queue::{QueueError, SharedQueue};
use crate::webhook::{SendOutcome, WebhookClient};

pub(super) async fn run_drain(
    queue: SharedQueue,
    webhook: Arc<WebhookClient>,
    metrics: Arc<ForwardMetrics>,
    max_attempts: u32,
    interval: Duration,
    shutdown: Shutdown,
) {
    info!(
        interval_secs = interval.as_secs(),
        max_attempts, "retry drain started"
    );

    let mut ticker = tokio::time::interval(interval);
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => {
                if *stop.borrow_and_update() {
                    info!("retry drain shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                drain_once(&queue, &webhook, &metrics, max_attempts).await;
            }
        }
    }

    info!("retry drain stopped");
}

async fn drain_once(
    queue: &SharedQueue,
    webhook: &WebhookClient,
    metrics: &ForwardMetrics,
    max_attempts: u32,
) {
    let size = match queue.size() {
        Ok(size) => size,
        Err(QueueError::Closed) => return,
        Err(e) => {
            error!(error = %e, "failed to read queue size");
            return;
        }
    };

    if size == 0 {
        debug!("retry queue empty");
        return;
    }

    info!(queue_size = size, "draining retry queue");

    // The batch is bounded by the size observed at tick start; messages
    // pushed during the drain wait for the next tick.
    for _ in 0..size {
        let mut msg = match queue.pop() {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(QueueError::Closed) => return,
            Err(e) => {
                error!(error = %e, "failed to pop from retry queue");
                break;
            }
        };

        if msg.attempts >= max_attempts {
            warn!(
                message_id = msg.id,
                attempts = msg.attempts,
                "max attempts reached, discarding message"
            );
            continue;
        }

        let start = Instant::now();

        match webhook.send(&msg).await {
            SendOutcome::Delivered => {
                info!(
                    message_id = msg.id,
                    attempts = msg.attempts,
                    "retried message delivered"
                );
                metrics.inc_processed();
            }
            SendOutcome::Transient(reason) => {
                warn!(
                    message_id = msg.id,
                    attempts = msg.attempts,
                    reason = %reason,
                    "retry failed, re-queueing"
                );

                msg.record_failure();
                match queue.push(&msg) {
                    Ok(()) => {
                        metrics.inc_retried();
                        metrics.inc_retry_attempts();
                    }
                    Err(e) => {
                        error!(
                            message_id = msg.id,
                            error = %e,
                            "failed to re-enqueue message, dropping"
                        );
                        metrics.inc_failed();
                    }
                }
            }
            SendOutcome::Permanent(reason) => {
                error!(
                    message_id = msg.id,
                    reason = %reason,
                    "permanent failure on retry, dropping"
                );
                metrics.inc_failed();
            }
        }

        metrics.record_latency(start.elapsed());
    }
}
