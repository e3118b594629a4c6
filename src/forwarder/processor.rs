//! Sender task: first delivery attempt for messages off the intake channel.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::bootstrap::Shutdown;
use crate::metrics::ForwardMetrics;
use crate::models::Message;
use crate::queue::SharedQueue;
use crate::webhook::{SendOutcome, WebhookClient};

pub(super) async fn run_sender(
    queue: SharedQueue,
    webhook: Arc<WebhookClient>,
    metrics: Arc<ForwardMetrics>,
    mut intake: mpsc::Receiver<Message>,
    shutdown: Shutdown,
) {
    info!("sender task started");

    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => {
                if *stop.borrow_and_update() {
                    info!("sender task shutting down");
                    break;
                }
            }

            received = intake.recv() => match received {
                Some(msg) => deliver(&queue, &webhook, &metrics, msg).await,
                None => {
                    info!("intake channel closed");
                    break;
                }
            }
        }
    }

    info!("sender task stopped");
}

async fn deliver(
    queue: &SharedQueue,
    webhook: &WebhookClient,
    metrics: &ForwardMetrics,
    mut msg: Message,
) {
    let start = Instant::now();

    match webhook.send(&msg).await {
        SendOutcome::Delivered => {
            info!(
                message_id = msg.id,
                chat_id = msg.chat_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "message delivered"
            );
            metrics.inc_processed();
        }
        SendOutcome::Transient(reason) => {
            warn!(
                message_id = msg.id,
                reason = %reason,
                "delivery failed, queueing for retry"
            );

            msg.record_failure();
            match queue.push(&msg) {
                Ok(()) => {
                    metrics.inc_failed();
                    metrics.inc_retry_attempts();
                }
                Err(e) => {
                    // Dropping is the only alternative to unbounded memory.
                    error!(
                        message_id = msg.id,
                        error = %e,
                        "failed to enqueue message, dropping"
                    );
                    metrics.inc_failed();
                }
            }
        }
        SendOutcome::Permanent(reason) => {
            error!(
                message_id = msg.id,
                reason = %reason,
                "permanent delivery failure, dropping"
            );
            metrics.inc_failed();
        }
    }

    metrics.record_latency(start.elapsed());
}
