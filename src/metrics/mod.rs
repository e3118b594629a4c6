//! Pipeline counters and the read-only admin surface.

mod reporter;
mod server;

pub use reporter::Reporter;
pub use server::{AdminServer, AdminState};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latency window size.
const LATENCY_WINDOW: usize = 100;

/// Monotonic counters and the sliding latency window shared by the sender
/// task, the drain task, the ingest adapter, and the admin surface.
pub struct ForwardMetrics {
    started: Instant,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    retry_attempts: AtomicU64,
    dropped_intake: AtomicU64,
    queue_size: AtomicU64,
    window: Mutex<Window>,
}

struct Window {
    total_processing: Duration,
    latencies: VecDeque<Duration>,
    minute_count: u64,
    minute_start: Instant,
    last_update: DateTime<Utc>,
}

impl ForwardMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            dropped_intake: AtomicU64::new(0),
            queue_size: AtomicU64::new(0),
            window: Mutex::new(Window {
                total_processing: Duration::ZERO,
                latencies: VecDeque::with_capacity(LATENCY_WINDOW),
                minute_count: 0,
                minute_start: Instant::now(),
                last_update: Utc::now(),
            }),
        })
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry_attempts(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped_intake(&self) {
        self.dropped_intake.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size as u64, Ordering::Relaxed);
    }

    /// Record one send attempt's latency; also feeds the per-minute
    /// throughput window, which resets when a minute elapses.
    pub fn record_latency(&self, latency: Duration) {
        let mut window = self.window.lock().unwrap();

        window.total_processing += latency;

        if window.latencies.len() >= LATENCY_WINDOW {
            window.latencies.pop_front();
        }
        window.latencies.push_back(latency);

        if window.minute_start.elapsed() >= Duration::from_secs(60) {
            window.minute_count = 1;
            window.minute_start = Instant::now();
        } else {
            window.minute_count += 1;
        }

        window.last_update = Utc::now();
    }

    /// Point-in-time snapshot with derived metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let retried = self.retried.load(Ordering::Relaxed);
        let retry_attempts = self.retry_attempts.load(Ordering::Relaxed);
        let dropped_intake = self.dropped_intake.load(Ordering::Relaxed);
        let queue_size = self.queue_size.load(Ordering::Relaxed);

        let window = self.window.lock().unwrap();

        let avg_latency_ms = if processed > 0 {
            (window.total_processing.as_millis() / processed as u128) as u64
        } else {
            0
        };

        let p95_latency_ms = {
            let mut sorted: Vec<Duration> = window.latencies.iter().copied().collect();
            sorted.sort();
            if sorted.is_empty() {
                0
            } else {
                let idx = ((sorted.len() as f64) * 0.95) as usize;
                sorted[idx.min(sorted.len() - 1)].as_millis() as u64
            }
        };

        let success_rate = {
            let total = processed + failed;
            if total == 0 {
                100.0
            } else {
                processed as f64 / total as f64 * 100.0
            }
        };

        let avg_retry_count = if processed > 0 {
            retry_attempts as f64 / processed as f64
        } else {
            0.0
        };

        let queue_pressure = if window.minute_count == 0 {
            queue_size as f64
        } else {
            queue_size as f64 / window.minute_count as f64
        };

        MetricsSnapshot {
            queue_size,
            processed_messages: processed,
            failed_messages: failed,
            retry_messages: retried,
            total_retry_count: retry_attempts,
            dropped_intake_messages: dropped_intake,
            last_update_time: window.last_update.to_rfc3339(),
            uptime_seconds: self.started.elapsed().as_secs(),
            avg_latency_ms,
            p95_latency_ms,
            throughput_per_min: window.minute_count as f64,
            success_rate,
            avg_retry_count,
            queue_pressure,
        }
    }
}

/// Serialized metrics, served by `/metrics` and written by the reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queue_size: u64,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub retry_messages: u64,
    pub total_retry_count: u64,
    pub dropped_intake_messages: u64,
    pub last_update_time: String,
    pub uptime_seconds: u64,
    pub avg_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub throughput_per_min: f64,
    pub success_rate: f64,
    pub avg_retry_count: f64,
    pub queue_pressure: f64,
}
