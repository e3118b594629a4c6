//! Queue factory.

use std::sync::Arc;

use crate::config::{QueueBackend, QueueConfig};

use super::{DurableQueue, MemoryQueue, QueueError, SharedQueue};

/// Create a queue backend from configuration.
pub fn create_queue(config: &QueueConfig) -> Result<SharedQueue, QueueError> {
    match config.backend {
        QueueBackend::Memory => {
            tracing::info!("using in-memory queue (volatile)");
            Ok(Arc::new(MemoryQueue::new()))
        }
        QueueBackend::Leveldb => {
            tracing::info!(path = %config.path.display(), "using durable queue");
            Ok(Arc::new(DurableQueue::open(&config.path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::queue::Queue;

    #[test]
    fn test_create_memory_queue() {
        let config = QueueConfig {
            backend: QueueBackend::Memory,
            path: Default::default(),
        };
        let queue = create_queue(&config).unwrap();

        let msg = Message::new("x".into(), "@u".into(), 1, "g".into());
        queue.push(&msg).unwrap();
        assert_eq!(queue.size().unwrap(), 1);
    }

    #[test]
    fn test_create_durable_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = QueueConfig {
            backend: QueueBackend::Leveldb,
            path: dir.path().to_path_buf(),
        };
        let queue = create_queue(&config).unwrap();
        assert_eq!(queue.size().unwrap(), 0);
    }
}
