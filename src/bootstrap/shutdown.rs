use tokio::sync::watch;
use tracing::info;

/// Cooperative shutdown signal shared by all long-running tasks.
///
/// Each task subscribes and observes the signal at its next suspension point;
/// no task is forcibly killed. Triggering is idempotent.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Signal all subscribers to stop.
    pub fn trigger(&self) {
        if !*self.tx.borrow() {
            info!("shutdown signal triggered");
            let _ = self.tx.send(true);
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        assert!(!shutdown.is_triggered());

        shutdown.trigger();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }
}
