//! Durable FIFO queue for messages awaiting redelivery.
//!
//! Strict FIFO by push order. Pop-then-delete is non-atomic: a crash between
//! the two redelivers that one entry on restart, which is within the
//! at-least-once contract.
//!
//! # Implementations
//!
//! - [`MemoryQueue`]: volatile, for development and tests
//! - [`DurableQueue`]: fjall-backed, survives restarts

mod durable;
mod factory;
mod memory;

pub use durable::DurableQueue;
pub use factory::create_queue;
pub use memory::MemoryQueue;

use std::sync::Arc;

use crate::models::Message;

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has been closed; a normal terminal condition for callers
    /// racing shutdown.
    #[error("queue is closed")]
    Closed,

    #[error("queue storage error: {0}")]
    Storage(String),

    #[error("queue codec error: {0}")]
    Codec(String),
}

/// FIFO queue contract. All operations are safe under concurrent callers and
/// serialized internally; every operation after [`Queue::close`] fails with
/// [`QueueError::Closed`].
pub trait Queue: Send + Sync {
    /// Append a message to the tail.
    fn push(&self, msg: &Message) -> Result<(), QueueError>;

    /// Remove and return the head, or `None` when empty.
    fn pop(&self) -> Result<Option<Message>, QueueError>;

    /// Return the head without removing it, or `None` when empty.
    fn peek(&self) -> Result<Option<Message>, QueueError>;

    /// Number of queued messages.
    fn size(&self) -> Result<usize, QueueError>;

    /// Close the queue. Idempotent.
    fn close(&self) -> Result<(), QueueError>;
}

/// Shared queue handle.
pub type SharedQueue = Arc<dyn Queue>;
