//! Durable queue backed by fjall (pure Rust LSM-tree).
//!
//! Layout inside the `queue` partition:
//!
//! - `queue:index` holds the next insertion index as decimal ASCII;
//! - `msg:<index>` holds one JSON-encoded message, with the index zero-padded
//!   to 20 digits so lexical iteration order equals numeric order.
//!
//! Push writes the entry before bumping the index: a crash between the two
//! leaves an orphaned entry that the next push overwrites, and that entry was
//! never acknowledged to the caller.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::models::Message;

use super::{Queue, QueueError};

const INDEX_KEY: &[u8] = b"queue:index";
const ENTRY_PREFIX: &[u8] = b"msg:";

/// Width of the zero-padded entry index.
const INDEX_WIDTH: usize = 20;

fn entry_key(index: u64) -> String {
    format!("msg:{index:0width$}", width = INDEX_WIDTH)
}

/// Persistent FIFO queue.
pub struct DurableQueue {
    keyspace: Keyspace,
    entries: PartitionHandle,
    /// Serializes all operations; `true` once closed.
    closed: Mutex<bool>,
}

impl DurableQueue {
    /// Open or create the queue at the given directory.
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        std::fs::create_dir_all(path).map_err(|e| QueueError::Storage(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(path, perms)
                .map_err(|e| QueueError::Storage(e.to_string()))?;
        }

        // fjall replays its journal on open; a second attempt covers a stale
        // lock left by a dead process.
        let keyspace = match Config::new(path).open() {
            Ok(ks) => ks,
            Err(first) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %first,
                    "queue store open failed, retrying"
                );
                Config::new(path)
                    .open()
                    .map_err(|e| QueueError::Storage(e.to_string()))?
            }
        };

        let entries = keyspace
            .open_partition("queue", PartitionCreateOptions::default())
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let queue = Self {
            keyspace,
            entries,
            closed: Mutex::new(false),
        };

        // Initialize the index slot on first open.
        if queue
            .entries
            .get(INDEX_KEY)
            .map_err(|e| QueueError::Storage(e.to_string()))?
            .is_none()
        {
            queue
                .entries
                .insert(INDEX_KEY, b"0")
                .map_err(|e| QueueError::Storage(e.to_string()))?;
        }

        tracing::info!(
            path = %path.display(),
            pending = queue.count_entries()?,
            "durable queue opened"
        );

        Ok(queue)
    }

    fn guard(&self) -> Result<MutexGuard<'_, bool>, QueueError> {
        let guard = self.closed.lock().unwrap();
        if *guard {
            return Err(QueueError::Closed);
        }
        Ok(guard)
    }

    fn read_index(&self) -> Result<u64, QueueError> {
        let raw = self
            .entries
            .get(INDEX_KEY)
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        match raw {
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| QueueError::Codec(format!("index is not UTF-8: {e}")))?;
                text.parse::<u64>()
                    .map_err(|e| QueueError::Codec(format!("index is not a number: {e}")))
            }
            None => Ok(0),
        }
    }

    /// First entry in key order, if any.
    fn first_entry(&self) -> Result<Option<(Vec<u8>, Message)>, QueueError> {
        for item in self.entries.prefix(ENTRY_PREFIX) {
            let (key, value) = item.map_err(|e| QueueError::Storage(e.to_string()))?;
            let msg: Message = serde_json::from_slice(&value)
                .map_err(|e| QueueError::Codec(e.to_string()))?;
            return Ok(Some((key.to_vec(), msg)));
        }
        Ok(None)
    }

    fn count_entries(&self) -> Result<usize, QueueError> {
        let mut count = 0;
        for item in self.entries.prefix(ENTRY_PREFIX) {
            item.map_err(|e| QueueError::Storage(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }
}

impl Queue for DurableQueue {
    fn push(&self, msg: &Message) -> Result<(), QueueError> {
        let _guard = self.guard()?;

        let index = self.read_index()?;
        let value = serde_json::to_vec(msg).map_err(|e| QueueError::Codec(e.to_string()))?;

        self.entries
            .insert(entry_key(index).as_bytes(), &value)
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        self.entries
            .insert(INDEX_KEY, (index + 1).to_string().as_bytes())
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        Ok(())
    }

    fn pop(&self) -> Result<Option<Message>, QueueError> {
        let _guard = self.guard()?;

        match self.first_entry()? {
            Some((key, msg)) => {
                self.entries
                    .remove(&key)
                    .map_err(|e| QueueError::Storage(e.to_string()))?;
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    fn peek(&self) -> Result<Option<Message>, QueueError> {
        let _guard = self.guard()?;
        Ok(self.first_entry()?.map(|(_, msg)| msg))
    }

    fn size(&self) -> Result<usize, QueueError> {
        let _guard = self.guard()?;
        self.count_entries()
    }

    fn close(&self) -> Result<(), QueueError> {
        let mut guard = self.closed.lock().unwrap();
        if *guard {
            return Ok(());
        }
        *guard = true;

        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn msg(content: &str) -> Message {
        Message::new(content.into(), "@u".into(), 1, "g".into())
    }

    #[test]
    fn test_entry_key_lexical_equals_numeric() {
        let keys: Vec<String> = [0u64, 1, 9, 10, 99, 100, 12345678901234567890]
            .iter()
            .map(|&i| entry_key(i))
            .collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys);
    }

    #[test]
    fn test_fifo_order() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();

        for i in 0..10 {
            queue.push(&msg(&format!("m{i}"))).unwrap();
        }

        assert_eq!(queue.size().unwrap(), 10);
        for i in 0..10 {
            assert_eq!(queue.pop().unwrap().unwrap().content, format!("m{i}"));
        }
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();

        queue.push(&msg("head")).unwrap();
        queue.push(&msg("tail")).unwrap();

        assert_eq!(queue.peek().unwrap().unwrap().content, "head");
        assert_eq!(queue.size().unwrap(), 2);
    }

    #[test]
    fn test_survives_reopen_in_fifo_order() {
        let dir = TempDir::new().unwrap();

        {
            let queue = DurableQueue::open(dir.path()).unwrap();
            for i in 0..3 {
                queue.push(&msg(&format!("m{i}"))).unwrap();
            }
            queue.close().unwrap();
        }

        let queue = DurableQueue::open(dir.path()).unwrap();
        assert_eq!(queue.size().unwrap(), 3);
        for i in 0..3 {
            assert_eq!(queue.pop().unwrap().unwrap().content, format!("m{i}"));
        }
    }

    #[test]
    fn test_index_continues_after_drain_and_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let queue = DurableQueue::open(dir.path()).unwrap();
            queue.push(&msg("a")).unwrap();
            queue.pop().unwrap();
            queue.push(&msg("b")).unwrap();
            queue.close().unwrap();
        }

        let queue = DurableQueue::open(dir.path()).unwrap();
        assert_eq!(queue.size().unwrap(), 1);
        assert_eq!(queue.pop().unwrap().unwrap().content, "b");
        queue.push(&msg("c")).unwrap();
        assert_eq!(queue.pop().unwrap().unwrap().content, "c");
    }

    #[test]
    fn test_closed_queue_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();

        queue.close().unwrap();
        queue.close().unwrap();

        assert!(matches!(queue.push(&msg("x")), Err(QueueError::Closed)));
        assert!(matches!(queue.pop(), Err(QueueError::Closed)));
        assert!(matches!(queue.peek(), Err(QueueError::Closed)));
        assert!(matches!(queue.size(), Err(QueueError::Closed)));
    }

    #[test]
    fn test_message_fields_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();

        let mut original = msg("payload");
        original.is_rich = true;
        original.record_failure();
        queue.push(&original).unwrap();

        let popped = queue.pop().unwrap().unwrap();
        assert_eq!(popped, original);
    }
}
