//! Time-indexed chat history store.
//!
//! Every record is stored under a 16-byte composite key (big-endian chat ID,
//! big-endian timestamp nanos) so a bounded range scan yields one chat's
//! records in time order. See [`keys`].

mod keys;

pub use keys::composite_key;

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::models::HistoryRecord;

/// UTF-8 byte-order mark written at the head of CSV exports.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const CSV_HEADER: [&str; 6] = ["id", "chat_id", "group_name", "sender", "text", "timestamp"];

/// Append-only history store with per-chat time-range queries.
pub struct HistoryStore {
    keyspace: Keyspace,
    records: PartitionHandle,
    closed: Mutex<bool>,
}

impl HistoryStore {
    /// Open or create the history store at the given directory.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create history directory: {}", path.display()))?;

        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("failed to open history store: {}", path.display()))?;

        let records = keyspace.open_partition("history", PartitionCreateOptions::default())?;

        tracing::info!(path = %path.display(), "history store opened");

        Ok(Self {
            keyspace,
            records,
            closed: Mutex::new(false),
        })
    }

    fn check_open(&self) -> Result<()> {
        if *self.closed.lock().unwrap() {
            anyhow::bail!("history store is closed");
        }
        Ok(())
    }

    /// Persist one record. Records are immutable and never deleted.
    pub fn save(&self, record: &HistoryRecord) -> Result<()> {
        self.check_open()?;

        let key = composite_key(record.chat_id, &record.timestamp);
        let value = serde_json::to_vec(record).context("failed to encode history record")?;

        self.records
            .insert(key, &value)
            .context("failed to store history record")?;

        Ok(())
    }

    /// Records for one chat with `start <= timestamp < end`, in time order.
    pub fn query_range(
        &self,
        chat_id: i64,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>> {
        self.check_open()?;

        let lo = composite_key(chat_id, start);
        let hi = composite_key(chat_id, end);

        let mut records = Vec::new();
        for item in self.records.range(lo..hi) {
            let (_, value) = item.context("failed to scan history range")?;
            let record: HistoryRecord =
                serde_json::from_slice(&value).context("failed to decode history record")?;
            records.push(record);
        }

        Ok(records)
    }

    /// Range query filtered to one sender. Linear in the range size; there is
    /// no secondary sender index.
    pub fn query_user(
        &self,
        chat_id: i64,
        sender: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>> {
        let records = self.query_range(chat_id, start, end)?;
        Ok(records.into_iter().filter(|r| r.sender == sender).collect())
    }

    /// Stream a CSV export into `writer`: UTF-8 BOM, header row, one row per
    /// record in scan order. Timestamps are `YYYY-MM-DD HH:MM:SS` UTC.
    pub fn export_csv(
        &self,
        chat_id: i64,
        sender: Option<&str>,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        writer: &mut dyn Write,
    ) -> Result<()> {
        let records = match sender {
            Some(sender) => self.query_user(chat_id, sender, start, end)?,
            None => self.query_range(chat_id, start, end)?,
        };

        writer.write_all(UTF8_BOM).context("failed to write BOM")?;

        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(CSV_HEADER)
            .context("failed to write CSV header")?;

        for record in &records {
            csv.write_record([
                record.id.to_string(),
                record.chat_id.to_string(),
                record.group_name.clone(),
                record.sender.clone(),
                record.text.clone(),
                record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            ])
            .context("failed to write CSV row")?;
        }

        csv.flush().context("failed to flush CSV")?;
        Ok(())
    }

    /// Every record with its raw key, in key order. Used by the migration
    /// tool.
    pub fn all_records(&self) -> Result<Vec<(Vec<u8>, HistoryRecord)>> {
        self.check_open()?;

        let mut records = Vec::new();
        for item in self.records.iter() {
            let (key, value) = item.context("failed to scan history store")?;
            let record: HistoryRecord =
                serde_json::from_slice(&value).context("failed to decode history record")?;
            records.push((key.to_vec(), record));
        }

        Ok(records)
    }

    /// Overwrite the record at an existing key. Used by the migration tool.
    pub fn rewrite(&self, key: &[u8], record: &HistoryRecord) -> Result<()> {
        self.check_open()?;

        let value = serde_json::to_vec(record).context("failed to encode history record")?;
        self.records
            .insert(key, &value)
            .context("failed to rewrite history record")?;

        Ok(())
    }

    /// Force pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// Close the store. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Ok(());
        }
        *closed = true;

        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn record(id: i64, chat_id: i64, sender: &str, ts: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            id,
            chat_id,
            text: format!("text-{id}"),
            sender: sender.into(),
            group_name: "ops".into(),
            timestamp: ts,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_query_range_bounds() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        for i in 0..5 {
            store
                .save(&record(i, -100, "@a", t0 + Duration::seconds(i)))
                .unwrap();
        }

        // [t0+1, t0+4): records 1, 2, 3.
        let hits = store
            .query_range(-100, &(t0 + Duration::seconds(1)), &(t0 + Duration::seconds(4)))
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[2].id, 3);

        for hit in &hits {
            assert_eq!(hit.chat_id, -100);
            assert!(hit.timestamp >= t0 + Duration::seconds(1));
            assert!(hit.timestamp < t0 + Duration::seconds(4));
        }
    }

    #[test]
    fn test_query_does_not_cross_chats() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        store.save(&record(1, 7, "@a", t0)).unwrap();
        store.save(&record(2, 8, "@a", t0)).unwrap();

        let hits = store
            .query_range(7, &(t0 - Duration::hours(1)), &(t0 + Duration::hours(1)))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn test_query_user_filters_sender() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        store.save(&record(1, 5, "@alice", t0)).unwrap();
        store
            .save(&record(2, 5, "@bob", t0 + Duration::seconds(1)))
            .unwrap();
        store
            .save(&record(3, 5, "@alice", t0 + Duration::seconds(2)))
            .unwrap();

        let hits = store
            .query_user(5, "@alice", &t0, &(t0 + Duration::minutes(1)))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|r| r.sender == "@alice"));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let t0 = base_time();

        {
            let store = HistoryStore::open(dir.path()).unwrap();
            store.save(&record(9, 3, "@a", t0)).unwrap();
            store.close().unwrap();
        }

        let store = HistoryStore::open(dir.path()).unwrap();
        let hits = store
            .query_range(3, &(t0 - Duration::hours(1)), &(t0 + Duration::hours(1)))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "text-9");
    }

    #[test]
    fn test_export_csv_shape() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        let senders = ["@a", "@b", "@c", "@a", "@b"];
        for (i, sender) in senders.iter().enumerate() {
            store
                .save(&record(i as i64, 11, sender, t0 + Duration::seconds(i as i64)))
                .unwrap();
        }

        let mut out = Vec::new();
        store
            .export_csv(11, None, &t0, &(t0 + Duration::minutes(1)), &mut out)
            .unwrap();

        assert!(out.starts_with(UTF8_BOM));

        let text = String::from_utf8(out[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "id,chat_id,group_name,sender,text,timestamp");
        assert!(lines[1].starts_with("0,11,ops,@a,text-0,2024-06-01 10:00:00"));
        assert!(lines[5].starts_with("4,11,ops,@b,text-4,2024-06-01 10:00:04"));
    }

    #[test]
    fn test_export_csv_escapes_fields() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        let mut rec = record(1, 12, "@a", t0);
        rec.text = "hello, \"world\"\nbye".into();
        store.save(&rec).unwrap();

        let mut out = Vec::new();
        store
            .export_csv(12, None, &t0, &(t0 + Duration::minutes(1)), &mut out)
            .unwrap();

        let text = String::from_utf8(out[UTF8_BOM.len()..].to_vec()).unwrap();
        assert!(text.contains("\"hello, \"\"world\"\"\nbye\""));
    }

    #[test]
    fn test_export_csv_user_filter() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        store.save(&record(1, 13, "@a", t0)).unwrap();
        store
            .save(&record(2, 13, "@b", t0 + Duration::seconds(1)))
            .unwrap();

        let mut out = Vec::new();
        store
            .export_csv(13, Some("@b"), &t0, &(t0 + Duration::minutes(1)), &mut out)
            .unwrap();

        let text = String::from_utf8(out[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("@b"));
    }

    #[test]
    fn test_rewrite_preserves_key() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let t0 = base_time();

        store.save(&record(1, 14, "@a", t0)).unwrap();

        let all = store.all_records().unwrap();
        assert_eq!(all.len(), 1);

        let (key, mut rec) = all.into_iter().next().unwrap();
        rec.group_name = "backfilled".into();
        store.rewrite(&key, &rec).unwrap();

        let hits = store
            .query_range(14, &(t0 - Duration::hours(1)), &(t0 + Duration::hours(1)))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].group_name, "backfilled");
    }
}
