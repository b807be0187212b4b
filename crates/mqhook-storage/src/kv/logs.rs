// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log entries in the redb `script_logs` table.
//!
//! Keys are `log:<script_id>:<created_at_ns>` with the timestamp zero-padded
//! to 20 digits, so a script's entries sort by creation time and a reverse
//! range scan yields newest first. `script_logs_by_time` indexes every entry
//! as `<created_at_ns>:<log key>` so retention only visits expired rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqhook_core::{LogCounts, LogEntry, LogLevel, LogPage, LogSink, MqhookError};
use redb::{ReadableTable, Table};
use serde::Deserialize;

use super::{KvError, KvStore, LOG_TABLE, LOG_TIME_INDEX, prefix_end};

const LOG_PREFIX: &str = "log:";

pub(super) type LogTable<'t> = Table<'t, &'static str, &'static [u8]>;
pub(super) type TimeIndex<'t> = Table<'t, &'static str, ()>;

fn script_prefix(script_id: &str) -> String {
    format!("{LOG_PREFIX}{script_id}:")
}

fn nanos(at: DateTime<Utc>) -> u64 {
    at.timestamp_nanos_opt()
        .and_then(|ns| u64::try_from(ns).ok())
        .unwrap_or(0)
}

fn log_key(script_id: &str, stamp: u64) -> String {
    format!("{LOG_PREFIX}{script_id}:{stamp:020}")
}

fn key_stamp(key: &str) -> Option<u64> {
    key.rsplit(':').next()?.parse().ok()
}

fn index_key(stamp: u64, key: &str) -> String {
    format!("{stamp:020}:{key}")
}

/// Only the level, for counting without decoding whole entries.
#[derive(Deserialize)]
struct LevelOnly {
    level: LogLevel,
}

/// Inserts under the entry's timestamp, moving to the next free nanosecond on collision.
fn insert_entry(
    logs: &mut LogTable<'_>,
    index: &mut TimeIndex<'_>,
    entry: &LogEntry,
    bytes: &[u8],
) -> Result<(), KvError> {
    let mut stamp = nanos(entry.created_at);
    let mut key = log_key(&entry.script_id, stamp);
    while logs.get(key.as_str())?.is_some() {
        stamp += 1;
        key = log_key(&entry.script_id, stamp);
    }
    logs.insert(key.as_str(), bytes)?;
    index.insert(index_key(stamp, &key).as_str(), ())?;
    Ok(())
}

/// Removes every log key in `[start, end)` along with its index row.
fn remove_range(
    logs: &mut LogTable<'_>,
    index: &mut TimeIndex<'_>,
    start: &str,
    end: &str,
) -> Result<u64, KvError> {
    let doomed = logs
        .range(start..end)?
        .map(|item| item.map(|(key, _)| key.value().to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    for key in &doomed {
        logs.remove(key.as_str())?;
        if let Some(stamp) = key_stamp(key) {
            index.remove(index_key(stamp, key).as_str())?;
        }
    }
    Ok(doomed.len() as u64)
}

/// Removes every entry created before `cutoff_ns`, across all scripts.
fn remove_older(
    logs: &mut LogTable<'_>,
    index: &mut TimeIndex<'_>,
    cutoff_ns: u64,
) -> Result<u64, KvError> {
    let end = format!("{cutoff_ns:020}");
    let doomed = index
        .range(..end.as_str())?
        .map(|item| item.map(|(key, _)| key.value().to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    for row in &doomed {
        index.remove(row.as_str())?;
        if let Some((_, key)) = row.split_once(':') {
            logs.remove(key)?;
        }
    }
    Ok(doomed.len() as u64)
}

/// Re-derives the time index from the log table. Returns the rows written.
pub(super) fn rebuild_time_index(
    logs: &LogTable<'_>,
    index: &mut TimeIndex<'_>,
) -> Result<u64, KvError> {
    let mut rebuilt = 0;
    for item in logs.iter()? {
        let (key, _) = item?;
        let key = key.value();
        if let Some(stamp) = key_stamp(key) {
            index.insert(index_key(stamp, key).as_str(), ())?;
            rebuilt += 1;
        }
    }
    Ok(rebuilt)
}

/// Log sink over redb.
pub struct KvLogSink {
    store: KvStore,
}

impl KvLogSink {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    async fn delete_range(&self, start: String, end: String) -> Result<u64, MqhookError> {
        self.store
            .run(move |db| {
                let txn = db.begin_write()?;
                let removed = {
                    let mut logs = txn.open_table(LOG_TABLE)?;
                    let mut index = txn.open_table(LOG_TIME_INDEX)?;
                    remove_range(&mut logs, &mut index, &start, &end)?
                };
                txn.commit()?;
                Ok(removed)
            })
            .await
    }
}

#[async_trait]
impl LogSink for KvLogSink {
    fn name(&self) -> &str {
        "redb"
    }

    async fn create_log_entry(&self, entry: &LogEntry) -> Result<(), MqhookError> {
        self.create_log_entries(std::slice::from_ref(entry)).await
    }

    async fn create_log_entries(&self, entries: &[LogEntry]) -> Result<(), MqhookError> {
        if entries.is_empty() {
            return Ok(());
        }
        let encoded = entries
            .iter()
            .map(|entry| {
                serde_json::to_vec(entry)
                    .map(|bytes| (entry.clone(), bytes))
                    .map_err(MqhookError::storage)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.store
            .run(move |db| {
                let txn = db.begin_write()?;
                {
                    let mut logs = txn.open_table(LOG_TABLE)?;
                    let mut index = txn.open_table(LOG_TIME_INDEX)?;
                    for (entry, bytes) in &encoded {
                        insert_entry(&mut logs, &mut index, entry, bytes)?;
                    }
                }
                txn.commit()?;
                Ok(())
            })
            .await
    }

    async fn list_logs(
        &self,
        script_id: &str,
        page: u32,
        page_size: u32,
        level: Option<LogLevel>,
    ) -> Result<LogPage, MqhookError> {
        let (page, page_size) = LogPage::normalize(page, page_size);
        let skip = LogPage::offset(page, page_size);
        let take = u64::from(page_size);
        let start = script_prefix(script_id);
        let end = prefix_end(&start);

        // Only entries inside the requested window are fully decoded.
        let (entries, total) = self
            .store
            .run(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(LOG_TABLE)?;
                let mut entries = Vec::new();
                let mut total = 0u64;
                for item in table.range(start.as_str()..end.as_str())?.rev() {
                    let (_, value) = item?;
                    if let Some(wanted) = level {
                        let LevelOnly { level: found } = serde_json::from_slice(value.value())?;
                        if found != wanted {
                            continue;
                        }
                    }
                    if total >= skip && (entries.len() as u64) < take {
                        entries.push(serde_json::from_slice::<LogEntry>(value.value())?);
                    }
                    total += 1;
                }
                Ok((entries, total))
            })
            .await?;

        Ok(LogPage {
            entries,
            total,
            page,
            page_size,
        })
    }

    async fn clear_logs(&self, script_id: &str) -> Result<u64, MqhookError> {
        let start = script_prefix(script_id);
        let end = prefix_end(&start);
        self.delete_range(start, end).await
    }

    async fn clear_logs_before(
        &self,
        script_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MqhookError> {
        let start = script_prefix(script_id);
        let end = log_key(script_id, nanos(cutoff));
        self.delete_range(start, end).await
    }

    async fn clear_all_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MqhookError> {
        let cutoff_ns = nanos(cutoff);
        self.store
            .run(move |db| {
                let txn = db.begin_write()?;
                let removed = {
                    let mut logs = txn.open_table(LOG_TABLE)?;
                    let mut index = txn.open_table(LOG_TIME_INDEX)?;
                    remove_older(&mut logs, &mut index, cutoff_ns)?
                };
                txn.commit()?;
                Ok(removed)
            })
            .await
    }

    async fn count_by_level(&self, script_id: Option<&str>) -> Result<LogCounts, MqhookError> {
        let start = script_id.map_or_else(|| LOG_PREFIX.to_string(), script_prefix);
        let end = prefix_end(&start);
        self.store
            .run(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(LOG_TABLE)?;
                let mut counts = LogCounts::new();
                for item in table.range(start.as_str()..end.as_str())? {
                    let (_, value) = item?;
                    let LevelOnly { level } = serde_json::from_slice(value.value())?;
                    *counts.entry(level).or_default() += 1;
                }
                Ok(counts)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use mqhook_core::TriggerType;
    use redb::ReadableTableMetadata;

    use super::*;

    fn sink(dir: &tempfile::TempDir) -> KvLogSink {
        KvLogSink::new(KvStore::open(dir.path().join("logs.redb")).unwrap())
    }

    fn index_rows(sink: &KvLogSink) -> u64 {
        let txn = sink.store.db.begin_read().unwrap();
        txn.open_table(LOG_TIME_INDEX).unwrap().len().unwrap()
    }

    fn entry(script: &str, level: LogLevel, message: &str, age_secs: i64) -> LogEntry {
        LogEntry::new(script, TriggerType::OnConnect, level, message)
            .with_created_at(Utc::now() - TimeDelta::seconds(age_secs))
    }

    #[tokio::test]
    async fn same_timestamp_entries_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        let at = Utc::now();
        let a = entry("s", LogLevel::Info, "a", 0).with_created_at(at);
        let b = entry("s", LogLevel::Info, "b", 0).with_created_at(at);
        sink.create_log_entries(&[a, b]).await.unwrap();
        let page = sink.list_logs("s", 1, 10, None).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries[0].message, "b");
    }

    #[tokio::test]
    async fn prefix_scan_does_not_leak_between_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.create_log_entry(&entry("a", LogLevel::Info, "mine", 1))
            .await
            .unwrap();
        sink.create_log_entry(&entry("ab", LogLevel::Info, "theirs", 1))
            .await
            .unwrap();
        let page = sink.list_logs("a", 1, 10, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].message, "mine");
    }

    #[tokio::test]
    async fn paging_filtering_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.create_log_entries(&[
            entry("s", LogLevel::Debug, "d", 4),
            entry("s", LogLevel::Error, "e1", 3),
            entry("s", LogLevel::Info, "i", 2),
            entry("s", LogLevel::Error, "e2", 1),
            entry("t", LogLevel::Warn, "w", 1),
        ])
        .await
        .unwrap();

        let page = sink.list_logs("s", 2, 2, None).await.unwrap();
        assert_eq!(page.total, 4);
        let messages: Vec<&str> = page.entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e1", "d"]);

        let errors = sink.list_logs("s", 1, 10, Some(LogLevel::Error)).await.unwrap();
        assert_eq!(errors.total, 2);
        assert_eq!(errors.entries[0].message, "e2");

        let counts = sink.count_by_level(Some("s")).await.unwrap();
        assert_eq!(counts[&LogLevel::Error], 2);
        assert_eq!(counts[&LogLevel::Debug], 1);
        let all = sink.count_by_level(None).await.unwrap();
        assert_eq!(all[&LogLevel::Warn], 1);
    }

    #[tokio::test]
    async fn age_based_clearing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.create_log_entries(&[
            entry("s", LogLevel::Info, "old", 100),
            entry("s", LogLevel::Info, "new", 1),
            entry("t", LogLevel::Info, "old", 100),
            entry("t", LogLevel::Info, "new", 1),
        ])
        .await
        .unwrap();

        let cutoff = Utc::now() - TimeDelta::seconds(50);
        assert_eq!(sink.clear_logs_before("s", cutoff).await.unwrap(), 1);
        assert_eq!(sink.clear_all_before(cutoff).await.unwrap(), 1);
        assert_eq!(sink.clear_logs("t").await.unwrap(), 1);
        let left = sink.list_logs("s", 1, 10, None).await.unwrap();
        assert_eq!(left.entries.len(), 1);
        assert_eq!(left.entries[0].message, "new");
    }

    #[tokio::test]
    async fn retention_walks_the_time_index() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.create_log_entries(&[
            entry("a", LogLevel::Info, "old", 100),
            entry("b", LogLevel::Info, "old", 90),
            entry("a", LogLevel::Info, "new", 1),
        ])
        .await
        .unwrap();
        assert_eq!(index_rows(&sink), 3);

        let cutoff = Utc::now() - TimeDelta::seconds(50);
        assert_eq!(sink.clear_all_before(cutoff).await.unwrap(), 2);
        assert_eq!(index_rows(&sink), 1);
        assert_eq!(sink.list_logs("b", 1, 10, None).await.unwrap().total, 0);

        assert_eq!(sink.clear_logs("a").await.unwrap(), 1);
        assert_eq!(index_rows(&sink), 0);
    }

    #[tokio::test]
    async fn page_window_alone_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.create_log_entries(&[
            entry("s", LogLevel::Info, "one", 3),
            entry("s", LogLevel::Info, "two", 2),
            entry("s", LogLevel::Info, "three", 1),
        ])
        .await
        .unwrap();
        {
            let txn = sink.store.db.begin_write().unwrap();
            {
                let mut logs = txn.open_table(LOG_TABLE).unwrap();
                logs.insert(log_key("s", 1).as_str(), b"not json".as_slice())
                    .unwrap();
            }
            txn.commit().unwrap();
        }

        let first = sink.list_logs("s", 1, 3, None).await.unwrap();
        assert_eq!(first.total, 4);
        let messages: Vec<&str> = first.entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two", "one"]);
        assert!(sink.list_logs("s", 2, 3, None).await.is_err());
    }

    #[tokio::test]
    async fn time_index_is_rebuilt_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = sink(&dir);
            sink.create_log_entries(&[
                entry("s", LogLevel::Info, "old", 100),
                entry("s", LogLevel::Info, "new", 1),
            ])
            .await
            .unwrap();
            let txn = sink.store.db.begin_write().unwrap();
            txn.delete_table(LOG_TIME_INDEX).unwrap();
            txn.commit().unwrap();
        }

        let sink = sink(&dir);
        assert_eq!(index_rows(&sink), 2);
        let cutoff = Utc::now() - TimeDelta::seconds(50);
        assert_eq!(sink.clear_all_before(cutoff).await.unwrap(), 1);
    }
}
