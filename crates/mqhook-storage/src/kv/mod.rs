// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! redb-backed ordered key/value storage.
//!
//! State lives in `script_state` under `script:<id>:<key>` and
//! `global:<key>`; logs live in `script_logs` under
//! `log:<id>:<timestamp_ns>`, with a time-ordered index alongside for
//! retention. Enumeration and deletion are all range scans. redb calls
//! block, so every operation runs on the blocking pool.

mod logs;
mod state;

use std::path::Path;
use std::sync::Arc;

use mqhook_core::MqhookError;
use redb::{Database, ReadableTableMetadata, TableDefinition};
use thiserror::Error;
use tracing::info;

pub use logs::KvLogSink;
pub use state::KvStateBackend;

pub(crate) const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("script_state");
pub(crate) const LOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("script_logs");
pub(crate) const LOG_TIME_INDEX: TableDefinition<&str, ()> =
    TableDefinition::new("script_logs_by_time");

/// Failures inside a blocking redb closure.
#[derive(Debug, Error)]
pub(crate) enum KvError {
    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),
    #[error(transparent)]
    Table(#[from] redb::TableError),
    #[error(transparent)]
    Storage(#[from] redb::StorageError),
    #[error(transparent)]
    Commit(#[from] redb::CommitError),
    #[error("undecodable record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Shared handle to one redb file. Clone it to build both backends.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Opens or creates the database file and its tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MqhookError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(MqhookError::storage)?;
        }
        let db = Database::create(path).map_err(MqhookError::storage)?;
        create_tables(&db).map_err(|e| MqhookError::storage_msg(e.to_string()))?;
        info!(path = %path.display(), "redb database opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Runs `f` against the database on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T, MqhookError>
    where
        F: FnOnce(&Database) -> Result<T, KvError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            f(&db).map_err(|e| MqhookError::storage_msg(e.to_string()))
        })
        .await
        .map_err(|e| MqhookError::Internal(format!("redb task failed: {e}")))?
    }
}

fn create_tables(db: &Database) -> Result<(), KvError> {
    let txn = db.begin_write()?;
    {
        txn.open_table(STATE_TABLE)?;
        let logs = txn.open_table(LOG_TABLE)?;
        let mut index = txn.open_table(LOG_TIME_INDEX)?;
        if index.is_empty()? && !logs.is_empty()? {
            let rebuilt = logs::rebuild_time_index(&logs, &mut index)?;
            info!(entries = rebuilt, "log time index rebuilt");
        }
    }
    txn.commit()?;
    Ok(())
}

/// Smallest string greater than every string starting with `prefix`.
pub(crate) fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.to_string();
    match end.pop() {
        Some(last) => {
            end.push(char::from_u32(last as u32 + 1).unwrap_or(char::MAX));
            end
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_bounds_prefix() {
        assert_eq!(prefix_end("script:a:"), "script:a;");
        assert!("script:a:zzz" < prefix_end("script:a:").as_str());
        assert!("script:a;" >= prefix_end("script:a:").as_str());
    }
}
