// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backend selection from configuration.

use std::sync::Arc;

use mqhook_config::{StorageBackendKind, StorageConfig};
use mqhook_core::{LogSink, MqhookError, StateBackend};
use tracing::info;

use crate::database::Database;
use crate::kv::{KvLogSink, KvStateBackend, KvStore};
use crate::sqlite::{SqliteLogSink, SqliteStateBackend};

/// The state backend and log sink, sharing one underlying database.
#[derive(Clone)]
pub struct Backends {
    pub state: Arc<dyn StateBackend>,
    pub logs: Arc<dyn LogSink>,
}

/// Opens the configured backend, creating files and schema as needed.
pub async fn open_backends(config: &StorageConfig) -> Result<Backends, MqhookError> {
    let backends = match config.backend {
        StorageBackendKind::Sqlite => {
            let db = Database::open(&config.database_path, config.wal_mode).await?;
            Backends {
                state: Arc::new(SqliteStateBackend::new(db.clone())),
                logs: Arc::new(SqliteLogSink::new(db)),
            }
        }
        StorageBackendKind::Redb => {
            let store = KvStore::open(&config.redb_path)?;
            Backends {
                state: Arc::new(KvStateBackend::new(store.clone())),
                logs: Arc::new(KvLogSink::new(store)),
            }
        }
    };
    info!(
        state = backends.state.name(),
        logs = backends.logs.name(),
        "storage backends ready"
    );
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use mqhook_core::{LogEntry, LogLevel, StateBatch, StateRecord, StateScope, TriggerType};

    use super::*;

    fn config(dir: &tempfile::TempDir, backend: StorageBackendKind) -> StorageConfig {
        StorageConfig {
            backend,
            database_path: dir.path().join("mqhook.db").display().to_string(),
            redb_path: dir.path().join("mqhook.redb").display().to_string(),
            wal_mode: true,
        }
    }

    async fn exercise(backends: &Backends) {
        let mut batch = StateBatch::default();
        batch.upserts.push(StateRecord {
            scope: StateScope::Global,
            key: "k".into(),
            value: serde_json::json!(1),
            expires_at: None,
        });
        backends.state.apply(batch).await.unwrap();
        assert_eq!(backends.state.load_all().await.unwrap().len(), 1);

        let entry = LogEntry::new("s", TriggerType::OnPublish, LogLevel::Info, "hello");
        backends.logs.create_log_entry(&entry).await.unwrap();
        let page = backends.logs.list_logs("s", 1, 10, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].id, entry.id);
    }

    #[tokio::test]
    async fn opens_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let backends = open_backends(&config(&dir, StorageBackendKind::Sqlite))
            .await
            .unwrap();
        assert_eq!(backends.state.name(), "sqlite");
        exercise(&backends).await;
    }

    #[tokio::test]
    async fn opens_redb() {
        let dir = tempfile::tempdir().unwrap();
        let backends = open_backends(&config(&dir, StorageBackendKind::Redb))
            .await
            .unwrap();
        assert_eq!(backends.logs.name(), "redb");
        exercise(&backends).await;
    }
}
