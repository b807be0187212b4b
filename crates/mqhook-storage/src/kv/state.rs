// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! State records in the redb `script_state` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqhook_core::{MqhookError, StateBackend, StateBatch, StateRecord, StateScope};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use super::{KvStore, STATE_TABLE, prefix_end};

/// Stored value. Scope and key are recovered from the namespaced table key.
#[derive(Serialize, Deserialize)]
struct StoredValue {
    value: serde_json::Value,
    #[serde(default)]
    expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// State backend keyed by `script:<id>:<key>` / `global:<key>`.
pub struct KvStateBackend {
    store: KvStore,
}

impl KvStateBackend {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StateBackend for KvStateBackend {
    fn name(&self) -> &str {
        "redb"
    }

    async fn load_all(&self) -> Result<Vec<StateRecord>, MqhookError> {
        let now_ms = Utc::now().timestamp_millis();
        self.store
            .run(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(STATE_TABLE)?;
                let mut records = Vec::new();
                for item in table.iter()? {
                    let (key, value) = item?;
                    let stored: StoredValue = serde_json::from_slice(value.value())?;
                    if stored.expired(now_ms) {
                        continue;
                    }
                    let Some((scope, key)) = StateScope::split_namespaced(key.value()) else {
                        continue;
                    };
                    records.push(StateRecord {
                        scope,
                        key,
                        value: stored.value,
                        expires_at: stored.expires_at_ms.and_then(DateTime::from_timestamp_millis),
                    });
                }
                Ok(records)
            })
            .await
    }

    async fn apply(&self, batch: StateBatch) -> Result<(), MqhookError> {
        let upserts = batch
            .upserts
            .iter()
            .map(|r| {
                let stored = StoredValue {
                    value: r.value.clone(),
                    expires_at_ms: r.expires_at.map(|at| at.timestamp_millis()),
                };
                serde_json::to_vec(&stored)
                    .map(|bytes| (r.scope.namespaced_key(&r.key), bytes))
                    .map_err(MqhookError::storage)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let deletes: Vec<String> = batch
            .deletes
            .iter()
            .map(|(scope, key)| scope.namespaced_key(key))
            .collect();

        self.store
            .run(move |db| {
                let txn = db.begin_write()?;
                {
                    let mut table = txn.open_table(STATE_TABLE)?;
                    for key in &deletes {
                        table.remove(key.as_str())?;
                    }
                    for (key, bytes) in &upserts {
                        table.insert(key.as_str(), bytes.as_slice())?;
                    }
                }
                txn.commit()?;
                Ok(())
            })
            .await
    }

    async fn delete_scope(&self, scope: &StateScope) -> Result<u64, MqhookError> {
        let start = scope.prefix();
        let end = prefix_end(&start);
        self.store
            .run(move |db| {
                let txn = db.begin_write()?;
                let removed = {
                    let mut table = txn.open_table(STATE_TABLE)?;
                    let keys = table
                        .range(start.as_str()..end.as_str())?
                        .map(|item| item.map(|(key, _)| key.value().to_string()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for key in &keys {
                        table.remove(key.as_str())?;
                    }
                    keys.len() as u64
                };
                txn.commit()?;
                Ok(removed)
            })
            .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, MqhookError> {
        let now_ms = now.timestamp_millis();
        self.store
            .run(move |db| {
                let txn = db.begin_write()?;
                let removed = {
                    let mut table = txn.open_table(STATE_TABLE)?;
                    let mut expired = Vec::new();
                    for item in table.iter()? {
                        let (key, value) = item?;
                        let stored: StoredValue = serde_json::from_slice(value.value())?;
                        if stored.expired(now_ms) {
                            expired.push(key.value().to_string());
                        }
                    }
                    for key in &expired {
                        table.remove(key.as_str())?;
                    }
                    expired.len() as u64
                };
                txn.commit()?;
                Ok(removed)
            })
            .await
    }
}
