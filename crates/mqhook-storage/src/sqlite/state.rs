// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `script_state` table access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqhook_core::{MqhookError, StateBackend, StateBatch, StateRecord, StateScope};
use rusqlite::params;

use crate::database::{Database, map_tr_err};

type StateRow = (String, String, String, Option<i64>);

/// State backend over the `script_state` table, one row per (scope, key).
pub struct SqliteStateBackend {
    db: Database,
}

impl SqliteStateBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_record((scope, key, value, expires_at_ms): StateRow) -> Result<StateRecord, MqhookError> {
    Ok(StateRecord {
        scope: scope.parse()?,
        key,
        value: serde_json::from_str(&value).map_err(MqhookError::storage)?,
        expires_at: expires_at_ms.and_then(DateTime::from_timestamp_millis),
    })
}

#[async_trait]
impl StateBackend for SqliteStateBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load_all(&self) -> Result<Vec<StateRecord>, MqhookError> {
        let now_ms = Utc::now().timestamp_millis();
        let rows: Vec<StateRow> = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT scope, key, value, expires_at_ms FROM script_state
                     WHERE expires_at_ms IS NULL OR expires_at_ms > ?1",
                )?;
                let rows = stmt.query_map(params![now_ms], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await
            .map_err(map_tr_err)?;
        rows.into_iter().map(row_to_record).collect()
    }

    async fn apply(&self, batch: StateBatch) -> Result<(), MqhookError> {
        let now_ms = Utc::now().timestamp_millis();
        let upserts = batch
            .upserts
            .iter()
            .map(|r| {
                Ok((
                    r.scope.to_string(),
                    r.key.clone(),
                    serde_json::to_string(&r.value).map_err(MqhookError::storage)?,
                    r.expires_at.map(|at| at.timestamp_millis()),
                ))
            })
            .collect::<Result<Vec<StateRow>, MqhookError>>()?;
        let deletes: Vec<(String, String)> = batch
            .deletes
            .iter()
            .map(|(scope, key)| (scope.to_string(), key.clone()))
            .collect();

        self.db
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut upsert = tx.prepare_cached(
                        "INSERT INTO script_state (scope, key, value, expires_at_ms, updated_at_ms)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT (scope, key) DO UPDATE SET
                             value = excluded.value,
                             expires_at_ms = excluded.expires_at_ms,
                             updated_at_ms = excluded.updated_at_ms",
                    )?;
                    for (scope, key, value, expires_at_ms) in &upserts {
                        upsert.execute(params![scope, key, value, expires_at_ms, now_ms])?;
                    }
                    let mut delete =
                        tx.prepare_cached("DELETE FROM script_state WHERE scope = ?1 AND key = ?2")?;
                    for (scope, key) in &deletes {
                        delete.execute(params![scope, key])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn delete_scope(&self, scope: &StateScope) -> Result<u64, MqhookError> {
        let scope = scope.to_string();
        let removed = self
            .db
            .conn()
            .call(move |conn| conn.execute("DELETE FROM script_state WHERE scope = ?1", params![scope]))
            .await
            .map_err(map_tr_err)?;
        Ok(removed as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, MqhookError> {
        let now_ms = now.timestamp_millis();
        let removed = self
            .db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM script_state WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
                    params![now_ms],
                )
            })
            .await
            .map_err(map_tr_err)?;
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;

    async fn backend() -> SqliteStateBackend {
        SqliteStateBackend::new(Database::open_in_memory().await.unwrap())
    }

    fn record(scope: StateScope, key: &str, value: serde_json::Value) -> StateRecord {
        StateRecord {
            scope,
            key: key.into(),
            value,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn apply_upserts_and_deletes() {
        let backend = backend().await;
        let a = StateScope::script("a");
        backend
            .apply(StateBatch {
                upserts: vec![
                    record(a.clone(), "n", json!(1)),
                    record(StateScope::Global, "g", json!({"x": [1, 2]})),
                ],
                deletes: vec![],
            })
            .await
            .unwrap();
        backend
            .apply(StateBatch {
                upserts: vec![record(a.clone(), "n", json!(2))],
                deletes: vec![(StateScope::Global, "g".into())],
            })
            .await
            .unwrap();

        let all = backend.load_all().await.unwrap();
        assert_eq!(all, vec![record(a, "n", json!(2))]);
    }

    #[tokio::test]
    async fn load_skips_and_purge_removes_expired() {
        let backend = backend().await;
        let past = Utc::now() - TimeDelta::seconds(10);
        let mut stale = record(StateScope::Global, "old", json!(1));
        stale.expires_at = Some(past);
        let fresh = record(StateScope::Global, "new", json!(2));
        backend
            .apply(StateBatch {
                upserts: vec![stale, fresh.clone()],
                deletes: vec![],
            })
            .await
            .unwrap();

        assert_eq!(backend.load_all().await.unwrap(), vec![fresh]);
        assert_eq!(backend.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(backend.purge_expired(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_scope_leaves_other_scopes() {
        let backend = backend().await;
        backend
            .apply(StateBatch {
                upserts: vec![
                    record(StateScope::script("a"), "x", json!(1)),
                    record(StateScope::script("a"), "y", json!(1)),
                    record(StateScope::script("ab"), "x", json!(1)),
                ],
                deletes: vec![],
            })
            .await
            .unwrap();
        assert_eq!(backend.delete_scope(&StateScope::script("a")).await.unwrap(), 2);
        let left = backend.load_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].scope, StateScope::script("ab"));
    }
}
