// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `script_logs` table access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqhook_core::{LogCounts, LogEntry, LogLevel, LogPage, LogSink, MqhookError};
use rusqlite::params;

use crate::database::{Database, map_tr_err};

const INSERT_LOG: &str = "INSERT INTO script_logs
    (id, script_id, trigger_type, level, message, context, execution_time_ms, created_at_us)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// Raw row, decoded outside the connection thread.
struct LogRow {
    id: String,
    script_id: String,
    trigger_type: String,
    level: String,
    message: String,
    context: Option<String>,
    execution_time_ms: i64,
    created_at_us: i64,
}

impl LogRow {
    fn from_entry(entry: &LogEntry) -> Result<Self, MqhookError> {
        let context = entry
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(MqhookError::storage)?;
        Ok(Self {
            id: entry.id.clone(),
            script_id: entry.script_id.clone(),
            trigger_type: entry.trigger_type.to_string(),
            level: entry.level.to_string(),
            message: entry.message.clone(),
            context,
            execution_time_ms: i64::try_from(entry.execution_time_ms).unwrap_or(i64::MAX),
            created_at_us: entry.created_at.timestamp_micros(),
        })
    }

    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            script_id: row.get(1)?,
            trigger_type: row.get(2)?,
            level: row.get(3)?,
            message: row.get(4)?,
            context: row.get(5)?,
            execution_time_ms: row.get(6)?,
            created_at_us: row.get(7)?,
        })
    }

    fn insert(&self, stmt: &mut rusqlite::CachedStatement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.id,
            self.script_id,
            self.trigger_type,
            self.level,
            self.message,
            self.context,
            self.execution_time_ms,
            self.created_at_us
        ])
    }

    fn into_entry(self) -> Result<LogEntry, MqhookError> {
        let created_at = DateTime::from_timestamp_micros(self.created_at_us).ok_or_else(|| {
            MqhookError::storage_msg(format!("log {} has invalid timestamp", self.id))
        })?;
        Ok(LogEntry {
            id: self.id,
            script_id: self.script_id,
            trigger_type: self.trigger_type.parse().map_err(MqhookError::storage)?,
            level: self.level.parse().map_err(MqhookError::storage)?,
            message: self.message,
            context: self
                .context
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(MqhookError::storage)?,
            execution_time_ms: u64::try_from(self.execution_time_ms).unwrap_or(0),
            created_at,
        })
    }
}

/// Log sink over the `script_logs` table.
pub struct SqliteLogSink {
    db: Database,
}

impl SqliteLogSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LogSink for SqliteLogSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_log_entry(&self, entry: &LogEntry) -> Result<(), MqhookError> {
        let row = LogRow::from_entry(entry)?;
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(INSERT_LOG)?;
                row.insert(&mut stmt)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn create_log_entries(&self, entries: &[LogEntry]) -> Result<(), MqhookError> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows = entries
            .iter()
            .map(LogRow::from_entry)
            .collect::<Result<Vec<_>, _>>()?;
        self.db
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached(INSERT_LOG)?;
                    for row in &rows {
                        row.insert(&mut stmt)?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn list_logs(
        &self,
        script_id: &str,
        page: u32,
        page_size: u32,
        level: Option<LogLevel>,
    ) -> Result<LogPage, MqhookError> {
        let (page, page_size) = LogPage::normalize(page, page_size);
        let offset = i64::try_from(LogPage::offset(page, page_size)).unwrap_or(i64::MAX);
        let limit = i64::from(page_size);
        let script = script_id.to_string();
        let level = level.map(|l| l.to_string());

        let (rows, total) = self
            .db
            .conn()
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM script_logs
                     WHERE script_id = ?1 AND (?2 IS NULL OR level = ?2)",
                    params![script, level],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare_cached(
                    "SELECT id, script_id, trigger_type, level, message, context,
                            execution_time_ms, created_at_us
                     FROM script_logs
                     WHERE script_id = ?1 AND (?2 IS NULL OR level = ?2)
                     ORDER BY created_at_us DESC, rowid DESC
                     LIMIT ?3 OFFSET ?4",
                )?;
                let rows = stmt
                    .query_map(params![script, level, limit, offset], LogRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((rows, total))
            })
            .await
            .map_err(map_tr_err)?;

        Ok(LogPage {
            entries: rows
                .into_iter()
                .map(LogRow::into_entry)
                .collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or(0),
            page,
            page_size,
        })
    }

    async fn clear_logs(&self, script_id: &str) -> Result<u64, MqhookError> {
        let script = script_id.to_string();
        let removed = self
            .db
            .conn()
            .call(move |conn| conn.execute("DELETE FROM script_logs WHERE script_id = ?1", params![script]))
            .await
            .map_err(map_tr_err)?;
        Ok(removed as u64)
    }

    async fn clear_logs_before(
        &self,
        script_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MqhookError> {
        let script = script_id.to_string();
        let cutoff_us = cutoff.timestamp_micros();
        let removed = self
            .db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM script_logs WHERE script_id = ?1 AND created_at_us < ?2",
                    params![script, cutoff_us],
                )
            })
            .await
            .map_err(map_tr_err)?;
        Ok(removed as u64)
    }

    async fn clear_all_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MqhookError> {
        let cutoff_us = cutoff.timestamp_micros();
        let removed = self
            .db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM script_logs WHERE created_at_us < ?1",
                    params![cutoff_us],
                )
            })
            .await
            .map_err(map_tr_err)?;
        Ok(removed as u64)
    }

    async fn count_by_level(&self, script_id: Option<&str>) -> Result<LogCounts, MqhookError> {
        let script = script_id.map(str::to_string);
        let rows: Vec<(String, i64)> = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT level, COUNT(*) FROM script_logs
                     WHERE ?1 IS NULL OR script_id = ?1
                     GROUP BY level",
                )?;
                let rows = stmt.query_map(params![script], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await
            .map_err(map_tr_err)?;

        let mut counts = LogCounts::new();
        for (level, count) in rows {
            let level: LogLevel = level.parse().map_err(MqhookError::storage)?;
            counts.insert(level, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}
