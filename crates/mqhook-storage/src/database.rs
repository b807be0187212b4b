// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite connection management.
//!
//! Every statement runs on `tokio-rusqlite`'s single background thread, so a
//! `Database` is the one writer for its file.

use std::path::Path;
use std::time::Duration;

use mqhook_core::MqhookError;
use tokio_rusqlite::Connection;
use tracing::info;

use crate::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> MqhookError {
    MqhookError::Storage {
        source: Box::new(e),
    }
}

/// An open, migrated SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, MqhookError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(MqhookError::storage)?;
        }
        let conn = Connection::open(path).await.map_err(MqhookError::storage)?;
        let db = Self::init(conn, wal_mode).await?;
        info!(path, wal_mode, "sqlite database opened");
        Ok(db)
    }

    /// Private in-memory database, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, MqhookError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(MqhookError::storage)?;
        Self::init(conn, false).await
    }

    async fn init(conn: Connection, wal_mode: bool) -> Result<Self, MqhookError> {
        conn.call(move |conn| -> Result<(), MqhookError> {
            if wal_mode {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })
                .map_err(MqhookError::storage)?;
            }
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(MqhookError::storage)?;
            conn.busy_timeout(BUSY_TIMEOUT)
                .map_err(MqhookError::storage)?;
            migrations::run_migrations(conn)
        })
        .await
        .map_err(|e| MqhookError::storage_msg(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection, waiting for queued statements.
    pub async fn close(self) -> Result<(), MqhookError> {
        self.conn.close().await.map_err(MqhookError::storage)
    }
}
