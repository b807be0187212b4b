// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution log persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MqhookError;
use crate::log::{LogCounts, LogEntry, LogLevel, LogPage};

/// Durable sink for execution log entries.
///
/// Retrieval is newest first. Entries are never updated, only removed by an
/// explicit clear or the retention sweep.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn create_log_entry(&self, entry: &LogEntry) -> Result<(), MqhookError>;

    /// Writes several entries, preserving their order.
    async fn create_log_entries(&self, entries: &[LogEntry]) -> Result<(), MqhookError> {
        for entry in entries {
            self.create_log_entry(entry).await?;
        }
        Ok(())
    }

    /// Returns one page of a script's entries, optionally filtered by level.
    async fn list_logs(
        &self,
        script_id: &str,
        page: u32,
        page_size: u32,
        level: Option<LogLevel>,
    ) -> Result<LogPage, MqhookError>;

    /// Deletes every entry for a script.
    async fn clear_logs(&self, script_id: &str) -> Result<u64, MqhookError>;

    /// Deletes a script's entries created strictly before `cutoff`.
    async fn clear_logs_before(
        &self,
        script_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MqhookError>;

    /// Deletes every script's entries created strictly before `cutoff`.
    async fn clear_all_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MqhookError>;

    /// Entry counts per level, for one script or for all of them.
    async fn count_by_level(&self, script_id: Option<&str>) -> Result<LogCounts, MqhookError>;
}
