// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning an execution result into log sink entries.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mqhook_core::{LogEntry, LogLevel, LogSink};
use serde_json::json;
use tracing::warn;

use crate::result::ExecutionResult;

fn at(started_at: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    started_at + TimeDelta::from_std(elapsed).unwrap_or_default()
}

/// Entries for one execution: every captured log in call order, then a
/// notice for dropped logs, then one summary entry if the run failed.
pub fn log_entries(result: &ExecutionResult) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = result
        .logs
        .iter()
        .map(|log| {
            LogEntry::new(
                result.script_id.as_str(),
                result.trigger_type,
                log.level,
                log.message.as_str(),
            )
            .with_context(log.context.clone())
            .with_execution_time_ms(log.elapsed.as_millis() as u64)
            .with_created_at(at(result.started_at, log.elapsed))
        })
        .collect();

    let finished_at = at(result.started_at, result.duration);
    let duration_ms = result.duration.as_millis() as u64;

    if result.dropped_logs > 0 {
        entries.push(
            LogEntry::new(
                result.script_id.as_str(),
                result.trigger_type,
                LogLevel::Warn,
                format!("{} log entries dropped", result.dropped_logs),
            )
            .with_execution_time_ms(duration_ms)
            .with_created_at(finished_at),
        );
    }

    if let Some(error) = &result.error {
        entries.push(
            LogEntry::new(
                result.script_id.as_str(),
                result.trigger_type,
                LogLevel::Error,
                format!("execution failed: {error}"),
            )
            .with_context(Some(json!({
                "status": result.status.as_ref(),
                "kind": error.kind().as_ref(),
            })))
            .with_execution_time_ms(duration_ms)
            .with_created_at(finished_at),
        );
    }
    entries
}

/// Writes the entries for `result`. Sink failures are logged and swallowed.
pub async fn record(logs: &dyn LogSink, result: &ExecutionResult) {
    let entries = log_entries(result);
    if entries.is_empty() {
        return;
    }
    if let Err(e) = logs.create_log_entries(&entries).await {
        warn!(
            script_id = %result.script_id,
            entries = entries.len(),
            error = %e,
            "failed to record execution logs"
        );
    }
}
