// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcome of a single script execution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mqhook_core::{LogLevel, OutboundMessage, TriggerType};
use serde::Serialize;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Why an execution failed.
///
/// These never escape the runtime as errors; they are carried inside
/// [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The source did not parse. Detected before anything runs.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// An uncaught error raised while the script was running.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The wall-clock limit elapsed before the script finished.
    #[error("execution timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The script let a publish quota error go uncaught.
    #[error("publish quota exceeded: at most {limit} publishes per execution")]
    QuotaExceeded { limit: u32 },

    /// An internal fault in the interpreter, recovered at the execution boundary.
    #[error("internal fault: {0}")]
    Panic(String),
}

/// Coarse classification of an [`ExecutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Compilation,
    Runtime,
    Timeout,
    QuotaExceeded,
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compilation(_) => ErrorKind::Compilation,
            Self::Runtime(_) | Self::Panic(_) => ErrorKind::Runtime,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
        }
    }

    /// The terminal state this error puts an execution in.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Compilation(_) => ExecutionStatus::CompileFailed,
            Self::Timeout(_) => ExecutionStatus::TimedOut,
            Self::Panic(_) => ExecutionStatus::Panicked,
            Self::Runtime(_) | Self::QuotaExceeded { .. } => ExecutionStatus::Failed,
        }
    }
}

/// Terminal state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    CompileFailed,
    TimedOut,
    Failed,
    Panicked,
}

/// A log call made by the script, in call order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedLog {
    pub level: LogLevel,
    pub message: String,
    pub context: Option<serde_json::Value>,
    /// Time since the execution started.
    pub elapsed: Duration,
}

/// Everything one execution produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub script_id: String,
    pub trigger_type: TriggerType,
    pub status: ExecutionStatus,
    pub success: bool,
    #[serde(serialize_with = "error_text")]
    pub error: Option<ExecutionError>,
    pub logs: Vec<CapturedLog>,
    /// Log calls discarded after the per-execution capture limit.
    pub dropped_logs: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Publishes accepted by the broker.
    pub publishes: u32,
}

fn error_text<S: serde::Serializer>(
    error: &Option<ExecutionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ExecutionResult {
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Result of a test execution: nothing was persisted and nothing reached
/// the broker.
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub result: ExecutionResult,
    pub published: Vec<OutboundMessage>,
}
