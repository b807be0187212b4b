// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the mqhook script engine.

use thiserror::Error;

/// The error type used across backend traits and engine operations.
///
/// Failures of an individual script run are not reported through this type;
/// they are classified per execution and carried inside the execution result.
#[derive(Debug, Error)]
pub enum MqhookError {
    /// Configuration errors (invalid TOML, bad values, duplicate script ids).
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable storage failures (SQLite, redb, serialization of stored values).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Script-level failures surfaced outside of an execution (e.g. compile checks).
    #[error("script error: {message}")]
    Script {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The outbound publish path rejected a message.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A looked-up entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller supplied an invalid argument (bad topic, bad script id, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The engine is shutting down and no longer accepts work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MqhookError {
    /// Wraps any error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MqhookError::Storage {
            source: Box::new(err),
        }
    }

    /// Storage failure with only a message.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        MqhookError::Storage {
            source: message.into(),
        }
    }
}
