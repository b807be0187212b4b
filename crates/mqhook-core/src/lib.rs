// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the mqhook script engine.
//!
//! This crate holds the data model shared by every other crate in the
//! workspace (scripts, triggers, events, state and log records), the
//! [`MqhookError`] type, MQTT topic matching, and the traits that durable
//! backends and broker-side collaborators implement.

pub mod error;
pub mod log;
pub mod state;
pub mod topic;
pub mod traits;
pub mod types;

pub use error::MqhookError;
pub use log::{LogCounts, LogEntry, LogLevel, LogPage};
pub use state::{StateBatch, StateKey, StateRecord, StateScope};
pub use traits::{LogSink, MessagePublisher, ScriptCatalog, StateBackend};
pub use types::{Event, OutboundMessage, Script, Trigger, TriggerType, validate_script_id};
