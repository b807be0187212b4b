// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandboxed script runtime for mqhook.
//!
//! Scripts are Rhai programs run one per event, each in a fresh interpreter
//! with no filesystem, network or process access. The only host surface is
//! logging, scoped state, and a quota-limited `mqtt.publish`.

mod capture;
pub mod host;
pub mod record;
pub mod result;
pub mod runtime;

pub use host::MAX_CAPTURED_LOGS;
pub use record::log_entries;
pub use result::{CapturedLog, ErrorKind, ExecutionError, ExecutionResult, ExecutionStatus, TestRun};
pub use runtime::{RuntimeLimits, ScriptRuntime};
