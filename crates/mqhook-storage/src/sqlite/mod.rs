// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementations of the state backend and log sink.

mod logs;
mod state;

pub use logs::SqliteLogSink;
pub use state::SqliteStateBackend;
