// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage for mqhook.
//!
//! Two interchangeable backends implement both [`StateBackend`] and
//! [`LogSink`]:
//!
//! - [`sqlite`]: relational tables behind a single `tokio-rusqlite` writer thread.
//! - [`kv`]: an ordered redb key space using `script:<id>:` / `log:<id>:` prefixes.
//!
//! [`open_backends`] picks one from configuration.
//!
//! [`StateBackend`]: mqhook_core::StateBackend
//! [`LogSink`]: mqhook_core::LogSink

pub mod backends;
pub mod database;
pub mod kv;
pub mod migrations;
pub mod sqlite;

pub use backends::{Backends, open_backends};
pub use database::Database;
pub use kv::{KvLogSink, KvStateBackend, KvStore};
pub use sqlite::{SqliteLogSink, SqliteStateBackend};
