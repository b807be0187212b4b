// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event-triggered script engine for mqhook.
//!
//! The broker hands lifecycle events to [`ScriptEngine::execute_for_trigger`];
//! the engine resolves matching scripts and runs each in the sandbox
//! concurrently. It also owns the background state flush, TTL sweep and log
//! retention, and exposes the admin queries an API layer needs.

pub mod admin;
pub mod catalog;
pub mod engine;
pub mod observer;
pub mod publisher;
pub mod recording;
pub mod resolve;
pub mod retention;
pub mod shutdown;

pub use admin::PurgeReport;
pub use catalog::MemoryCatalog;
pub use engine::{Dispatch, EngineBuilder, ScriptEngine, ShutdownReport};
pub use observer::{ExecutionObserver, NoopObserver, SkipReason};
pub use publisher::ChannelPublisher;
pub use recording::register_metrics;
pub use shutdown::install_signal_handler;
