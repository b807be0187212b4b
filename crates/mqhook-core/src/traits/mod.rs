// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Traits implemented by durable backends and broker-side collaborators.
//!
//! Async traits use `#[async_trait]` so they can be held as `Arc<dyn _>`.

pub mod catalog;
pub mod logs;
pub mod publisher;
pub mod state;

pub use catalog::ScriptCatalog;
pub use logs::LogSink;
pub use publisher::MessagePublisher;
pub use state::StateBackend;
