// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Script state storage for mqhook.
//!
//! [`StateStore`] is an in-memory, lock-sharded mirror of durable state.
//! Script reads and writes only touch the cache; a background task started
//! with [`spawn_flusher`] writes dirty entries to the [`StateBackend`] and
//! sweeps expired ones.
//!
//! [`StateBackend`]: mqhook_core::StateBackend

pub mod flush;
pub mod memory;
pub mod store;

pub use flush::spawn_flusher;
pub use memory::MemoryBackend;
pub use store::{PurgeStats, StateStore};
