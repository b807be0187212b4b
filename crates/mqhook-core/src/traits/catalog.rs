// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only view of the configured scripts.

use std::sync::Arc;

use crate::types::Script;

/// Source of script definitions, read once per dispatch.
///
/// The authoritative copy lives with whoever manages script configuration;
/// the engine only ever reads a snapshot.
pub trait ScriptCatalog: Send + Sync + 'static {
    /// Current set of scripts. Cheap to call on every event.
    fn snapshot(&self) -> Arc<Vec<Arc<Script>>>;

    fn get(&self, id: &str) -> Option<Arc<Script>> {
        self.snapshot().iter().find(|s| s.id == id).cloned()
    }
}
