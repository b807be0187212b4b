// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage behind the state cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MqhookError;
use crate::state::{StateBatch, StateRecord, StateScope};

/// Durable store for script state.
///
/// The cache in front of it is the only writer. Backends must apply a
/// [`StateBatch`] atomically: either every upsert and delete lands or none do.
#[async_trait]
pub trait StateBackend: Send + Sync + 'static {
    /// Short backend name for logs ("sqlite", "redb", "memory").
    fn name(&self) -> &str;

    /// Loads every stored record, skipping ones already expired.
    async fn load_all(&self) -> Result<Vec<StateRecord>, MqhookError>;

    /// Applies upserts and deletes in one transaction.
    async fn apply(&self, batch: StateBatch) -> Result<(), MqhookError>;

    /// Removes every record in `scope`. Returns the number removed.
    async fn delete_scope(&self, scope: &StateScope) -> Result<u64, MqhookError>;

    /// Removes every record whose expiry is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, MqhookError>;
}
