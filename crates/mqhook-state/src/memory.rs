// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory state backend.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqhook_core::{MqhookError, StateBackend, StateBatch, StateRecord, StateScope};

/// Keeps records in a `BTreeMap` keyed by namespaced key.
///
/// Used for detached test-execution stores and in tests. It can be switched
/// to unavailable, after which every call fails with a storage error.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<String, StateRecord>>,
    unavailable: AtomicBool,
    batches: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates durable records, as if written by a previous process.
    pub fn with_records(records: impl IntoIterator<Item = StateRecord>) -> Self {
        let backend = Self::default();
        {
            let mut map = backend.lock();
            for record in records {
                map.insert(record.scope.namespaced_key(&record.key), record);
            }
        }
        backend
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of batches applied successfully.
    pub fn batches_applied(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn get(&self, scope: &StateScope, key: &str) -> Option<StateRecord> {
        self.lock().get(&scope.namespaced_key(key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StateRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<(), MqhookError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MqhookError::storage_msg("memory backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_all(&self) -> Result<Vec<StateRecord>, MqhookError> {
        self.check()?;
        let now = Utc::now();
        Ok(self
            .lock()
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn apply(&self, batch: StateBatch) -> Result<(), MqhookError> {
        self.check()?;
        let mut map = self.lock();
        for (scope, key) in &batch.deletes {
            map.remove(&scope.namespaced_key(key));
        }
        for record in batch.upserts {
            map.insert(record.scope.namespaced_key(&record.key), record);
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_scope(&self, scope: &StateScope) -> Result<u64, MqhookError> {
        self.check()?;
        let prefix = scope.prefix();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|k, _| !k.starts_with(&prefix));
        Ok((before - map.len()) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, MqhookError> {
        self.check()?;
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, r| !r.is_expired(now));
        Ok((before - map.len()) as u64)
    }
}
