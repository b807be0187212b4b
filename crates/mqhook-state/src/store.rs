// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The write-through state cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use metrics::counter;
use mqhook_core::{MqhookError, StateBackend, StateBatch, StateRecord, StateScope};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::memory::MemoryBackend;

/// One cached entry. A `None` value is a tombstone awaiting a durable delete.
#[derive(Debug, Clone)]
struct Slot {
    scope: StateScope,
    name: String,
    value: Option<Value>,
    expires_at: Option<DateTime<Utc>>,
    dirty: bool,
    revision: u64,
}

impl Slot {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.value.is_some() && !self.expired(now)
    }

    fn to_record(&self) -> Option<StateRecord> {
        Some(StateRecord {
            scope: self.scope.clone(),
            key: self.name.clone(),
            value: self.value.clone()?,
            expires_at: self.expires_at,
        })
    }
}

/// Outcome of an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Expired entries dropped from (or tombstoned in) the cache.
    pub cached: usize,
    /// Expired records removed from the backend.
    pub durable: u64,
}

/// TTL-aware key/value store with dirty tracking.
///
/// The cache holds every live entry, so reads never reach the backend. Each
/// mutation stamps the entry with a new revision; a flush only clears the
/// dirty bit of entries whose revision did not move while the batch was in
/// flight, so a write that races a flush is written by the next one.
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    cache: DashMap<String, Slot>,
    revision: AtomicU64,
    flush_lock: Mutex<()>,
}

impl StateStore {
    /// Opens a store and warms the cache from every durable record.
    pub async fn open(backend: Arc<dyn StateBackend>) -> Result<Self, MqhookError> {
        let records = backend.load_all().await?;
        let store = Self::empty(backend);
        let now = Utc::now();
        let mut loaded = 0usize;
        for record in records.into_iter().filter(|r| !r.is_expired(now)) {
            store.cache.insert(
                record.scope.namespaced_key(&record.key),
                Slot {
                    scope: record.scope,
                    name: record.key,
                    value: Some(record.value),
                    expires_at: record.expires_at,
                    dirty: false,
                    revision: 0,
                },
            );
            loaded += 1;
        }
        info!(
            backend = store.backend.name(),
            entries = loaded,
            "state store loaded"
        );
        Ok(store)
    }

    /// A store with an empty cache over `backend`. Nothing is loaded.
    pub fn empty(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
            revision: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    /// A store backed only by memory, holding nothing.
    pub fn detached() -> Self {
        Self::empty(Arc::new(MemoryBackend::new()))
    }

    /// Copies the live entries of `scopes` into a new detached store.
    ///
    /// Writes to the copy never reach this store or its backend.
    pub fn fork(&self, scopes: &[StateScope]) -> StateStore {
        let copy = StateStore::detached();
        let now = Utc::now();
        let prefixes: Vec<String> = scopes.iter().map(StateScope::prefix).collect();
        for entry in self.cache.iter() {
            if entry.is_live(now) && prefixes.iter().any(|p| entry.key().starts_with(p)) {
                let mut slot = entry.value().clone();
                slot.dirty = false;
                copy.cache.insert(entry.key().clone(), slot);
            }
        }
        copy
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reads a value. Expired entries read as absent and are queued for deletion.
    pub fn get(&self, scope: &StateScope, key: &str) -> Option<Value> {
        let full = scope.namespaced_key(key);
        let now = Utc::now();
        {
            let slot = self.cache.get(&full)?;
            if !slot.expired(now) {
                return slot.value.clone();
            }
        }
        self.expire(&full, now);
        None
    }

    /// Writes a value. A `ttl` of `None` or zero never expires.
    pub fn set(&self, scope: &StateScope, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        let slot = Slot {
            scope: scope.clone(),
            name: key.to_string(),
            value: Some(value),
            expires_at,
            dirty: true,
            revision: self.next_revision(),
        };
        self.cache.insert(scope.namespaced_key(key), slot);
    }

    /// Deletes a value. Returns whether a live value was present.
    pub fn delete(&self, scope: &StateScope, key: &str) -> bool {
        let now = Utc::now();
        let revision = self.next_revision();
        match self.cache.get_mut(&scope.namespaced_key(key)) {
            Some(mut slot) => {
                let existed = slot.is_live(now);
                slot.value = None;
                slot.expires_at = None;
                slot.dirty = true;
                slot.revision = revision;
                existed
            }
            None => false,
        }
    }

    /// Live keys in `scope`, sorted.
    pub fn keys(&self, scope: &StateScope) -> Vec<String> {
        self.records(scope).into_iter().map(|r| r.key).collect()
    }

    /// Live entries in `scope`, sorted by key.
    pub fn records(&self, scope: &StateScope) -> Vec<StateRecord> {
        let prefix = scope.prefix();
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut records = Vec::new();
        for entry in self.cache.iter().filter(|e| e.key().starts_with(&prefix)) {
            if entry.expired(now) && entry.value.is_some() {
                expired.push(entry.key().clone());
            } else if let Some(record) = entry.to_record() {
                records.push(record);
            }
        }
        for full in expired {
            self.expire(&full, now);
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    fn expire(&self, full: &str, now: DateTime<Utc>) {
        if let Some(mut slot) = self.cache.get_mut(full)
            && slot.value.is_some()
            && slot.expired(now)
        {
            slot.value = None;
            slot.expires_at = None;
            slot.dirty = true;
            slot.revision = self.next_revision();
        }
    }

    /// Number of cached entries, tombstones included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.cache.iter().filter(|e| e.dirty).count()
    }

    /// Writes every dirty entry to the backend in one batch.
    ///
    /// On error nothing is marked clean and the error is returned; the
    /// entries are retried by the next flush.
    pub async fn flush_dirty(&self) -> Result<usize, MqhookError> {
        let _guard = self.flush_lock.lock().await;
        let now = Utc::now();
        let mut batch = StateBatch::default();
        let mut taken = Vec::new();
        for entry in self.cache.iter().filter(|e| e.dirty) {
            match entry.to_record() {
                Some(record) if !entry.expired(now) => batch.upserts.push(record),
                _ => batch
                    .deletes
                    .push((entry.scope.clone(), entry.name.clone())),
            }
            taken.push((entry.key().clone(), entry.revision));
        }
        if batch.is_empty() {
            return Ok(0);
        }

        let written = batch.len();
        if let Err(e) = self.backend.apply(batch).await {
            counter!("mqhook_state_flush_failures_total").increment(1);
            return Err(e);
        }

        for (full, revision) in taken {
            self.cache
                .remove_if(&full, |_, slot| slot.revision == revision && !slot.is_live(now));
            if let Some(mut slot) = self.cache.get_mut(&full)
                && slot.revision == revision
            {
                slot.dirty = false;
            }
        }
        counter!("mqhook_state_flushed_entries_total").increment(written as u64);
        debug!(entries = written, "state flushed");
        Ok(written)
    }

    /// Marks every cached entry dirty and flushes, rewriting the durable copy.
    pub async fn flush_all(&self) -> Result<usize, MqhookError> {
        for mut entry in self.cache.iter_mut() {
            entry.dirty = true;
        }
        self.flush_dirty().await
    }

    /// Removes a whole scope from the cache and the backend.
    pub async fn delete_scope(&self, scope: &StateScope) -> Result<u64, MqhookError> {
        let _guard = self.flush_lock.lock().await;
        let prefix = scope.prefix();
        self.cache.retain(|full, _| !full.starts_with(&prefix));
        let removed = self.backend.delete_scope(scope).await?;
        info!(scope = %scope, removed, "state scope deleted");
        Ok(removed)
    }

    /// Sweeps expired entries from the cache and the backend.
    ///
    /// Expired entries with unflushed writes become tombstones so the older
    /// durable copy is deleted by the next flush instead of resurfacing.
    pub async fn purge_expired(&self) -> Result<PurgeStats, MqhookError> {
        let _guard = self.flush_lock.lock().await;
        let now = Utc::now();
        let mut cached = 0usize;
        self.cache.retain(|_, slot| {
            if slot.value.is_none() || !slot.expired(now) {
                return true;
            }
            cached += 1;
            if slot.dirty {
                slot.value = None;
                slot.expires_at = None;
                slot.revision = self.next_revision();
                true
            } else {
                false
            }
        });
        let durable = self.backend.purge_expired(now).await?;
        if cached > 0 || durable > 0 {
            debug!(cached, durable, "expired state purged");
        }
        Ok(PurgeStats { cached, durable })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store_with_backend() -> (StateStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (StateStore::empty(backend.clone()), backend)
    }

    #[test]
    fn scopes_are_isolated() {
        let (store, _) = store_with_backend();
        let a = StateScope::script("a");
        let b = StateScope::script("b");
        store.set(&a, "n", json!(1), None);
        store.set(&StateScope::Global, "n", json!(2), None);
        assert_eq!(store.get(&a, "n"), Some(json!(1)));
        assert_eq!(store.get(&b, "n"), None);
        assert_eq!(store.get(&StateScope::Global, "n"), Some(json!(2)));
    }

    #[test]
    fn delete_reports_presence() {
        let (store, _) = store_with_backend();
        let scope = StateScope::script("a");
        store.set(&scope, "k", json!("v"), None);
        assert!(store.delete(&scope, "k"));
        assert!(!store.delete(&scope, "k"));
        assert_eq!(store.get(&scope, "k"), None);
    }

    #[test]
    fn keys_are_sorted_and_scoped() {
        let (store, _) = store_with_backend();
        let scope = StateScope::script("a");
        store.set(&scope, "b", json!(1), None);
        store.set(&scope, "a", json!(1), None);
        store.set(&StateScope::script("ab"), "z", json!(1), None);
        store.set(&scope, "gone", json!(1), None);
        store.delete(&scope, "gone");
        assert_eq!(store.keys(&scope), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn expired_entry_reads_absent_and_is_deleted_durably() {
        let (store, backend) = store_with_backend();
        let scope = StateScope::script("a");
        store.set(&scope, "k", json!(1), None);
        store.flush_dirty().await.unwrap();
        assert!(backend.get(&scope, "k").is_some());

        store.set(&scope, "k", json!(2), Some(Duration::from_millis(30)));
        assert_eq!(store.get(&scope, "k"), Some(json!(2)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get(&scope, "k"), None);
        assert!(store.keys(&scope).is_empty());

        store.flush_dirty().await.unwrap();
        assert!(backend.get(&scope, "k").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let (store, _) = store_with_backend();
        let scope = StateScope::Global;
        store.set(&scope, "k", json!(true), Some(Duration::ZERO));
        assert_eq!(store.records(&scope)[0].expires_at, None);
    }

    #[tokio::test]
    async fn flush_writes_only_dirty_entries() {
        let (store, backend) = store_with_backend();
        let scope = StateScope::script("a");
        store.set(&scope, "x", json!(1), None);
        store.set(&scope, "y", json!(2), None);
        assert_eq!(store.dirty_count(), 2);
        assert_eq!(store.flush_dirty().await.unwrap(), 2);
        assert_eq!(store.dirty_count(), 0);
        assert_eq!(store.flush_dirty().await.unwrap(), 0);
        assert_eq!(backend.batches_applied(), 1);
        assert_eq!(backend.get(&scope, "y").unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn failed_flush_keeps_entries_dirty() {
        let (store, backend) = store_with_backend();
        let scope = StateScope::script("a");
        store.set(&scope, "x", json!(1), None);
        backend.set_unavailable(true);
        assert!(store.flush_dirty().await.is_err());
        assert_eq!(store.dirty_count(), 1);

        backend.set_unavailable(false);
        assert_eq!(store.flush_dirty().await.unwrap(), 1);
        assert_eq!(backend.get(&scope, "x").unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn open_warms_cache_and_skips_expired() {
        let live = StateRecord {
            scope: StateScope::script("a"),
            key: "n".into(),
            value: json!(3),
            expires_at: None,
        };
        let stale = StateRecord {
            key: "old".into(),
            expires_at: Some(Utc::now() - TimeDelta::seconds(1)),
            ..live.clone()
        };
        let backend = Arc::new(MemoryBackend::with_records([live, stale]));
        let store = StateStore::open(backend).await.unwrap();
        assert_eq!(store.get(&StateScope::script("a"), "n"), Some(json!(3)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.dirty_count(), 0);
    }

    #[tokio::test]
    async fn delete_scope_clears_cache_and_backend() {
        let (store, backend) = store_with_backend();
        let a = StateScope::script("a");
        store.set(&a, "x", json!(1), None);
        store.set(&StateScope::script("b"), "x", json!(1), None);
        store.flush_dirty().await.unwrap();

        assert_eq!(store.delete_scope(&a).await.unwrap(), 1);
        assert_eq!(store.get(&a, "x"), None);
        assert!(backend.get(&a, "x").is_none());
        assert!(backend.get(&StateScope::script("b"), "x").is_some());
    }

    #[tokio::test]
    async fn purge_tombstones_unflushed_expired_writes() {
        let (store, backend) = store_with_backend();
        let scope = StateScope::script("a");
        store.set(&scope, "k", json!(1), None);
        store.flush_dirty().await.unwrap();
        store.set(&scope, "k", json!(2), Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = store.purge_expired().await.unwrap();
        assert_eq!(stats.cached, 1);
        store.flush_dirty().await.unwrap();
        assert!(backend.get(&scope, "k").is_none());
    }

    #[test]
    fn fork_copies_selected_scopes_only() {
        let (store, _) = store_with_backend();
        let a = StateScope::script("a");
        store.set(&a, "n", json!(1), None);
        store.set(&StateScope::Global, "g", json!(1), None);
        store.set(&StateScope::script("b"), "n", json!(9), None);

        let fork = store.fork(&[a.clone(), StateScope::Global]);
        assert_eq!(fork.get(&a, "n"), Some(json!(1)));
        assert_eq!(fork.get(&StateScope::script("b"), "n"), None);
        assert_eq!(fork.dirty_count(), 0);

        fork.set(&a, "n", json!(100), None);
        assert_eq!(store.get(&a, "n"), Some(json!(1)));
    }
}
