// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end engine tests.
//!
//! `TestHarness` wires a [`ScriptEngine`] to real storage in a temp
//! directory, a [`MemoryCatalog`], a [`RecordingPublisher`] and a
//! [`RecordingObserver`]. [`TestHarness::restart`] shuts the engine down and
//! reopens the same database, for durability tests.

use std::sync::Arc;
use std::time::Duration;

use mqhook_config::{StorageBackendKind, StorageConfig};
use mqhook_core::{Event, MqhookError, Script, StateScope, TriggerType};
use mqhook_engine::{MemoryCatalog, ScriptEngine, ShutdownReport};
use mqhook_sandbox::{ExecutionResult, RuntimeLimits};
use mqhook_state::StateStore;
use mqhook_storage::{Backends, open_backends};
use serde_json::Value;
use tempfile::TempDir;

use crate::mock_observer::RecordingObserver;
use crate::mock_publisher::RecordingPublisher;

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    scripts: Vec<Script>,
    limits: RuntimeLimits,
    backend: StorageBackendKind,
    retention: Option<Duration>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            scripts: Vec::new(),
            limits: RuntimeLimits {
                kill_grace: Duration::from_millis(50),
                ..RuntimeLimits::default()
            },
            backend: StorageBackendKind::Sqlite,
            retention: None,
        }
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_publishes(mut self, max: u32) -> Self {
        self.limits.max_publishes = max;
        self
    }

    pub fn with_backend(mut self, backend: StorageBackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Creates the temp database, loads state and builds the engine.
    pub async fn build(self) -> Result<TestHarness, MqhookError> {
        let temp_dir = TempDir::new().map_err(MqhookError::storage)?;
        let storage = StorageConfig {
            backend: self.backend,
            database_path: temp_dir.path().join("mqhook.db").display().to_string(),
            redb_path: temp_dir.path().join("mqhook.redb").display().to_string(),
            wal_mode: true,
        };
        let catalog = Arc::new(MemoryCatalog::with_scripts(self.scripts)?);
        TestHarness::assemble(
            Arc::new(temp_dir),
            storage,
            catalog,
            self.limits,
            self.retention,
        )
        .await
    }
}

/// A running engine over a temp database.
pub struct TestHarness {
    pub engine: ScriptEngine,
    pub catalog: Arc<MemoryCatalog>,
    pub publisher: Arc<RecordingPublisher>,
    pub observer: Arc<RecordingObserver>,
    pub backends: Backends,
    storage: StorageConfig,
    limits: RuntimeLimits,
    retention: Option<Duration>,
    temp_dir: Arc<TempDir>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    async fn assemble(
        temp_dir: Arc<TempDir>,
        storage: StorageConfig,
        catalog: Arc<MemoryCatalog>,
        limits: RuntimeLimits,
        retention: Option<Duration>,
    ) -> Result<Self, MqhookError> {
        let backends = open_backends(&storage).await?;
        let state = Arc::new(StateStore::open(Arc::clone(&backends.state)).await?);
        let publisher = Arc::new(RecordingPublisher::new());
        let observer = Arc::new(RecordingObserver::new());
        let engine = ScriptEngine::builder(
            catalog.clone(),
            state,
            Arc::clone(&backends.logs),
            publisher.clone(),
        )
        .with_limits(limits.clone())
        .with_retention(retention)
        .with_observer(observer.clone())
        .build()?;
        Ok(Self {
            engine,
            catalog,
            publisher,
            observer,
            backends,
            storage,
            limits,
            retention,
            temp_dir,
        })
    }

    /// Dispatches `event` and waits for every launched execution.
    pub async fn fire(
        &self,
        trigger_type: TriggerType,
        topic: &str,
        event: Event,
    ) -> Result<Vec<ExecutionResult>, MqhookError> {
        let dispatch = self.engine.execute_for_trigger(trigger_type, topic, event)?;
        Ok(dispatch.join().await)
    }

    /// Dispatches an `on_publish` event and waits for its executions.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> Result<Vec<ExecutionResult>, MqhookError> {
        self.fire(
            TriggerType::OnPublish,
            topic,
            Event::publish(topic, payload).with_client("test-client"),
        )
        .await
    }

    pub fn script_state(&self, script_id: &str, key: &str) -> Option<Value> {
        self.engine
            .get_state(&StateScope::Script(script_id.to_string()), key)
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        self.engine.shutdown(Duration::from_secs(5)).await
    }

    /// Shuts down and reopens the same database with the same scripts, as a
    /// process restart would.
    pub async fn restart(self) -> Result<TestHarness, MqhookError> {
        self.shutdown().await;
        let TestHarness {
            engine,
            catalog,
            backends,
            storage,
            limits,
            retention,
            temp_dir,
            ..
        } = self;
        drop(engine);
        drop(backends);
        Self::assemble(temp_dir, storage, catalog, limits, retention).await
    }
}
