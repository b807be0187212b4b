// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The trigger dispatcher and its lifecycle.
//!
//! [`ScriptEngine`] turns one broker event into zero or more concurrent
//! executions. Launch is synchronous and never waits on a script; the
//! spawned executions run on the runtime captured when the engine was built.
//!
//! Shutdown order is fixed: stop intake, drain in-flight executions up to
//! the deadline, kill whatever is left, flush dirty state (always), then
//! stop the housekeeping tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use mqhook_config::MqhookConfig;
use mqhook_core::{
    Event, LogSink, MessagePublisher, MqhookError, Script, ScriptCatalog, TriggerType,
};
use mqhook_sandbox::{ExecutionResult, RuntimeLimits, ScriptRuntime};
use mqhook_state::{StateStore, spawn_flusher};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::observer::{ExecutionObserver, NoopObserver, SkipReason};
use crate::{recording, resolve, retention};

/// Assembles a [`ScriptEngine`].
pub struct EngineBuilder {
    catalog: Arc<dyn ScriptCatalog>,
    state: Arc<StateStore>,
    logs: Arc<dyn LogSink>,
    publisher: Arc<dyn MessagePublisher>,
    limits: RuntimeLimits,
    flush_interval: Duration,
    sweep_interval: Duration,
    retention: Option<Duration>,
    observer: Arc<dyn ExecutionObserver>,
}

impl EngineBuilder {
    pub fn new(
        catalog: Arc<dyn ScriptCatalog>,
        state: Arc<StateStore>,
        logs: Arc<dyn LogSink>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        let defaults = MqhookConfig::default();
        Self {
            catalog,
            state,
            logs,
            publisher,
            limits: RuntimeLimits::default(),
            flush_interval: defaults.state.flush_interval(),
            sweep_interval: defaults.state.sweep_interval(),
            retention: defaults.logs.retention(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Takes limits, intervals and retention from configuration.
    pub fn with_config(mut self, config: &MqhookConfig) -> Self {
        self.limits = RuntimeLimits::from_config(&config.engine);
        self.flush_interval = config.state.flush_interval();
        self.sweep_interval = config.state.sweep_interval();
        self.retention = config.logs.retention();
        self
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_flush_interval(mut self, every: Duration) -> Self {
        self.flush_interval = every;
        self
    }

    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = every;
        self
    }

    /// `None` keeps logs forever.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention.filter(|r| !r.is_zero());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Builds the engine on the current tokio runtime.
    pub fn build(self) -> Result<ScriptEngine, MqhookError> {
        let handle = Handle::try_current()
            .map_err(|e| MqhookError::Internal(format!("no tokio runtime: {e}")))?;
        let runtime = Arc::new(ScriptRuntime::new(
            self.limits,
            Arc::clone(&self.state),
            Arc::clone(&self.logs),
            self.publisher,
        ));
        Ok(ScriptEngine {
            inner: Arc::new(Inner {
                catalog: self.catalog,
                runtime,
                state: self.state,
                logs: self.logs,
                observer: self.observer,
                handle,
                tracker: TaskTracker::new(),
                intake: RwLock::new(true),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                housekeeping: Mutex::new(Vec::new()),
                flush_interval: self.flush_interval,
                sweep_interval: self.sweep_interval,
                retention: self.retention,
            }),
        })
    }
}

pub(crate) struct Inner {
    pub(crate) catalog: Arc<dyn ScriptCatalog>,
    pub(crate) runtime: Arc<ScriptRuntime>,
    pub(crate) state: Arc<StateStore>,
    pub(crate) logs: Arc<dyn LogSink>,
    observer: Arc<dyn ExecutionObserver>,
    handle: Handle,
    tracker: TaskTracker,
    /// Whether dispatches are accepted. Held for reading across a whole
    /// dispatch so shutdown cannot close the tracker mid-launch.
    intake: RwLock<bool>,
    started: AtomicBool,
    cancel: CancellationToken,
    housekeeping: Mutex<Vec<JoinHandle<()>>>,
    flush_interval: Duration,
    sweep_interval: Duration,
    retention: Option<Duration>,
}

/// Executions launched for one event.
#[must_use = "dropping a Dispatch does not cancel it; call join() to wait for results"]
pub struct Dispatch {
    launched: Vec<String>,
    handles: Vec<JoinHandle<ExecutionResult>>,
}

impl Dispatch {
    fn empty() -> Self {
        Self {
            launched: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Script ids in launch order.
    pub fn launched(&self) -> &[String] {
        &self.launched
    }

    pub fn is_empty(&self) -> bool {
        self.launched.is_empty()
    }

    /// Waits for every execution and returns the results in launch order.
    pub async fn join(self) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(self.handles.len());
        for (id, handle) in self.launched.iter().zip(self.handles) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => error!(script_id = %id, error = %e, "execution task failed"),
            }
        }
        results
    }
}

/// What shutdown accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Every in-flight execution finished before the deadline.
    pub drained: bool,
    /// Interpreters still running at the deadline and killed.
    pub abandoned: usize,
    /// Dirty state entries written by the final flush.
    pub flushed: usize,
    /// The final flush failed with this error.
    pub flush_error: Option<String>,
}

/// Cheaply cloneable handle to the dispatcher.
#[derive(Clone)]
pub struct ScriptEngine {
    pub(crate) inner: Arc<Inner>,
}

impl ScriptEngine {
    pub fn builder(
        catalog: Arc<dyn ScriptCatalog>,
        state: Arc<StateStore>,
        logs: Arc<dyn LogSink>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> EngineBuilder {
        EngineBuilder::new(catalog, state, logs, publisher)
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.inner.runtime
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.inner.state
    }

    pub fn is_accepting(&self) -> bool {
        *self.inner.intake.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executions launched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Launches every script whose triggers match the event.
    ///
    /// Returns once all executions are spawned; none of them is awaited.
    /// Launch order is priority ascending, then script id. A script never
    /// runs for an event it published itself.
    pub fn execute_for_trigger(
        &self,
        trigger_type: TriggerType,
        topic: &str,
        mut event: Event,
    ) -> Result<Dispatch, MqhookError> {
        let inner = &self.inner;
        let intake = inner.intake.read().unwrap_or_else(PoisonError::into_inner);
        if !*intake {
            recording::record_skip(SkipReason::ShuttingDown);
            return Err(MqhookError::ShuttingDown);
        }

        event.event_type = trigger_type;
        if event.topic.is_empty() {
            event.topic = topic.to_string();
        }

        let snapshot = inner.catalog.snapshot();
        let matched = resolve::resolve(&snapshot, trigger_type, topic);
        if matched.is_empty() {
            return Ok(Dispatch::empty());
        }

        let event = Arc::new(event);
        let mut dispatch = Dispatch::empty();
        for script in matched {
            if event.published_by_script.as_deref() == Some(script.id.as_str()) {
                debug!(script_id = %script.id, topic, "skipping self-triggered execution");
                recording::record_skip(SkipReason::SelfTrigger);
                inner.observer.on_skip(&script.id, SkipReason::SelfTrigger);
                continue;
            }
            inner.observer.on_launch(&script, &event);
            dispatch.launched.push(script.id.clone());
            dispatch.handles.push(self.launch(script, Arc::clone(&event)));
        }
        debug!(
            trigger = %trigger_type,
            topic,
            launched = dispatch.launched.len(),
            "event dispatched"
        );
        drop(intake);
        Ok(dispatch)
    }

    fn launch(&self, script: Arc<Script>, event: Arc<Event>) -> JoinHandle<ExecutionResult> {
        let runtime = Arc::clone(&self.inner.runtime);
        let observer = Arc::clone(&self.inner.observer);
        self.inner.tracker.spawn_on(
            async move {
                let result = runtime.execute(script, &event).await;
                recording::record_execution(&result);
                observer.on_complete(&result);
                result
            },
            &self.inner.handle,
        )
    }

    /// Starts the state flusher, expiry sweep and log retention sweep.
    /// Later calls do nothing.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = inner.handle.enter();
        let mut tasks = vec![spawn_flusher(
            Arc::clone(&inner.state),
            inner.flush_interval,
            inner.sweep_interval,
            inner.cancel.child_token(),
        )];
        if let Some(retention) = inner.retention {
            tasks.push(retention::spawn_retention(
                Arc::clone(&inner.logs),
                retention,
                inner.cancel.child_token(),
            ));
        }
        inner
            .housekeeping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
        info!(
            flush_secs = inner.flush_interval.as_secs_f64(),
            retention_secs = inner.retention.map(|r| r.as_secs()),
            "script engine started"
        );
    }

    /// Stops the engine. See the module docs for the ordering.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        let inner = &self.inner;
        {
            let mut intake = inner.intake.write().unwrap_or_else(PoisonError::into_inner);
            *intake = false;
            inner.tracker.close();
        }
        info!(
            in_flight = inner.tracker.len(),
            deadline_ms = deadline.as_millis() as u64,
            "script engine shutting down"
        );

        let drained = tokio::time::timeout(deadline, inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                remaining = inner.tracker.len(),
                "shutdown deadline reached with executions still running"
            );
        }
        let abandoned = inner.runtime.terminate_all();

        let (flushed, flush_error) = match inner.state.flush_dirty().await {
            Ok(flushed) => (flushed, None),
            Err(e) => {
                error!(error = %e, "final state flush failed");
                (0, Some(e.to_string()))
            }
        };

        inner.cancel.cancel();
        let tasks = std::mem::take(
            &mut *inner
                .housekeeping
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "housekeeping task ended abnormally");
            }
        }

        let report = ShutdownReport {
            drained,
            abandoned,
            flushed,
            flush_error,
        };
        info!(
            drained = report.drained,
            abandoned = report.abandoned,
            flushed = report.flushed,
            "script engine stopped"
        );
        report
    }
}
