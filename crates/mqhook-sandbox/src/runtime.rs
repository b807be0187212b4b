// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-execution Rhai interpreters with wall-clock bounds.
//!
//! Every execution gets a fresh [`Engine`] on its own interpreter thread,
//! whose stack is sized for [`MAX_CALL_DEPTH`] levels of script recursion.
//! The caller races it against a timer and stops waiting when the timer fires. The
//! interpreter keeps a watchdog in its progress callback that terminates the
//! run once `timeout + kill_grace` has passed, or as soon as
//! [`ScriptRuntime::terminate_all`] is called, so an abandoned run cannot
//! outlive its bound.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use mqhook_config::{EngineConfig, MAX_CALL_DEPTH};
use mqhook_core::{Event, LogSink, MessagePublisher, Script, StateScope};
use mqhook_state::StateStore;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Module, Shared};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::capture::CapturingPublisher;
use crate::host::{self, HostContext, QUOTA_MESSAGE};
use crate::record;
use crate::result::{ExecutionError, ExecutionResult, ExecutionStatus, TestRun};

const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;

/// Interpreter thread stack. Rhai call levels are stack hungry, more so in
/// debug builds.
const SCRIPT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Operations between watchdog checks.
const WATCHDOG_STRIDE: u64 = 256;

/// Resource bounds applied to every execution.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    pub default_timeout: Duration,
    pub kill_grace: Duration,
    pub max_publishes: u32,
    /// Interpreter operation cap. 0 disables it.
    pub max_operations: u64,
    pub max_call_depth: usize,
    pub max_string_size: usize,
    pub max_collection_size: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RuntimeLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_timeout: config.default_timeout(),
            kill_grace: config.kill_grace(),
            max_publishes: config.max_publishes_per_execution,
            max_operations: config.max_operations,
            max_call_depth: config.max_call_depth,
            max_string_size: config.max_string_size,
            max_collection_size: config.max_collection_size,
        }
    }

    /// The script's own timeout if it sets one, otherwise the default.
    pub fn timeout_for(&self, script: &Script) -> Duration {
        script
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map_or(self.default_timeout, Duration::from_millis)
    }
}

/// Terminates a run that outlived its hard limit or was killed.
struct Watchdog {
    started: Instant,
    hard_limit: Duration,
    kill_epoch: Arc<AtomicU64>,
    epoch: u64,
}

impl Watchdog {
    /// The termination token is `true` for a kill, `false` for the deadline.
    fn check(&self, operations: u64) -> Option<Dynamic> {
        if operations % WATCHDOG_STRIDE != 0 {
            return None;
        }
        if self.kill_epoch.load(Ordering::Acquire) != self.epoch {
            return Some(Dynamic::from_bool(true));
        }
        (self.started.elapsed() >= self.hard_limit).then(|| Dynamic::from_bool(false))
    }
}

/// Counts a live interpreter until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn base_engine(limits: &RuntimeLimits, std_lib: &Shared<Module>) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(std_lib.clone());
    engine.disable_symbol("eval");
    engine.set_max_call_levels(limits.max_call_depth.min(MAX_CALL_DEPTH));
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_collection_size);
    engine.set_max_map_size(limits.max_collection_size);
    if limits.max_operations > 0 {
        engine.set_max_operations(limits.max_operations);
    }
    host::register(&mut engine);
    engine
}

fn is_quota_error(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => {
            value.is_string() && value.to_string() == QUOTA_MESSAGE
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_quota_error(inner),
        _ => false,
    }
}

fn classify(err: &EvalAltResult, ctx: &HostContext, timeout: Duration) -> ExecutionError {
    match err {
        EvalAltResult::ErrorTerminated(killed, _) => {
            if killed.as_bool().unwrap_or(false) {
                ExecutionError::Runtime("execution terminated by host".into())
            } else {
                ExecutionError::Timeout(timeout)
            }
        }
        _ if ctx.quota_hit() && is_quota_error(err) => ExecutionError::QuotaExceeded {
            limit: ctx.max_publishes(),
        },
        _ => ExecutionError::Runtime(err.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

type JobOutcome = std::thread::Result<Result<(), ExecutionError>>;

/// Everything the interpreter thread needs for one run.
struct Job {
    limits: RuntimeLimits,
    std_lib: Shared<Module>,
    ctx: Arc<HostContext>,
    script: Arc<Script>,
    event: Map,
    watchdog: Watchdog,
    timeout: Duration,
    in_flight: InFlight,
}

impl Job {
    fn run(self) -> Result<(), ExecutionError> {
        let Job {
            limits,
            std_lib,
            ctx,
            script,
            event,
            watchdog,
            timeout,
            in_flight: _in_flight,
        } = self;

        let mut engine = base_engine(&limits, &std_lib);
        host::capture_output(&mut engine, &ctx);
        engine.on_progress(move |ops| watchdog.check(ops));

        let ast = engine
            .compile(&script.source)
            .map_err(|e| ExecutionError::Compilation(e.to_string()))?;
        let mut scope = host::scope(&ctx, event);
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| classify(&err, &ctx, timeout))
    }

    /// Starts the run on a detached interpreter thread.
    fn spawn(self) -> Result<oneshot::Receiver<JobOutcome>, ExecutionError> {
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("mqhook-script".into())
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn(move || {
                let _ = tx.send(catch_unwind(AssertUnwindSafe(move || self.run())));
            })
            .map_err(|e| ExecutionError::Runtime(format!("cannot start interpreter thread: {e}")))?;
        Ok(rx)
    }
}

/// Executes scripts against events.
pub struct ScriptRuntime {
    limits: RuntimeLimits,
    state: Arc<StateStore>,
    logs: Arc<dyn LogSink>,
    publisher: Arc<dyn MessagePublisher>,
    std_lib: Shared<Module>,
    kill_epoch: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
}

impl ScriptRuntime {
    pub fn new(
        limits: RuntimeLimits,
        state: Arc<StateStore>,
        logs: Arc<dyn LogSink>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            limits,
            state,
            logs,
            publisher,
            std_lib: StandardPackage::new().as_shared_module(),
            kill_epoch: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn logs(&self) -> &Arc<dyn LogSink> {
        &self.logs
    }

    /// Parses `source` without running it. No side effects.
    pub fn compile(&self, source: &str) -> Result<(), ExecutionError> {
        base_engine(&self.limits, &self.std_lib)
            .compile(source)
            .map(drop)
            .map_err(|e| ExecutionError::Compilation(e.to_string()))
    }

    /// Runs `script` for `event` and records its logs to the sink.
    pub async fn execute(&self, script: Arc<Script>, event: &Event) -> ExecutionResult {
        let result = self
            .run(
                script,
                event,
                Arc::clone(&self.state),
                Arc::clone(&self.publisher),
            )
            .await;
        record::record(self.logs.as_ref(), &result).await;
        result
    }

    /// Runs `script` against a copy of its state with publishes captured.
    ///
    /// Nothing is written to the state store, the log sink or the broker.
    pub async fn test_execute(&self, script: Arc<Script>, event: &Event) -> TestRun {
        let state = Arc::new(
            self.state
                .fork(&[StateScope::Script(script.id.clone()), StateScope::Global]),
        );
        let capture = Arc::new(CapturingPublisher::default());
        let publisher: Arc<dyn MessagePublisher> = capture.clone();
        let result = self.run(script, event, state, publisher).await;
        TestRun {
            result,
            published: capture.take(),
        }
    }

    /// Interpreters still running, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Kills every interpreter running right now. Returns how many there were.
    pub fn terminate_all(&self) -> usize {
        let running = self.in_flight();
        self.kill_epoch.fetch_add(1, Ordering::AcqRel);
        if running > 0 {
            warn!(running, "terminating in-flight script executions");
        }
        running
    }

    async fn run(
        &self,
        script: Arc<Script>,
        event: &Event,
        state: Arc<StateStore>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> ExecutionResult {
        let timeout = self.limits.timeout_for(&script);
        let started_at = Utc::now();
        let ctx = Arc::new(HostContext::new(
            &script.id,
            state,
            publisher,
            self.limits.max_publishes,
        ));
        let job = Job {
            limits: self.limits.clone(),
            std_lib: self.std_lib.clone(),
            ctx: Arc::clone(&ctx),
            script: Arc::clone(&script),
            event: host::event_map(event),
            watchdog: Watchdog {
                started: ctx.started,
                hard_limit: timeout + self.limits.kill_grace,
                kill_epoch: Arc::clone(&self.kill_epoch),
                epoch: self.kill_epoch.load(Ordering::Acquire),
            },
            timeout,
            in_flight: InFlight::enter(&self.in_flight),
        };

        let outcome = match job.spawn() {
            Ok(rx) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(Ok(outcome))) => outcome,
                Ok(Ok(Err(payload))) => {
                    let message = panic_message(&*payload);
                    error!(script_id = %script.id, panic = %message, "script execution faulted");
                    Err(ExecutionError::Panic(message))
                }
                Ok(Err(_)) => {
                    error!(script_id = %script.id, "interpreter thread exited without a result");
                    Err(ExecutionError::Panic("interpreter thread lost".into()))
                }
                Err(_) => {
                    ctx.abandon();
                    warn!(
                        script_id = %script.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "script execution timed out"
                    );
                    Err(ExecutionError::Timeout(timeout))
                }
            },
            Err(e) => {
                error!(script_id = %script.id, error = %e, "script execution not started");
                Err(e)
            }
        };

        let duration = ctx.elapsed();
        let status = outcome
            .as_ref()
            .err()
            .map_or(ExecutionStatus::Succeeded, ExecutionError::status);
        debug!(
            script_id = %script.id,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            publishes = ctx.publishes(),
            "script execution finished"
        );

        ExecutionResult {
            script_id: script.id.clone(),
            trigger_type: event.event_type,
            status,
            success: outcome.is_ok(),
            error: outcome.err(),
            logs: ctx.logs(),
            dropped_logs: ctx.dropped_logs(),
            started_at,
            duration,
            publishes: ctx.publishes(),
        }
    }
}
