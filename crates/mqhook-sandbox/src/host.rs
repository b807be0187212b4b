// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host API exposed to scripts.
//!
//! The surface is exactly `log`, `state`, `globals`, `mqtt`, `print` and the
//! read-only `event`/`msg` map. Nothing else from the host process is
//! reachable from a script.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use metrics::counter;
use mqhook_core::topic::validate_publish_topic;
use mqhook_core::{Event, LogLevel, MessagePublisher, OutboundMessage, StateScope};
use mqhook_state::StateStore;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, Scope};
use serde_json::Value;
use tracing::debug;

use crate::result::CapturedLog;

/// Log calls kept per execution. Further calls are counted and dropped.
pub const MAX_CAPTURED_LOGS: usize = 1000;

/// Error value raised inside the script when the publish quota is spent.
pub(crate) const QUOTA_MESSAGE: &str = "publish quota exceeded";

type HostResult<T> = Result<T, Box<EvalAltResult>>;

pub(crate) fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    let message: String = message.into();
    EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE).into()
}

/// Per-execution state shared by every host binding.
pub(crate) struct HostContext {
    pub script_id: String,
    pub state: Arc<StateStore>,
    publisher: Arc<dyn MessagePublisher>,
    max_publishes: u32,
    publishes: AtomicU32,
    quota_hit: AtomicBool,
    abandoned: AtomicBool,
    logs: Mutex<Vec<CapturedLog>>,
    dropped_logs: AtomicU64,
    pub started: Instant,
}

impl HostContext {
    pub fn new(
        script_id: &str,
        state: Arc<StateStore>,
        publisher: Arc<dyn MessagePublisher>,
        max_publishes: u32,
    ) -> Self {
        Self {
            script_id: script_id.to_string(),
            state,
            publisher,
            max_publishes,
            publishes: AtomicU32::new(0),
            quota_hit: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            logs: Mutex::new(Vec::new()),
            dropped_logs: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn capture(&self, level: LogLevel, message: String, context: Option<Value>) {
        debug!(script_id = %self.script_id, level = %level, message = %message, "script log");
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        if logs.len() >= MAX_CAPTURED_LOGS {
            self.dropped_logs.fetch_add(1, Ordering::Relaxed);
            return;
        }
        logs.push(CapturedLog {
            level,
            message,
            context,
            elapsed: self.elapsed(),
        });
    }

    /// Copy of the logs captured so far.
    pub fn logs(&self) -> Vec<CapturedLog> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dropped_logs(&self) -> u64 {
        self.dropped_logs.load(Ordering::Relaxed)
    }

    pub fn publishes(&self) -> u32 {
        self.publishes.load(Ordering::Relaxed)
    }

    pub fn quota_hit(&self) -> bool {
        self.quota_hit.load(Ordering::Relaxed)
    }

    pub fn max_publishes(&self) -> u32 {
        self.max_publishes
    }

    /// Marks the execution as no longer awaited. State writes and publishes
    /// from an abandoned run are refused.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Relaxed);
    }

    fn ensure_live(&self) -> HostResult<()> {
        if self.abandoned.load(Ordering::Relaxed) {
            return Err(script_error("execution abandoned after timeout"));
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Dynamic, qos: i64, retain: bool) -> HostResult<()> {
        self.ensure_live()?;
        validate_publish_topic(topic).map_err(|e| script_error(e.to_string()))?;
        let qos = u8::try_from(qos)
            .ok()
            .filter(|q| *q <= 2)
            .ok_or_else(|| script_error(format!("invalid qos {qos}: expected 0, 1 or 2")))?;
        if self.publishes() >= self.max_publishes {
            self.quota_hit.store(true, Ordering::Relaxed);
            return Err(script_error(QUOTA_MESSAGE));
        }
        let message = OutboundMessage {
            topic: topic.to_string(),
            payload: payload_text(payload)?,
            qos,
            retain,
            source_script: self.script_id.clone(),
        };
        self.publisher
            .publish(message)
            .map_err(|e| script_error(e.to_string()))?;
        self.publishes.fetch_add(1, Ordering::Relaxed);
        counter!("mqhook_publishes_total").increment(1);
        Ok(())
    }
}

fn payload_text(payload: Dynamic) -> HostResult<String> {
    if payload.is_string() {
        return Ok(payload.to_string());
    }
    Ok(to_json(&payload)?.to_string())
}

fn to_json(value: &Dynamic) -> HostResult<Value> {
    rhai::serde::from_dynamic::<Value>(value)
        .map_err(|e| script_error(format!("value cannot be stored: {e}")))
}

fn from_json(value: Value) -> HostResult<Dynamic> {
    rhai::serde::to_dynamic(value)
}

fn context_json(context: Map) -> HostResult<Option<Value>> {
    if context.is_empty() {
        return Ok(None);
    }
    to_json(&Dynamic::from_map(context)).map(Some)
}

/// Reads `#{ttl: seconds}`. A missing or zero ttl means no expiry.
fn ttl_option(options: &Map) -> HostResult<Option<Duration>> {
    let Some(ttl) = options.get("ttl") else {
        return Ok(None);
    };
    let seconds = if let Ok(n) = ttl.as_int() {
        n as f64
    } else if let Ok(f) = ttl.as_float() {
        f
    } else if ttl.is_unit() {
        return Ok(None);
    } else {
        return Err(script_error("ttl must be a number of seconds"));
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(script_error("ttl must be a non-negative number of seconds"));
    }
    Ok((seconds > 0.0).then(|| Duration::from_secs_f64(seconds)))
}

/// The `log` binding.
#[derive(Clone)]
pub(crate) struct LogApi(Arc<HostContext>);

impl LogApi {
    fn write(&mut self, level: LogLevel, message: Dynamic, context: Option<Value>) {
        self.0.capture(level, message.to_string(), context);
    }

    fn write_with(&mut self, level: LogLevel, message: Dynamic, context: Map) -> HostResult<()> {
        let context = context_json(context)?;
        self.write(level, message, context);
        Ok(())
    }
}

/// The `state` and `globals` bindings.
#[derive(Clone)]
pub(crate) struct StateApi {
    ctx: Arc<HostContext>,
    scope: StateScope,
}

impl StateApi {
    fn get(&mut self, key: ImmutableString) -> HostResult<Dynamic> {
        match self.ctx.state.get(&self.scope, &key) {
            Some(value) => from_json(value),
            None => Ok(Dynamic::UNIT),
        }
    }

    fn set(&mut self, key: &str, value: Dynamic, ttl: Option<Duration>) -> HostResult<()> {
        self.ctx.ensure_live()?;
        let value = to_json(&value)?;
        self.ctx.state.set(&self.scope, key, value, ttl);
        Ok(())
    }

    fn delete(&mut self, key: ImmutableString) -> HostResult<bool> {
        self.ctx.ensure_live()?;
        Ok(self.ctx.state.delete(&self.scope, &key))
    }

    fn keys(&mut self) -> Array {
        self.ctx
            .state
            .keys(&self.scope)
            .into_iter()
            .map(Dynamic::from)
            .collect()
    }
}

/// The `mqtt` binding.
#[derive(Clone)]
pub(crate) struct MqttApi(Arc<HostContext>);

/// Registers the binding types and their methods.
pub(crate) fn register(engine: &mut Engine) {
    engine.register_type_with_name::<LogApi>("Log");
    for (name, level) in [
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        engine.register_fn(name, move |api: &mut LogApi, message: Dynamic| {
            api.write(level, message, None)
        });
        engine.register_fn(
            name,
            move |api: &mut LogApi, message: Dynamic, context: Map| {
                api.write_with(level, message, context)
            },
        );
    }

    engine.register_type_with_name::<StateApi>("State");
    engine.register_fn("get", StateApi::get);
    engine.register_fn(
        "set",
        |api: &mut StateApi, key: ImmutableString, value: Dynamic| api.set(&key, value, None),
    );
    engine.register_fn(
        "set",
        |api: &mut StateApi, key: ImmutableString, value: Dynamic, options: Map| {
            let ttl = ttl_option(&options)?;
            api.set(&key, value, ttl)
        },
    );
    engine.register_fn("delete", StateApi::delete);
    engine.register_fn("keys", StateApi::keys);

    engine.register_type_with_name::<MqttApi>("Mqtt");
    engine.register_fn(
        "publish",
        |api: &mut MqttApi, topic: ImmutableString, payload: Dynamic| {
            api.0.publish(&topic, payload, 0, false)
        },
    );
    engine.register_fn(
        "publish",
        |api: &mut MqttApi, topic: ImmutableString, payload: Dynamic, qos: i64, retain: bool| {
            api.0.publish(&topic, payload, qos, retain)
        },
    );
}

/// Routes `print` and `debug` output into the captured logs.
pub(crate) fn capture_output(engine: &mut Engine, ctx: &Arc<HostContext>) {
    let printed = Arc::clone(ctx);
    engine.on_print(move |text| printed.capture(LogLevel::Info, text.to_string(), None));
    let debugged = Arc::clone(ctx);
    engine.on_debug(move |text, _source, _pos| {
        debugged.capture(LogLevel::Debug, text.to_string(), None)
    });
}

/// The read-only event map seen by scripts.
pub(crate) fn event_map(event: &Event) -> Map {
    let mut map = Map::new();
    map.insert("type".into(), Dynamic::from(event.event_type.to_string()));
    map.insert("topic".into(), Dynamic::from(event.topic.clone()));
    map.insert("payload".into(), Dynamic::from(event.payload.clone()));
    map.insert("clientId".into(), Dynamic::from(event.client_id.clone()));
    map.insert("username".into(), Dynamic::from(event.username.clone()));
    map.insert("qos".into(), Dynamic::from_int(i64::from(event.qos)));
    map.insert("retain".into(), Dynamic::from_bool(event.retain));
    map.insert(
        "cleanSession".into(),
        Dynamic::from_bool(event.clean_session),
    );
    map.insert(
        "error".into(),
        event
            .error
            .clone()
            .map_or(Dynamic::UNIT, Dynamic::from),
    );
    map
}

/// Builds the variable scope a script runs in.
pub(crate) fn scope(ctx: &Arc<HostContext>, event: Map) -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push("log", LogApi(Arc::clone(ctx)));
    scope.push(
        "state",
        StateApi {
            ctx: Arc::clone(ctx),
            scope: StateScope::Script(ctx.script_id.clone()),
        },
    );
    scope.push(
        "globals",
        StateApi {
            ctx: Arc::clone(ctx),
            scope: StateScope::Global,
        },
    );
    scope.push("mqtt", MqttApi(Arc::clone(ctx)));
    scope.push_constant("event", event.clone());
    scope.push_constant("msg", event);
    scope
}
