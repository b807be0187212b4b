// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution behaviour against real state and log backends.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mqhook_core::{
    Event, LogLevel, LogSink, MessagePublisher, MqhookError, OutboundMessage, Script, StateScope,
};
use mqhook_sandbox::{ErrorKind, ExecutionError, ExecutionStatus, RuntimeLimits, ScriptRuntime};
use mqhook_state::StateStore;
use mqhook_storage::{Database, SqliteLogSink};
use serde_json::json;

#[derive(Default)]
struct Recorder(Mutex<Vec<OutboundMessage>>);

impl Recorder {
    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl MessagePublisher for Recorder {
    fn publish(&self, message: OutboundMessage) -> Result<(), MqhookError> {
        self.0.lock().unwrap().push(message);
        Ok(())
    }
}

struct Exploding;

impl MessagePublisher for Exploding {
    fn publish(&self, _message: OutboundMessage) -> Result<(), MqhookError> {
        panic!("publisher exploded");
    }
}

struct Fixture {
    runtime: Arc<ScriptRuntime>,
    state: Arc<StateStore>,
    logs: Arc<dyn LogSink>,
    published: Arc<Recorder>,
}

async fn fixture(limits: RuntimeLimits) -> Fixture {
    let db = Database::open_in_memory().await.unwrap();
    let logs: Arc<dyn LogSink> = Arc::new(SqliteLogSink::new(db));
    let state = Arc::new(StateStore::detached());
    let published = Arc::new(Recorder::default());
    let runtime = Arc::new(ScriptRuntime::new(
        limits,
        Arc::clone(&state),
        Arc::clone(&logs),
        published.clone(),
    ));
    Fixture {
        runtime,
        state,
        logs,
        published,
    }
}

fn limits() -> RuntimeLimits {
    RuntimeLimits {
        kill_grace: Duration::from_millis(50),
        ..RuntimeLimits::default()
    }
}

fn script(id: &str, source: &str) -> Arc<Script> {
    Arc::new(Script::new(id, source))
}

fn event() -> Event {
    Event::publish("sensors/t1", "21.5").with_client("c1")
}

async fn messages(logs: &Arc<dyn LogSink>, id: &str) -> Vec<String> {
    logs.list_logs(id, 1, 100, None)
        .await
        .unwrap()
        .entries
        .into_iter()
        .map(|e| e.message)
        .collect()
}

#[tokio::test]
async fn state_persists_across_executions() {
    let f = fixture(limits()).await;
    let incr = script("incr", r#"state.set("n", (state.get("n") ?? 0) + 1);"#);
    for _ in 0..3 {
        let result = f.runtime.execute(Arc::clone(&incr), &event()).await;
        assert!(result.success, "{:?}", result.error);
    }
    assert_eq!(
        f.state.get(&StateScope::Script("incr".into()), "n"),
        Some(json!(3))
    );
}

#[tokio::test]
async fn globals_are_shared_between_scripts() {
    let f = fixture(limits()).await;
    f.runtime
        .execute(script("a", r#"globals.set("seen", "a");"#), &event())
        .await;
    let result = f
        .runtime
        .execute(
            script("b", r#"if globals.get("seen") != "a" { throw "missing"; }"#),
            &event(),
        )
        .await;
    assert!(result.success, "{:?}", result.error);
}

#[tokio::test]
async fn ttl_option_sets_expiry() {
    let f = fixture(limits()).await;
    let result = f
        .runtime
        .execute(
            script("ttl", r#"state.set("k", 1, #{ttl: 60}); state.set("p", 2);"#),
            &event(),
        )
        .await;
    assert!(result.success, "{:?}", result.error);
    let records = f.state.records(&StateScope::Script("ttl".into()));
    assert_eq!(records.len(), 2);
    assert!(records[0].expires_at.is_some());
    assert!(records[1].expires_at.is_none());
}

#[tokio::test]
async fn infinite_loop_times_out_and_is_killed() {
    let f = fixture(limits()).await;
    let slow = Arc::new(Script::new("slow", r#"log.info("started"); loop { }"#).with_timeout_ms(100));

    let begun = Instant::now();
    let result = f.runtime.execute(slow, &event()).await;
    assert!(begun.elapsed() < Duration::from_secs(1));
    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert_eq!(
        result.error_message().as_deref(),
        Some("execution timeout after 100ms")
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while f.runtime.in_flight() > 0 {
        assert!(Instant::now() < deadline, "abandoned run was never killed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        messages(&f.logs, "slow").await,
        vec![
            "execution failed: execution timeout after 100ms".to_string(),
            "started".to_string()
        ]
    );
}

#[tokio::test]
async fn compile_errors_are_distinct_and_repeatable() {
    let f = fixture(limits()).await;
    let first = f.runtime.compile("let x = ;").unwrap_err();
    let second = f.runtime.compile("let x = ;").unwrap_err();
    assert_eq!(first, second);
    assert_eq!(first.kind(), ErrorKind::Compilation);
    assert!(f.runtime.compile(r#"log.info("ok");"#).is_ok());

    let result = f.runtime.execute(script("bad", "let x = ;"), &event()).await;
    assert_eq!(result.status, ExecutionStatus::CompileFailed);
    assert!(f.state.is_empty());
}

#[tokio::test]
async fn eval_is_unavailable() {
    let f = fixture(limits()).await;
    assert!(f.runtime.compile(r#"eval("40 + 2")"#).is_err());
}

#[tokio::test]
async fn publish_quota_stops_uncaught_flood() {
    let f = fixture(RuntimeLimits {
        max_publishes: 100,
        ..limits()
    })
    .await;
    let flood = script("flood", r#"for i in 0..150 { mqtt.publish("out/" + i, "x"); }"#);
    let result = f.runtime.execute(flood, &event()).await;
    assert_eq!(
        result.error,
        Some(ExecutionError::QuotaExceeded { limit: 100 })
    );
    assert_eq!(result.publishes, 100);
    assert_eq!(f.published.count(), 100);
}

#[tokio::test]
async fn handled_quota_error_keeps_run_successful() {
    let f = fixture(RuntimeLimits {
        max_publishes: 2,
        ..limits()
    })
    .await;
    let source = r#"
        for i in 0..5 {
            try { mqtt.publish("out", #{i: i}, 1, false); } catch (e) { log.warn(e); }
        }
        log.info("done");
    "#;
    let result = f.runtime.execute(script("polite", source), &event()).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.publishes, 2);
    let warns = result
        .logs
        .iter()
        .filter(|l| l.level == LogLevel::Warn)
        .count();
    assert_eq!(warns, 3);

    let sent = f.published.0.lock().unwrap().clone();
    assert_eq!(sent[0].payload, r#"{"i":0}"#);
    assert_eq!(sent[0].qos, 1);
    assert_eq!(sent[0].source_script, "polite");
}

#[tokio::test]
async fn invalid_publish_arguments_are_script_errors() {
    let f = fixture(limits()).await;
    let wildcard = f
        .runtime
        .execute(script("w", r#"mqtt.publish("a/#", "x");"#), &event())
        .await;
    assert_eq!(wildcard.status, ExecutionStatus::Failed);
    let qos = f
        .runtime
        .execute(script("q", r#"mqtt.publish("a", "x", 3, false);"#), &event())
        .await;
    assert_eq!(qos.status, ExecutionStatus::Failed);
    assert_eq!(f.published.count(), 0);
}

#[tokio::test]
async fn thrown_errors_are_runtime_failures() {
    let f = fixture(limits()).await;
    let result = f
        .runtime
        .execute(script("thrower", r#"log.info("before"); throw "bad thing";"#), &event())
        .await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    let message = result.error_message().unwrap();
    assert!(message.contains("bad thing"), "{message}");

    let recorded = messages(&f.logs, "thrower").await;
    assert_eq!(recorded.len(), 2);
    assert!(recorded[0].starts_with("execution failed: runtime error"));
    assert_eq!(recorded[1], "before");
}

#[tokio::test]
async fn runaway_recursion_is_contained() {
    let f = fixture(RuntimeLimits {
        max_call_depth: 8,
        ..limits()
    })
    .await;
    let result = f
        .runtime
        .execute(script("deep", "fn down(n) { down(n + 1) } down(0);"), &event())
        .await;
    assert_eq!(result.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn recursion_at_default_depth_fails_cleanly() {
    let f = fixture(RuntimeLimits::default()).await;
    let source = "fn down(n) { let a = [n, n, n]; let m = #{x: a}; down(n + 1) + 1 } down(0);";
    let result = f.runtime.execute(script("frames", source), &event()).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    match result.error {
        Some(ExecutionError::Runtime(message)) => {
            assert!(message.contains("Stack overflow"), "{message}")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let after = f
        .runtime
        .execute(script("after", "let x = 1 + 1;"), &event())
        .await;
    assert!(after.success);
}

#[tokio::test]
async fn oversized_call_depth_is_capped() {
    let f = fixture(RuntimeLimits {
        max_call_depth: 5000,
        ..limits()
    })
    .await;
    let result = f
        .runtime
        .execute(script("deep", "fn down(n) { down(n + 1) } down(0);"), &event())
        .await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error.unwrap().kind(), ErrorKind::Runtime);
}

#[tokio::test]
async fn host_panics_are_recovered() {
    let db = Database::open_in_memory().await.unwrap();
    let runtime = ScriptRuntime::new(
        limits(),
        Arc::new(StateStore::detached()),
        Arc::new(SqliteLogSink::new(db)),
        Arc::new(Exploding),
    );
    let result = runtime
        .execute(script("p", r#"mqtt.publish("a", "b");"#), &event())
        .await;
    assert_eq!(result.status, ExecutionStatus::Panicked);
    assert_eq!(result.error.unwrap().kind(), ErrorKind::Runtime);
}

#[tokio::test]
async fn event_is_exposed_read_only() {
    let f = fixture(limits()).await;
    let reader = r#"
        if event.topic != "sensors/t1" || msg.clientId != "c1" || event["type"] != "on_publish" {
            throw "unexpected event";
        }
        state.set("payload", parse_float(msg.payload));
    "#;
    let result = f.runtime.execute(script("reader", reader), &event()).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        f.state.get(&StateScope::Script("reader".into()), "payload"),
        Some(json!(21.5))
    );

    let writer = f
        .runtime
        .execute(script("writer", r#"event.topic = "x";"#), &event())
        .await;
    assert!(!writer.success);
}

#[tokio::test]
async fn user_logs_are_recorded_in_call_order() {
    let f = fixture(limits()).await;
    let source = r#"log.info("a"); log.error("b", #{code: 7}); print("c");"#;
    let result = f.runtime.execute(script("logger", source), &event()).await;
    assert!(result.success);

    let page = f.logs.list_logs("logger", 1, 10, None).await.unwrap();
    let recorded: Vec<&str> = page.entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(recorded, vec!["c", "b", "a"]);
    assert_eq!(page.entries[1].context, Some(json!({"code": 7})));
    assert_eq!(page.entries[1].level, LogLevel::Error);
}

#[tokio::test]
async fn test_execution_persists_nothing() {
    let f = fixture(limits()).await;
    let scope = StateScope::Script("dry".into());
    f.state.set(&scope, "n", json!(10), None);

    let source = r#"
        state.set("n", state.get("n") + 1);
        mqtt.publish("out", "" + state.get("n"));
        log.info("ran");
    "#;
    let run = f.runtime.test_execute(script("dry", source), &event()).await;
    assert!(run.result.success, "{:?}", run.result.error);
    assert_eq!(run.published.len(), 1);
    assert_eq!(run.published[0].payload, "11");

    assert_eq!(f.state.get(&scope, "n"), Some(json!(10)));
    assert_eq!(f.published.count(), 0);
    assert!(messages(&f.logs, "dry").await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_all_kills_running_interpreters() {
    let f = fixture(limits()).await;
    let long = Arc::new(Script::new("long", "loop { }").with_timeout_ms(30_000));
    let runtime = Arc::clone(&f.runtime);
    let handle = tokio::spawn(async move { runtime.execute(long, &event()).await });

    let deadline = Instant::now() + Duration::from_secs(5);
    while f.runtime.in_flight() == 0 {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(f.runtime.terminate_all(), 1);

    let result = handle.await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(f.runtime.in_flight(), 0);
}
