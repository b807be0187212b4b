// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end dispatch scenarios over a real SQLite database.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use mqhook_core::{Event, LogLevel, Script, StateScope, TriggerType};
use mqhook_engine::SkipReason;
use mqhook_sandbox::{ExecutionError, ExecutionStatus};
use mqhook_test_utils::TestHarness;
use mqhook_test_utils::fixtures::{on_event, on_publish, on_publish_at, publish_event};
use serde_json::json;

#[tokio::test]
async fn counter_increments_once_per_event() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "incr",
            "#",
            r#"state.set("n", (state.get("n") ?? 0) + 1);"#,
        ))
        .build()
        .await
        .unwrap();

    for i in 0..3 {
        let results = h.publish(&format!("sensors/{i}"), "x").await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success, "{:?}", results[0].error);
    }
    assert_eq!(h.script_state("incr", "n"), Some(json!(3)));
}

#[tokio::test]
async fn busy_script_times_out() {
    let slow = on_publish(
        "slow",
        "#",
        r#"let start = timestamp(); while start.elapsed < 0.5 { }"#,
    )
    .with_timeout_ms(100);
    let h = TestHarness::builder().with_script(slow).build().await.unwrap();

    let begun = Instant::now();
    let results = h.publish("a", "x").await.unwrap();
    assert!(begun.elapsed() < Duration::from_millis(450));
    assert!(!results[0].success);
    assert_eq!(
        results[0].error_message().as_deref(),
        Some("execution timeout after 100ms")
    );
}

#[tokio::test]
async fn flood_is_cut_off_at_quota() {
    let h = TestHarness::builder()
        .with_max_publishes(100)
        .with_script(on_publish(
            "flood",
            "in/#",
            r#"for i in 0..150 { mqtt.publish("out/flood", "" + i); }"#,
        ))
        .build()
        .await
        .unwrap();

    let results = h.publish("in/x", "go").await.unwrap();
    assert_eq!(
        results[0].error,
        Some(ExecutionError::QuotaExceeded { limit: 100 })
    );
    assert_eq!(h.publisher.count(), 100);
    assert_eq!(h.publisher.messages()[99].payload, "99");
}

#[tokio::test]
async fn launch_order_follows_priority() {
    let h = TestHarness::builder()
        .with_script(on_publish_at("late", "sensors/#", 100, r#"log.info("late");"#))
        .with_script(on_publish_at("early", "sensors/#", 50, r#"log.info("early");"#))
        .build()
        .await
        .unwrap();

    let dispatch = h
        .engine
        .execute_for_trigger(TriggerType::OnPublish, "sensors/t1", publish_event("sensors/t1", "1"))
        .unwrap();
    assert_eq!(dispatch.launched(), ["early", "late"]);
    assert_eq!(h.observer.launches(), vec!["early", "late"]);

    assert!(
        h.observer
            .wait_for_completions(2, Duration::from_secs(5))
            .await
    );
    let completed: BTreeSet<String> = h
        .observer
        .completions()
        .into_iter()
        .map(|r| r.script_id)
        .collect();
    assert_eq!(completed, BTreeSet::from(["early".to_string(), "late".to_string()]));
    dispatch.join().await;
}

#[tokio::test]
async fn own_publish_does_not_retrigger() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "echo",
            "chat/#",
            r#"mqtt.publish(event.topic, event.payload);"#,
        ))
        .build()
        .await
        .unwrap();

    let first = h.publish("chat/room", "hi").await.unwrap();
    assert_eq!(first.len(), 1);
    let echoed = h.publisher.take();
    assert_eq!(echoed.len(), 1);

    let reinjected = echoed[0].to_event();
    let dispatch = h
        .engine
        .execute_for_trigger(TriggerType::OnPublish, "chat/room", reinjected)
        .unwrap();
    assert!(dispatch.is_empty());
    assert_eq!(
        h.observer.skips(),
        vec![("echo".to_string(), SkipReason::SelfTrigger)]
    );
    assert_eq!(h.publisher.count(), 0);
}

#[tokio::test]
async fn other_scripts_still_see_a_scripts_publish() {
    let h = TestHarness::builder()
        .with_script(on_publish("echo", "chat/#", r#"log.info("echo ran");"#))
        .with_script(on_publish("audit", "chat/#", r#"log.info("audit ran");"#))
        .build()
        .await
        .unwrap();

    let event = publish_event("chat/room", "hi").published_by("echo");
    let results = h
        .fire(TriggerType::OnPublish, "chat/room", event)
        .await
        .unwrap();
    let ran: Vec<&str> = results.iter().map(|r| r.script_id.as_str()).collect();
    assert_eq!(ran, vec!["audit"]);
}

#[tokio::test]
async fn non_topic_events_match_unfiltered_triggers() {
    let h = TestHarness::builder()
        .with_script(on_event(
            "greeter",
            TriggerType::OnConnect,
            r#"globals.set("last_client", event.clientId);"#,
        ))
        .build()
        .await
        .unwrap();

    let results = h
        .fire(TriggerType::OnConnect, "", Event::connect("dev-7"))
        .await
        .unwrap();
    assert!(results[0].success);
    assert_eq!(
        h.engine.get_state(&StateScope::Global, "last_client"),
        Some(json!("dev-7"))
    );
    assert!(h.publish("any/topic", "x").await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_state_reads_as_absent_before_any_flush() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "ttl",
            "#",
            r#"state.set("token", "abc", #{ttl: 1});"#,
        ))
        .build()
        .await
        .unwrap();

    h.publish("t", "x").await.unwrap();
    assert_eq!(h.script_state("ttl", "token"), Some(json!("abc")));
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(h.script_state("ttl", "token"), None);
    assert!(
        h.engine
            .state_keys(&StateScope::Script("ttl".into()))
            .is_empty()
    );
}

#[tokio::test]
async fn state_survives_shutdown_and_restart() {
    let h = TestHarness::builder()
        .with_script(on_publish("keeper", "#", r#"state.set("kept", #{v: 42});"#))
        .build()
        .await
        .unwrap();

    h.publish("t", "x").await.unwrap();
    let h = h.restart().await.unwrap();
    assert_eq!(h.script_state("keeper", "kept"), Some(json!({"v": 42})));
}

#[tokio::test]
async fn compile_is_idempotent_and_side_effect_free() {
    let h = TestHarness::builder().build().await.unwrap();
    let source = r#"state.set("x", 1); let = 5;"#;
    let first = h.engine.compile(source).unwrap_err();
    let second = h.engine.compile(source).unwrap_err();
    assert_eq!(first, second);
    assert!(h.engine.state().is_empty());
    assert!(h.engine.compile(r#"state.set("x", 1);"#).is_ok());
    assert!(h.engine.state().is_empty());
}

#[tokio::test]
async fn failures_are_logged_with_summary() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "broken",
            "#",
            r#"log.warn("about to fail"); let x = undefined_fn();"#,
        ))
        .build()
        .await
        .unwrap();

    let results = h.publish("t", "x").await.unwrap();
    assert_eq!(results[0].status, ExecutionStatus::Failed);

    let page = h.engine.list_logs("broken", 1, 10, None).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.entries[0].level, LogLevel::Error);
    assert!(page.entries[0].message.starts_with("execution failed:"));
    assert_eq!(page.entries[1].message, "about to fail");

    let errors = h
        .engine
        .list_logs("broken", 1, 10, Some(LogLevel::Error))
        .await
        .unwrap();
    assert_eq!(errors.total, 1);
    let counts = h.engine.log_counts(Some("broken")).await.unwrap();
    assert_eq!(counts[&LogLevel::Warn], 1);
    assert_eq!(counts[&LogLevel::Error], 1);
}

#[tokio::test]
async fn test_execution_leaves_no_trace() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "trial",
            "#",
            r#"state.set("n", 1); mqtt.publish("out", "trial"); log.info("trying");"#,
        ))
        .build()
        .await
        .unwrap();

    let run = h
        .engine
        .test_execute("trial", publish_event("t", "x"))
        .await
        .unwrap();
    assert!(run.result.success);
    assert_eq!(run.published.len(), 1);
    assert_eq!(run.result.logs.len(), 1);

    assert_eq!(h.script_state("trial", "n"), None);
    assert_eq!(h.publisher.count(), 0);
    assert_eq!(h.engine.list_logs("trial", 1, 10, None).await.unwrap().total, 0);

    let missing = h.engine.test_execute("nope", publish_event("t", "x")).await;
    assert!(missing.is_err());

    let draft = h
        .engine
        .test_script(Script::new("draft", r#"log.info("draft");"#), publish_event("t", "x"))
        .await;
    assert!(draft.result.success);
}

#[tokio::test]
async fn purge_removes_state_and_logs() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "doomed",
            "#",
            r#"state.set("a", 1); state.set("b", 2); log.info("hi");"#,
        ))
        .build()
        .await
        .unwrap();
    h.publish("t", "x").await.unwrap();
    h.engine.state().flush_dirty().await.unwrap();

    let report = h.engine.purge_script("doomed").await.unwrap();
    assert_eq!(report.log_entries, 1);
    assert_eq!(report.state_entries, 2);
    assert!(
        h.engine
            .state_keys(&StateScope::Script("doomed".into()))
            .is_empty()
    );

    let h = h.restart().await.unwrap();
    assert_eq!(h.script_state("doomed", "a"), None);
}

#[tokio::test]
async fn admin_state_operations() {
    let h = TestHarness::builder()
        .with_script(on_publish(
            "kv",
            "#",
            r#"state.set("a", 1); state.set("b", "two"); globals.set("g", true);"#,
        ))
        .build()
        .await
        .unwrap();
    h.publish("t", "x").await.unwrap();

    let scope = StateScope::Script("kv".into());
    assert_eq!(h.engine.state_keys(&scope), vec!["a", "b"]);
    assert!(h.engine.delete_state_key(&scope, "a"));
    assert!(!h.engine.delete_state_key(&scope, "a"));
    assert_eq!(h.engine.state_entries(&scope).len(), 1);
    assert_eq!(h.engine.state_keys(&StateScope::Global), vec!["g"]);
    assert_eq!(h.engine.clear_logs("kv").await.unwrap(), 0);
}
