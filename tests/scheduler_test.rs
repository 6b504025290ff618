use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use cloudmirror::config::types::EngineConfig;
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::identity::Identity;
use cloudmirror::resources::{service, CreateInput};
use cloudmirror::scheduler;
use cloudmirror::state::models::ResourceRecord;
use cloudmirror::state::sqlite::SqliteBackend;
use cloudmirror::timer::Timer;

async fn setup() -> (Arc<Engine>, ResourceRecord) {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let cx = OpContext::system(&engine);
    let (record, task_id) = service::create(&cx, "global_network", CreateInput::new("backbone"))
        .await
        .unwrap();
    if let Some(task_id) = task_id {
        engine.tasks.wait_for(&engine, &task_id).await.unwrap();
    }
    (engine, record)
}

#[tokio::test]
async fn test_due_entry_runs_and_advances() {
    let (engine, record) = setup().await;
    let cx = OpContext::system(&engine);

    let scheduled = scheduler::schedule(
        &cx,
        "nightly-disable",
        "global_network",
        "backbone",
        "disable",
        json!({}),
        Timer::daily(3, 0),
    )
    .await
    .unwrap();
    assert!(scheduled.enabled);
    let first = scheduled.timer.next_time.unwrap();
    assert!(first > Utc::now());

    // Nothing is due yet.
    let report = scheduler::tick(&engine, Utc::now()).await.unwrap();
    assert!(report.ran.is_empty());

    let now = first + Duration::minutes(1);
    let report = scheduler::tick(&engine, now).await.unwrap();
    assert_eq!(report.ran, vec![scheduled.id.clone()]);
    assert!(report.failed.is_empty());

    let record = service::get(&cx, "global_network", &record.id).await.unwrap();
    assert!(!record.enabled);

    let stored = engine.store.list_scheduled(false).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].timer.next_time, Some(first + Duration::days(1)));
    assert_eq!(stored[0].last_result, "done");
    assert!(stored[0].last_run_at.is_some());

    // Already advanced, so the same instant does not fire twice.
    let report = scheduler::tick(&engine, now).await.unwrap();
    assert!(report.ran.is_empty());
}

#[tokio::test]
async fn test_once_entry_expires_after_running() {
    let (engine, _record) = setup().await;
    let cx = OpContext::system(&engine);
    let at = Utc::now() + Duration::hours(1);

    let scheduled = scheduler::schedule(
        &cx,
        "one-shot",
        "global_network",
        "backbone",
        "enable",
        json!({}),
        Timer::once(at),
    )
    .await
    .unwrap();

    let report = scheduler::tick(&engine, at).await.unwrap();
    assert_eq!(report.ran, vec![scheduled.id.clone()]);
    assert_eq!(report.expired, vec![scheduled.id.clone()]);

    assert!(engine.store.list_scheduled(true).await.unwrap().is_empty());
    let report = scheduler::tick(&engine, at + Duration::days(1)).await.unwrap();
    assert!(report.ran.is_empty());
}

#[tokio::test]
async fn test_failed_action_is_reported() {
    let (engine, record) = setup().await;
    let cx = OpContext::system(&engine);
    let scheduled = scheduler::schedule(
        &cx,
        "doomed",
        "global_network",
        "backbone",
        "disable",
        json!({}),
        Timer::daily(0, 0),
    )
    .await
    .unwrap();

    let task_id = service::delete(&cx, "global_network", &record.id).await.unwrap();
    if let Some(task_id) = task_id {
        engine.tasks.wait_for(&engine, &task_id).await.unwrap();
    }

    let now = scheduled.timer.next_time.unwrap();
    let report = scheduler::tick(&engine, now).await.unwrap();
    assert_eq!(report.failed, vec![scheduled.id.clone()]);
    let stored = engine.store.list_scheduled(false).await.unwrap();
    assert!(stored[0].last_result.contains("not_found"));
}

#[tokio::test]
async fn test_schedule_validation() {
    let (engine, _record) = setup().await;
    let cx = OpContext::system(&engine);

    let err = scheduler::schedule(
        &cx,
        "bad-action",
        "global_network",
        "backbone",
        "explode",
        json!({}),
        Timer::daily(1, 0),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "not_supported");

    let err = scheduler::schedule(
        &cx,
        "bad-timer",
        "global_network",
        "backbone",
        "disable",
        json!({}),
        Timer::weekly(1, 0, &[9]),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "input_parameter");

    let err = scheduler::schedule(
        &cx,
        "missing",
        "global_network",
        "nope",
        "disable",
        json!({}),
        Timer::daily(1, 0),
    )
    .await
    .unwrap_err();
    assert!(err.is_not_found());

    let member = OpContext::new(&engine, Identity::member("default", "p1"));
    let err = scheduler::schedule(
        &member,
        "not-admin",
        "global_network",
        "backbone",
        "disable",
        json!({}),
        Timer::daily(1, 0),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "forbidden");
}
