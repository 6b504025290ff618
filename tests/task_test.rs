use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cloudmirror::config::types::EngineConfig;
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::error::{CloudError, Result};
use cloudmirror::resources::{service, CreateInput};
use cloudmirror::state::models::{subtask_status, ResourceRecord, TaskFilter, TaskRecord};
use cloudmirror::state::sqlite::SqliteBackend;
use cloudmirror::task::{StageOutcome, TaskContext, TaskHandler};

struct TwoStepTask;

#[async_trait]
impl TaskHandler for TwoStepTask {
    fn kind(&self) -> &'static str {
        "TwoStepTask"
    }

    fn op(&self) -> &'static str {
        "twostep"
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        match stage {
            "on_init" => Ok(StageOutcome::next("on_step")),
            "on_step" => Ok(StageOutcome::Complete(json!({ "echo": tcx.param_str("word") }))),
            other => Err(CloudError::general(format!("unexpected stage {}", other))),
        }
    }
}

struct FanOutTask;

#[async_trait]
impl TaskHandler for FanOutTask {
    fn kind(&self) -> &'static str {
        "FanOutTask"
    }

    fn op(&self) -> &'static str {
        "fanout"
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        match stage {
            "on_init" => {
                let target = tcx.target().await?;
                for word in ["a", "b", "c"] {
                    tcx.spawn_subtask("TwoStepTask", &target, json!({ "word": word }));
                }
                Ok(StageOutcome::wait("on_children"))
            }
            "on_children" => {
                let subtasks = tcx.subtasks().await?;
                let complete = subtasks
                    .iter()
                    .filter(|s| s.status == subtask_status::COMPLETE)
                    .count();
                Ok(StageOutcome::Complete(json!({ "complete": complete })))
            }
            other => Err(CloudError::general(format!("unexpected stage {}", other))),
        }
    }
}

struct FailingTask;

#[async_trait]
impl TaskHandler for FailingTask {
    fn kind(&self) -> &'static str {
        "FailingTask"
    }

    fn op(&self) -> &'static str {
        "explode"
    }

    async fn on_stage(&self, _tcx: &mut TaskContext, _stage: &str) -> Result<StageOutcome> {
        Err(CloudError::general("remote said no"))
    }
}

struct SlowTask;

#[async_trait]
impl TaskHandler for SlowTask {
    fn kind(&self) -> &'static str {
        "SlowTask"
    }

    fn op(&self) -> &'static str {
        "slow"
    }

    async fn on_stage(&self, _tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        match stage {
            "on_init" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(StageOutcome::next("on_finish"))
            }
            _ => Ok(StageOutcome::done()),
        }
    }
}

async fn setup() -> (Arc<Engine>, ResourceRecord) {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    engine.tasks.register(Arc::new(TwoStepTask));
    engine.tasks.register(Arc::new(FanOutTask));
    engine.tasks.register(Arc::new(FailingTask));
    engine.tasks.register(Arc::new(SlowTask));

    let cx = OpContext::system(&engine);
    let (record, _) = service::create(&cx, "global_network", CreateInput::new("backbone"))
        .await
        .unwrap();
    engine.tasks.wait_idle().await;
    (engine, record)
}

fn task_on(kind: &str, record: &ResourceRecord, params: Value) -> TaskRecord {
    let mut task = TaskRecord::new(kind, &record.class, &record.id, &record.name);
    task.params = params;
    task
}

#[tokio::test]
async fn test_stages_run_in_order() {
    let (engine, record) = setup().await;

    let task = engine
        .tasks
        .start(&engine, task_on("TwoStepTask", &record, json!({ "word": "hi" })))
        .await
        .unwrap();
    let done = engine.tasks.wait_for(&engine, &task.id).await.unwrap();

    assert_eq!(done.status, "done");
    assert_eq!(done.stage, "complete");
    let stages: Vec<&str> = done.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["on_init", "on_step"]);
    assert_eq!(done.result, json!({ "echo": "hi" }));
    assert!(done.start_at.is_some());
    assert!(done.end_at.is_some());
}

#[tokio::test]
async fn test_parent_resumes_after_subtasks() {
    let (engine, record) = setup().await;

    let parent = engine
        .tasks
        .start(&engine, task_on("FanOutTask", &record, Value::Null))
        .await
        .unwrap();
    let done = engine.tasks.wait_for(&engine, &parent.id).await.unwrap();
    assert_eq!(done.status, "done", "{:?}", done.failed_reasons);
    assert_eq!(done.result, json!({ "complete": 3 }));

    engine.tasks.wait_idle().await;
    let children = engine
        .tasks
        .list(
            &engine,
            &TaskFilter {
                parent_id: Some(parent.id.clone()),
                ..TaskFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|c| c.status == "done"));
}

#[tokio::test]
async fn test_failure_marks_target() {
    let (engine, record) = setup().await;
    let cx = OpContext::system(&engine);

    let task = engine
        .tasks
        .start(&engine, task_on("FailingTask", &record, Value::Null))
        .await
        .unwrap();
    let failed = engine.tasks.wait_for(&engine, &task.id).await.unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.failed_reasons, vec!["general(remote said no)".to_string()]);
    assert_eq!(failed.result["code"], "general");

    let record = service::get(&cx, "global_network", &record.id).await.unwrap();
    assert_eq!(record.status, "explode_failed");
    assert_eq!(record.status_reason, "general(remote said no)");
}

#[tokio::test]
async fn test_cancel_stops_at_stage_boundary() {
    let (engine, record) = setup().await;

    let task = engine
        .tasks
        .start(&engine, task_on("SlowTask", &record, Value::Null))
        .await
        .unwrap();
    engine.tasks.cancel(&engine, &task.id).await.unwrap();
    let cancelled = engine.tasks.wait_for(&engine, &task.id).await.unwrap();
    assert_eq!(cancelled.status, "cancelled");

    let err = engine.tasks.cancel(&engine, "no-such-task").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unknown_kind_is_refused() {
    let (engine, record) = setup().await;
    let err = engine
        .tasks
        .start(&engine, task_on("NoSuchTask", &record, Value::Null))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_supported");

    let listed = engine
        .tasks
        .list(
            &engine,
            &TaskFilter {
                obj_id: Some(record.id.clone()),
                ..TaskFilter::default()
            },
        )
        .await
        .unwrap();
    assert!(listed.iter().all(|t| t.kind != "NoSuchTask"));
}

#[tokio::test]
async fn test_builtin_kinds_are_registered() {
    let (engine, _record) = setup().await;
    let kinds = engine.tasks.kinds();
    for kind in [
        "ResourceCreateTask",
        "ResourceDeleteTask",
        "ProviderSyncTask",
        "DnsZoneSyncRecordSetsTask",
    ] {
        assert!(kinds.contains(&kind), "missing {}", kind);
    }
}
