use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::{Engine, OpContext};
use crate::error::{CloudError, Result};
use crate::registry::{status, ClassSpec};
use crate::state::models::{ResourceRecord, SubtaskRecord, TaskRecord};

/// What a stage handler wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Move to the named stage and run it right away.
    Next(String),
    /// Move to the named stage once every subtask spawned during this
    /// stage is terminal. Without subtasks this behaves like `Next`.
    Wait(String),
    /// Finish successfully with a result blob.
    Complete(Value),
}

impl StageOutcome {
    pub fn next(stage: &str) -> Self {
        StageOutcome::Next(stage.to_string())
    }

    pub fn wait(stage: &str) -> Self {
        StageOutcome::Wait(stage.to_string())
    }

    pub fn done() -> Self {
        StageOutcome::Complete(Value::Null)
    }
}

/// State a stage handler works with: the engine, the persisted task and
/// any subtasks requested during the current stage.
pub struct TaskContext {
    pub cx: OpContext,
    pub task: TaskRecord,
    pub(crate) pending: Vec<TaskRecord>,
}

impl TaskContext {
    pub fn new(cx: OpContext, task: TaskRecord) -> Self {
        Self {
            cx,
            task,
            pending: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.cx.engine
    }

    pub fn spec(&self) -> Result<Arc<ClassSpec>> {
        self.cx.engine.spec(&self.task.obj_class)
    }

    /// Current state of the target record.
    pub async fn target(&self) -> Result<ResourceRecord> {
        let spec = self.spec()?;
        self.cx.engine.load(&spec, &self.task.obj_id).await
    }

    /// Target record, or `None` once it is gone.
    pub async fn try_target(&self) -> Result<Option<ResourceRecord>> {
        let spec = self.spec()?;
        self.cx.engine.store.get_resource(&spec, &self.task.obj_id).await
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.task.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    pub fn param_bool(&self, key: &str) -> bool {
        self.param(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Queue a child task on `record`. It starts once this stage returns
    /// [`StageOutcome::Wait`], registered against the waiting stage.
    pub fn spawn_subtask(&mut self, kind: &str, record: &ResourceRecord, params: Value) {
        let mut child = TaskRecord::new(kind, &record.class, &record.id, &record.name);
        child.params = params;
        child.parent_id = Some(self.task.id.clone());
        child.user_id = self.task.user_id.clone();
        child.domain_id = self.task.domain_id.clone();
        child.project_id = self.task.project_id.clone();
        self.pending.push(child);
    }

    /// Subtasks registered for the current stage.
    pub async fn subtasks(&self) -> Result<Vec<SubtaskRecord>> {
        self.cx
            .engine
            .store
            .list_subtasks(&self.task.id, &self.task.stage)
            .await
    }

    pub async fn set_target_status(&self, status: &str, reason: &str) -> Result<()> {
        let spec = self.spec()?;
        self.cx
            .engine
            .store
            .set_status(&spec, &self.task.obj_id, status, reason)
            .await
    }

    /// Put the target back into its class's ready status.
    pub async fn target_ready(&self) -> Result<()> {
        let spec = self.spec()?;
        self.set_target_status(spec.statuses.ready, "").await
    }

    pub(crate) fn advance(&mut self, next: &str) {
        let finished = std::mem::replace(&mut self.task.stage, next.to_string());
        self.task.stages.push(crate::state::models::StageEntry {
            stage: finished,
            complete_at: chrono::Utc::now().to_rfc3339(),
        });
    }
}

/// One kind of task: a named sequence of stages driving one target.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Operation name; a failure leaves the target in `<op>_failed`.
    fn op(&self) -> &'static str;

    /// Status the target takes while the task runs.
    fn in_progress_status(&self, _spec: &ClassSpec) -> Option<&'static str> {
        None
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome>;

    /// Leave the target in a consistent failed state.
    async fn on_failure(&self, tcx: &mut TaskContext, error: &CloudError) -> Result<()> {
        if !tcx.cx.engine.registry.contains(&tcx.task.obj_class) {
            return Ok(());
        }
        match tcx
            .set_target_status(&status::failed(self.op()), &error.to_string())
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}
