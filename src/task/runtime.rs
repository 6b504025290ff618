use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use super::handler::{StageOutcome, TaskContext, TaskHandler};
use crate::engine::{Engine, OpContext};
use crate::error::{CloudError, Result};
use crate::identity::Identity;
use crate::state::models::{subtask_status, task_status, SubtaskRecord, TaskFilter, TaskRecord};

/// Process-local task pool. Tasks are persisted first and then driven stage
/// by stage on a bounded set of workers.
pub struct TaskManager {
    handlers: RwLock<BTreeMap<&'static str, Arc<dyn TaskHandler>>>,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    changed: Notify,
}

impl TaskManager {
    pub fn new(workers: usize) -> Self {
        let manager = Self {
            handlers: RwLock::new(BTreeMap::new()),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: AtomicUsize::new(0),
            changed: Notify::new(),
        };
        for handler in super::builtin_handlers() {
            manager.register(handler);
        }
        manager
    }

    pub fn register(&self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handler.kind(), handler);
    }

    pub fn handler(&self, kind: &str) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(kind)
            .cloned()
            .ok_or_else(|| CloudError::not_supported(format!("task kind {}", kind)))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Persist `task`, move its target into the in-progress status and
    /// queue it on the pool.
    pub async fn start(&self, engine: &Arc<Engine>, task: TaskRecord) -> Result<TaskRecord> {
        let handler = self.handler(&task.kind)?;
        if let Ok(spec) = engine.spec(&task.obj_class) {
            if let Some(status) = handler.in_progress_status(&spec) {
                engine
                    .store
                    .set_status(&spec, &task.obj_id, status, "")
                    .await?;
            }
        }
        engine.store.insert_task(&task).await?;
        debug!(task = %task.id, kind = %task.kind, target = %task.obj_id, "Task queued");
        self.dispatch(engine, task.id.clone());
        Ok(task)
    }

    /// Ask a task to stop at its next stage boundary.
    pub async fn cancel(&self, engine: &Arc<Engine>, task_id: &str) -> Result<()> {
        if !engine.store.request_cancel(task_id).await? {
            return Err(CloudError::not_found("task", task_id));
        }
        info!(task = task_id, "Cancel requested");
        Ok(())
    }

    pub async fn list(&self, engine: &Arc<Engine>, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        engine.store.list_tasks(filter).await
    }

    /// Wait until `task_id` reaches a terminal status.
    pub async fn wait_for(&self, engine: &Arc<Engine>, task_id: &str) -> Result<TaskRecord> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let task = engine
                .store
                .get_task(task_id)
                .await?
                .ok_or_else(|| CloudError::not_found("task", task_id))?;
            if task.is_terminal() {
                return Ok(task);
            }
            notified.await;
        }
    }

    /// Wait until no task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn dispatch(&self, engine: &Arc<Engine>, task_id: String) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let engine = engine.clone();
        tokio::spawn(async move {
            let tasks = &engine.tasks;
            match tasks.permits.clone().acquire_owned().await {
                Ok(_permit) => {
                    if let Err(e) = tasks.run(&engine, &task_id).await {
                        error!(task = %task_id, error = %e, "Task runtime error");
                    }
                }
                Err(_) => warn!(task = %task_id, "Task pool closed"),
            }
            tasks.in_flight.fetch_sub(1, Ordering::SeqCst);
            tasks.changed.notify_waiters();
        });
    }

    /// Drive a task until it finishes, fails, or parks waiting on subtasks.
    async fn run(&self, engine: &Arc<Engine>, task_id: &str) -> Result<()> {
        let Some(task) = engine.store.get_task(task_id).await? else {
            return Ok(());
        };
        if task.is_terminal() {
            return Ok(());
        }
        let handler = self.handler(&task.kind)?;
        let mut identity = Identity::system();
        identity.user_id = task.user_id.clone();
        let mut tcx = TaskContext::new(OpContext::new(engine, identity), task);

        tcx.task.status = task_status::RUNNING.to_string();
        if tcx.task.start_at.is_none() {
            tcx.task.start_at = Some(chrono::Utc::now().to_rfc3339());
        }
        engine.store.update_task(&tcx.task).await?;
        self.changed.notify_waiters();

        loop {
            let cancelled = engine
                .store
                .get_task(task_id)
                .await?
                .map(|t| t.cancel_requested)
                .unwrap_or(false);
            if cancelled {
                let reason = CloudError::general("task cancelled");
                return self
                    .finish_failed(engine, &handler, tcx, reason, task_status::CANCELLED)
                    .await;
            }

            let stage = tcx.task.stage.clone();
            debug!(task = task_id, kind = %tcx.task.kind, stage = %stage, "Running stage");
            match handler.on_stage(&mut tcx, &stage).await {
                Err(e) => {
                    return self
                        .finish_failed(engine, &handler, tcx, e, task_status::FAILED)
                        .await;
                }
                Ok(StageOutcome::Next(next)) => {
                    tcx.advance(&next);
                    engine.store.update_task(&tcx.task).await?;
                }
                Ok(StageOutcome::Wait(next)) => {
                    tcx.advance(&next);
                    if tcx.pending.is_empty() {
                        engine.store.update_task(&tcx.task).await?;
                        continue;
                    }
                    return self.park(engine, tcx).await;
                }
                Ok(StageOutcome::Complete(result)) => {
                    tcx.advance("complete");
                    tcx.task.status = task_status::DONE.to_string();
                    tcx.task.result = result;
                    tcx.task.end_at = Some(chrono::Utc::now().to_rfc3339());
                    engine.store.update_task(&tcx.task).await?;
                    info!(task = task_id, kind = %tcx.task.kind, target = %tcx.task.obj_name, "Task done");
                    return self.notify_parent(engine, &tcx.task).await;
                }
            }
        }
    }

    /// Register pending subtasks against the current stage, park the parent,
    /// then start the children.
    async fn park(&self, engine: &Arc<Engine>, mut tcx: TaskContext) -> Result<()> {
        let children = std::mem::take(&mut tcx.pending);
        tcx.task.status = task_status::WAITING.to_string();
        engine.store.update_task(&tcx.task).await?;
        for child in &children {
            engine
                .store
                .insert_subtask(&SubtaskRecord {
                    task_id: tcx.task.id.clone(),
                    stage: tcx.task.stage.clone(),
                    subtask_id: child.id.clone(),
                    status: subtask_status::INIT.to_string(),
                    result: Value::Null,
                })
                .await?;
        }
        debug!(task = %tcx.task.id, stage = %tcx.task.stage, subtasks = children.len(), "Waiting on subtasks");
        for child in children {
            self.start(engine, child).await?;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn finish_failed(
        &self,
        engine: &Arc<Engine>,
        handler: &Arc<dyn TaskHandler>,
        mut tcx: TaskContext,
        reason: CloudError,
        status: &str,
    ) -> Result<()> {
        warn!(task = %tcx.task.id, kind = %tcx.task.kind, stage = %tcx.task.stage, error = %reason, "Task failed");
        tcx.task.failed_reasons.push(reason.to_string());
        if let Err(e) = handler.on_failure(&mut tcx, &reason).await {
            error!(task = %tcx.task.id, error = %e, "Failure hook failed");
        }
        tcx.task.status = status.to_string();
        tcx.task.end_at = Some(chrono::Utc::now().to_rfc3339());
        tcx.task.result = serde_json::json!({ "error": reason.to_string(), "code": reason.code() });
        engine.store.update_task(&tcx.task).await?;
        self.notify_parent(engine, &tcx.task).await
    }

    /// Record a terminal child against its parent and resume the parent
    /// when its whole stage is done. Runs under the parent's raw task lock
    /// so exactly one child resumes it.
    async fn notify_parent(&self, engine: &Arc<Engine>, child: &TaskRecord) -> Result<()> {
        self.changed.notify_waiters();
        let Some(ref parent_id) = child.parent_id else {
            return Ok(());
        };
        let cx = OpContext::system(engine);
        let _guard = engine.locks.lock_raw(&cx.unit, "tasks", parent_id).await;

        let status = if child.status == task_status::DONE {
            subtask_status::COMPLETE
        } else {
            subtask_status::FAIL
        };
        engine
            .store
            .set_subtask_status(parent_id, &child.id, status, &child.result)
            .await?;

        let Some(mut parent) = engine.store.get_task(parent_id).await? else {
            return Ok(());
        };
        if parent.status != task_status::WAITING {
            return Ok(());
        }
        let subtasks = engine.store.list_subtasks(parent_id, &parent.stage).await?;
        if subtasks.iter().any(|s| s.status == subtask_status::INIT) {
            return Ok(());
        }
        parent.status = task_status::QUEUED.to_string();
        engine.store.update_task(&parent).await?;
        debug!(task = %parent.id, stage = %parent.stage, "Subtasks finished, resuming");
        self.dispatch(engine, parent.id.clone());
        Ok(())
    }
}
