//! Generic remote lifecycle tasks: create, update, delete and status sync.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::handler::{StageOutcome, TaskContext, TaskHandler};
use super::kinds;
use crate::error::{CloudError, Result};
use crate::provider::CreateSpec;
use crate::query::{ManagedFilter, ResourceQuery};
use crate::registry::{Capability, ClassSpec};
use crate::state::models::{subtask_status, ResourceRecord};
use crate::sync::SyncScope;

/// Fetch the remote side of the target and fold it in under the object lock.
async fn pull_remote(tcx: &TaskContext, record: &ResourceRecord) -> Result<ResourceRecord> {
    let engine = tcx.engine();
    let spec = tcx.spec()?;
    let scope = SyncScope::for_record(engine, record).await?;
    let remote = scope
        .driver
        .get_resource(spec.keyword, &scope.remote(), &record.external_id)
        .await?;
    let _guard = engine
        .locks
        .lock_object(&tcx.cx.unit, spec.keyword, &record.id)
        .await;
    let current = engine.load(&spec, &record.id).await?;
    engine
        .hooks(spec.keyword)
        .sync_with_cloud(&tcx.cx, &spec, &current, &remote, &scope)
        .await
}

/// External id of the cloud project mapped to `record`'s local project.
async fn remote_project(tcx: &TaskContext, record: &ResourceRecord) -> Result<Option<String>> {
    let Some(ref manager_id) = record.manager_id else {
        return Ok(None);
    };
    if record.project_id.is_empty() {
        return Ok(None);
    }
    let engine = tcx.engine();
    let query = ResourceQuery::new(engine.spec("externalproject")?)
        .filter_by_managed(&ManagedFilter::provider(manager_id))
        .filter_by_attribute("project_id", &json!(record.project_id))?
        .limit(1);
    Ok(engine
        .store
        .fetch(&query)
        .await?
        .into_iter()
        .next()
        .map(|p| p.external_id))
}

// ─── Create ─────────────────────────────────────────────────────────────────

pub struct CreateTask;

#[async_trait]
impl TaskHandler for CreateTask {
    fn kind(&self) -> &'static str {
        kinds::CREATE
    }

    fn op(&self) -> &'static str {
        "create"
    }

    fn in_progress_status(&self, spec: &ClassSpec) -> Option<&'static str> {
        Some(spec.statuses.creating)
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        match stage {
            "on_init" => {
                let record = tcx.target().await?;
                if !record.is_managed() {
                    tcx.target_ready().await?;
                    return Ok(StageOutcome::done());
                }
                if record.is_external() {
                    return Ok(StageOutcome::next("on_cloud_create_complete"));
                }
                let engine = tcx.engine().clone();
                let spec = tcx.spec()?;
                let scope = SyncScope::for_record(&engine, &record).await?;
                let zone = match record.zone_id {
                    Some(ref zone_id) => {
                        let zone = engine.load(&*engine.spec("zone")?, zone_id).await?;
                        Some(zone.external_id)
                    }
                    None => None,
                };
                let create = CreateSpec {
                    name: record.name.clone(),
                    description: record.description.clone(),
                    project_id: remote_project(tcx, &record).await?,
                    zone,
                    attributes: record.attributes.clone(),
                };
                let remote = scope
                    .driver
                    .create_resource(spec.keyword, &scope.remote(), &create)
                    .await?;

                let _guard = engine
                    .locks
                    .lock_object(&tcx.cx.unit, spec.keyword, &record.id)
                    .await;
                let mut current = engine.load(&spec, &record.id).await?;
                current.external_id = remote.global_id().to_string();
                engine.store.update_resource(&spec, &current).await?;
                debug!(record = %current.reference(), external_id = %current.external_id, "Created remotely");
                Ok(StageOutcome::next("on_cloud_create_complete"))
            }
            "on_cloud_create_complete" => {
                let record = tcx.target().await?;
                pull_remote(tcx, &record).await?;
                tcx.target_ready().await?;
                info!(record = %record.reference(), "Create complete");
                Ok(StageOutcome::Complete(json!({ "id": record.id })))
            }
            other => Err(CloudError::general(format!("unknown create stage {}", other))),
        }
    }
}

// ─── Update ─────────────────────────────────────────────────────────────────

/// Sends one update verb to the provider, then re-reads the remote side.
/// Params: `{"verb": "...", "params": {...}}`.
pub struct UpdateTask;

#[async_trait]
impl TaskHandler for UpdateTask {
    fn kind(&self) -> &'static str {
        kinds::UPDATE
    }

    fn op(&self) -> &'static str {
        "update"
    }

    fn in_progress_status(&self, spec: &ClassSpec) -> Option<&'static str> {
        Some(spec.statuses.updating)
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        match stage {
            "on_init" => {
                let record = tcx.target().await?;
                if !record.is_managed() || !record.is_external() {
                    tcx.target_ready().await?;
                    return Ok(StageOutcome::done());
                }
                let verb = tcx.param_str("verb").unwrap_or("update").to_string();
                let params = tcx.param("params").cloned().unwrap_or(Value::Null);
                let spec = tcx.spec()?;
                let scope = SyncScope::for_record(tcx.engine(), &record).await?;
                scope
                    .driver
                    .update_resource(spec.keyword, &scope.remote(), &record.external_id, &verb, &params)
                    .await?;
                debug!(record = %record.reference(), verb = %verb, "Remote update sent");
                Ok(StageOutcome::next("on_sync"))
            }
            "on_sync" => {
                let record = tcx.target().await?;
                pull_remote(tcx, &record).await?;
                tcx.target_ready().await?;
                Ok(StageOutcome::done())
            }
            other => Err(CloudError::general(format!("unknown update stage {}", other))),
        }
    }
}

// ─── Delete ─────────────────────────────────────────────────────────────────

/// Deletes deletable children as subtasks, then the remote object, then the
/// local row with everything cascading from it.
pub struct DeleteTask;

#[async_trait]
impl TaskHandler for DeleteTask {
    fn kind(&self) -> &'static str {
        kinds::DELETE
    }

    fn op(&self) -> &'static str {
        "delete"
    }

    fn in_progress_status(&self, spec: &ClassSpec) -> Option<&'static str> {
        Some(spec.statuses.deleting)
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        match stage {
            "on_init" => {
                let Some(record) = tcx.try_target().await? else {
                    return Ok(StageOutcome::done());
                };
                let engine = tcx.engine().clone();
                for child_spec in engine.registry.children_of(&record.class) {
                    if !child_spec.has(Capability::Delete) {
                        continue;
                    }
                    let query = ResourceQuery::new(child_spec.clone()).filter_by_parent(&record.id);
                    for child in engine.store.fetch(&query).await? {
                        tcx.spawn_subtask(kinds::DELETE, &child, Value::Null);
                    }
                }
                Ok(StageOutcome::wait("on_children_deleted"))
            }
            "on_children_deleted" => {
                let failed = tcx
                    .subtasks()
                    .await?
                    .iter()
                    .filter(|s| s.status == subtask_status::FAIL)
                    .count();
                if failed > 0 {
                    return Err(CloudError::general(format!(
                        "{} child deletes failed",
                        failed
                    )));
                }
                let Some(record) = tcx.try_target().await? else {
                    return Ok(StageOutcome::done());
                };
                if record.is_managed() && record.is_external() {
                    let spec = tcx.spec()?;
                    let scope = SyncScope::for_record(tcx.engine(), &record).await?;
                    match scope
                        .driver
                        .delete_resource(spec.keyword, &scope.remote(), &record.external_id)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {
                            debug!(record = %record.reference(), "Already gone remotely");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(StageOutcome::next("on_real_delete"))
            }
            "on_real_delete" => {
                let engine = tcx.engine().clone();
                let spec = tcx.spec()?;
                let _guard = engine
                    .locks
                    .lock_object(&tcx.cx.unit, spec.keyword, &tcx.task.obj_id)
                    .await;
                if let Some(record) = engine.store.get_resource(&spec, &tcx.task.obj_id).await? {
                    engine
                        .hooks(spec.keyword)
                        .real_delete(&tcx.cx, &spec, &record)
                        .await?;
                }
                Ok(StageOutcome::done())
            }
            other => Err(CloudError::general(format!("unknown delete stage {}", other))),
        }
    }
}

// ─── Status Sync ────────────────────────────────────────────────────────────

/// Re-read one record from its provider; a vanished object is sync-removed.
pub struct SyncstatusTask;

#[async_trait]
impl TaskHandler for SyncstatusTask {
    fn kind(&self) -> &'static str {
        kinds::SYNCSTATUS
    }

    fn op(&self) -> &'static str {
        "syncstatus"
    }

    fn in_progress_status(&self, spec: &ClassSpec) -> Option<&'static str> {
        Some(spec.statuses.syncing)
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        if stage != "on_init" {
            return Err(CloudError::general(format!("unknown syncstatus stage {}", stage)));
        }
        let record = tcx.target().await?;
        let spec = tcx.spec()?;
        match pull_remote(tcx, &record).await {
            Ok(synced) => {
                if synced.status == spec.statuses.syncing {
                    tcx.target_ready().await?;
                }
                Ok(StageOutcome::done())
            }
            Err(e) if e.is_not_found() => {
                let engine = tcx.engine().clone();
                let _guard = engine
                    .locks
                    .lock_object(&tcx.cx.unit, spec.keyword, &record.id)
                    .await;
                let current = engine.load(&spec, &record.id).await?;
                engine
                    .hooks(spec.keyword)
                    .sync_remove(&tcx.cx, &spec, &current)
                    .await?;
                Ok(StageOutcome::Complete(json!({ "removed": true })))
            }
            Err(e) => Err(e),
        }
    }
}
