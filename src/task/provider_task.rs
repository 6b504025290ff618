use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::handler::{StageOutcome, TaskContext, TaskHandler};
use super::kinds;
use crate::engine::{Engine, OpContext};
use crate::error::{CloudError, Result};
use crate::state::models::TaskRecord;
use crate::sync::cycle::{self, CycleOptions};

/// Runs one reconciliation cycle in the background.
/// Params: `{"force": bool, "xor": bool}`.
pub struct ProviderSyncTask;

#[async_trait]
impl TaskHandler for ProviderSyncTask {
    fn kind(&self) -> &'static str {
        kinds::PROVIDER_SYNC
    }

    fn op(&self) -> &'static str {
        "sync"
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        if stage != "on_init" {
            return Err(CloudError::general(format!("unknown sync stage {}", stage)));
        }
        let options = CycleOptions {
            force: tcx.param_bool("force"),
            xor: tcx.param_bool("xor"),
        };
        let engine = tcx.engine().clone();
        let report = cycle::sync_provider(&engine, &tcx.task.obj_id, options).await?;
        let result = serde_json::to_value(&report)
            .map_err(|e| CloudError::general(format!("encode sync report: {}", e)))?;
        Ok(StageOutcome::Complete(result))
    }

    /// The cycle already recorded its outcome on the provider.
    async fn on_failure(&self, tcx: &mut TaskContext, error: &CloudError) -> Result<()> {
        tracing::warn!(provider = %tcx.task.obj_name, error = %error, "Background sync failed");
        Ok(())
    }
}

/// Queue a background cycle for the provider named or identified by
/// `provider_ref`. Returns the task id.
pub async fn start(cx: &OpContext, provider_ref: &str, options: CycleOptions) -> Result<String> {
    let engine: &Arc<Engine> = &cx.engine;
    let provider = engine.providers.get(provider_ref).await?;
    let mut task = TaskRecord::new(kinds::PROVIDER_SYNC, "cloudprovider", &provider.id, &provider.name);
    task.params = json!({ "force": options.force, "xor": options.xor });
    task.user_id = cx.identity.user_id.clone();
    task.domain_id = cx.identity.domain_id.clone();
    task.project_id = cx.identity.project_id.clone();
    let task = engine.tasks.start(engine, task).await?;
    Ok(task.id)
}
