//! Persisted multi-stage tasks: remote create/update/delete, status syncs,
//! provider cycles and DNS zone maintenance.

pub mod dns_tasks;
pub mod handler;
pub mod provider_task;
pub mod resource_tasks;
pub mod runtime;

use std::sync::Arc;

use serde_json::Value;

use crate::engine::OpContext;
use crate::error::Result;
use crate::state::models::{ResourceRecord, TaskRecord};

pub use handler::{StageOutcome, TaskContext, TaskHandler};
pub use runtime::TaskManager;

/// Task kind names as persisted in the task table.
pub mod kinds {
    pub const CREATE: &str = "ResourceCreateTask";
    pub const UPDATE: &str = "ResourceUpdateTask";
    pub const DELETE: &str = "ResourceDeleteTask";
    pub const SYNCSTATUS: &str = "ResourceSyncstatusTask";
    pub const PROVIDER_SYNC: &str = "ProviderSyncTask";
    pub const DNS_ZONE_CACHE: &str = "DnsZoneCacheTask";
    pub const DNS_ZONE_UNCACHE: &str = "DnsZoneUncacheTask";
    pub const DNS_ZONE_SYNC_VPCS: &str = "DnsZoneSyncVpcsTask";
    pub const DNS_ZONE_SYNC_RECORDSETS: &str = "DnsZoneSyncRecordSetsTask";
}

pub(crate) fn builtin_handlers() -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(resource_tasks::CreateTask),
        Arc::new(resource_tasks::UpdateTask),
        Arc::new(resource_tasks::DeleteTask),
        Arc::new(resource_tasks::SyncstatusTask),
        Arc::new(provider_task::ProviderSyncTask),
        Arc::new(dns_tasks::CacheTask),
        Arc::new(dns_tasks::UncacheTask),
        Arc::new(dns_tasks::SyncVpcsTask),
        Arc::new(dns_tasks::SyncRecordSetsTask),
    ]
}

/// Start a `kind` task on `record` on behalf of the caller in `cx`.
/// Returns the task id.
pub async fn start_for(
    cx: &OpContext,
    kind: &str,
    record: &ResourceRecord,
    params: Value,
) -> Result<String> {
    let mut task = TaskRecord::new(kind, &record.class, &record.id, &record.name);
    task.params = params;
    task.user_id = cx.identity.user_id.clone();
    task.domain_id = cx.identity.domain_id.clone();
    task.project_id = cx.identity.project_id.clone();
    let task = cx.engine.tasks.start(&cx.engine, task).await?;
    Ok(task.id)
}
