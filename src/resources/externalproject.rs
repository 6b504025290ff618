//! Provider-side projects, each bound to a local project of the same name
//! in the provider's domain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::generic;
use super::ResourceHooks;
use crate::engine::OpContext;
use crate::error::Result;
use crate::provider::RemoteHandle;
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;
use crate::sync::project::ensure_project;
use crate::sync::SyncScope;

pub struct ExternalProjectHooks;

async fn bind(
    cx: &OpContext,
    spec: &ClassSpec,
    mut record: ResourceRecord,
    scope: &SyncScope,
) -> Result<ResourceRecord> {
    let project = ensure_project(cx, &scope.provider.domain_id, &record.name).await?;
    if record.attr_str("project_id") == Some(project.id.as_str()) {
        return Ok(record);
    }
    record.set_attr("project_id", json!(project.id));
    cx.engine.store.update_resource(spec, &record).await?;
    Ok(record)
}

#[async_trait]
impl ResourceHooks for ExternalProjectHooks {
    async fn sync_with_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        let record = generic::sync_with_cloud(cx, spec, record, remote, scope).await?;
        bind(cx, spec, record, scope).await
    }

    async fn new_from_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        let record = generic::new_from_cloud(cx, spec, remote, scope).await?;
        bind(cx, spec, record, scope).await
    }
}
