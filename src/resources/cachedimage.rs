//! Public image cache. Provider image states fold onto four local ones.

use std::sync::Arc;

use async_trait::async_trait;

use super::generic;
use super::ResourceHooks;
use crate::engine::OpContext;
use crate::error::Result;
use crate::provider::RemoteHandle;
use crate::registry::status::CachedImageStatus;
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;
use crate::sync::SyncScope;

pub struct CachedImageHooks;

pub fn map_status(remote: &str) -> CachedImageStatus {
    match remote.to_ascii_lowercase().as_str() {
        "active" | "available" | "ready" => CachedImageStatus::Active,
        "killed" | "error" | "failed" => CachedImageStatus::Killed,
        "deleted" => CachedImageStatus::Deleted,
        _ => CachedImageStatus::Queued,
    }
}

async fn settle(
    cx: &OpContext,
    spec: &ClassSpec,
    mut record: ResourceRecord,
    remote: &RemoteHandle,
) -> Result<ResourceRecord> {
    record.status = map_status(remote.status()).as_str().to_string();
    record.last_ref_at = Some(chrono::Utc::now().to_rfc3339());
    cx.engine.store.update_resource(spec, &record).await?;
    Ok(record)
}

#[async_trait]
impl ResourceHooks for CachedImageHooks {
    async fn sync_with_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        let record = generic::sync_with_cloud(cx, spec, record, remote, scope).await?;
        settle(cx, spec, record, remote).await
    }

    async fn new_from_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        let record = generic::new_from_cloud(cx, spec, remote, scope).await?;
        settle(cx, spec, record, remote).await
    }
}
