use chrono::{DateTime, Utc};

use super::SyncScope;
use crate::engine::OpContext;
use crate::error::Result;
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;

/// Whether a cacheable record is due for a remote refresh at `now`.
pub fn needs_refresh(spec: &ClassSpec, record: &ResourceRecord, now: DateTime<Utc>) -> bool {
    let Some(window) = spec.refresh_window else {
        return false;
    };
    if !record.is_external() || !record.is_managed() {
        return false;
    }
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    match record
        .last_ref_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    {
        Some(last) => now - last.with_timezone(&Utc) > window,
        None => true,
    }
}

/// Refresh `record` from its provider if its window has elapsed. Runs under
/// the record's object lock; a record that vanished remotely takes the
/// class's lost status. Remote errors leave the stale copy in place.
pub async fn refresh_on_access(
    cx: &OpContext,
    spec: &std::sync::Arc<ClassSpec>,
    record: ResourceRecord,
) -> Result<ResourceRecord> {
    let now = Utc::now();
    if !needs_refresh(spec, &record, now) {
        return Ok(record);
    }
    let engine = &cx.engine;
    let _guard = engine
        .locks
        .lock_object(&cx.unit, spec.keyword, &record.id)
        .await;
    let mut current = engine.load(spec, &record.id).await?;
    if !needs_refresh(spec, &current, now) {
        return Ok(current);
    }

    let scope = SyncScope::for_record(engine, &current).await?;
    match scope
        .driver
        .get_resource(spec.keyword, &scope.remote(), &current.external_id)
        .await
    {
        Ok(remote) => {
            current = engine
                .hooks(spec.keyword)
                .sync_with_cloud(cx, spec, &current, &remote, &scope)
                .await?;
        }
        Err(e) if e.is_not_found() => {
            tracing::info!(record = %current.reference(), "Cached record vanished remotely");
            current.status = spec.statuses.lost.to_string();
            current.status_reason = "not found on provider".to_string();
        }
        Err(e) => {
            tracing::warn!(record = %current.reference(), error = %e, "Refresh failed, serving cached copy");
        }
    }
    current.last_ref_at = Some(now.to_rfc3339());
    engine.store.update_resource(spec, &current).await?;
    Ok(current)
}
