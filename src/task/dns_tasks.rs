//! DNS zone maintenance: copies on other providers, vpc membership and
//! record-set pushes.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::handler::{StageOutcome, TaskContext, TaskHandler};
use super::kinds;
use crate::error::{CloudError, Result};
use crate::provider::{CreateSpec, RemoteScope};
use crate::query::ResourceQuery;
use crate::registry::status::DnsZoneStatus;
use crate::registry::ClassSpec;
use crate::state::models::{ProviderRecord, ResourceRecord};
use crate::sync::engine::sync_class;
use crate::sync::{SyncOptions, SyncScope};

const CACHE_RELATION: &str = "dns_zone_cache";
const VPC_RELATION: &str = "dns_zone_vpc";

async fn cache_provider(tcx: &TaskContext) -> Result<ProviderRecord> {
    let provider_ref = tcx
        .param_str("provider_id")
        .ok_or_else(|| CloudError::missing_parameter("provider_id"))?;
    tcx.engine().providers.get(provider_ref).await
}

/// Zone maintenance failures leave the zone usable; the reason is kept.
async fn restore_available(tcx: &TaskContext, error: &CloudError) -> Result<()> {
    match tcx
        .set_target_status(DnsZoneStatus::Available.as_str(), &error.to_string())
        .await
    {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

// ─── Cache ──────────────────────────────────────────────────────────────────

/// Create a copy of the zone on another provider and link it.
/// Params: `{"provider_id": "..."}`.
pub struct CacheTask;

#[async_trait]
impl TaskHandler for CacheTask {
    fn kind(&self) -> &'static str {
        kinds::DNS_ZONE_CACHE
    }

    fn op(&self) -> &'static str {
        "cache"
    }

    fn in_progress_status(&self, _spec: &ClassSpec) -> Option<&'static str> {
        Some(DnsZoneStatus::Caching.as_str())
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        if stage != "on_init" {
            return Err(CloudError::general(format!("unknown cache stage {}", stage)));
        }
        let zone = tcx.target().await?;
        let provider = cache_provider(tcx).await?;
        let engine = tcx.engine().clone();
        let relation = engine.registry.relation(CACHE_RELATION)?;

        let existing = engine
            .store
            .list_relations(relation, Some(&zone.id), Some(&provider.id))
            .await?;
        if let Some(row) = existing.first() {
            debug!(zone = %zone.name, provider = %provider.name, "Zone already cached");
            tcx.target_ready().await?;
            return Ok(StageOutcome::Complete(json!({ "external_id": row.attributes.get("external_id") })));
        }

        let driver = engine.drivers.driver_for(&provider)?;
        let remote = driver
            .create_resource(
                "dns_zone",
                &RemoteScope::global(),
                &CreateSpec {
                    name: zone.name.clone(),
                    description: zone.description.clone(),
                    attributes: zone.attributes.clone(),
                    ..CreateSpec::default()
                },
            )
            .await?;
        let mut attributes = Map::new();
        attributes.insert("external_id".to_string(), json!(remote.global_id()));
        engine
            .store
            .add_relation(relation, &zone.id, &provider.id, &attributes)
            .await?;
        tcx.target_ready().await?;
        info!(zone = %zone.name, provider = %provider.name, external_id = remote.global_id(), "Zone cached");
        Ok(StageOutcome::Complete(json!({ "external_id": remote.global_id() })))
    }

    async fn on_failure(&self, tcx: &mut TaskContext, error: &CloudError) -> Result<()> {
        restore_available(tcx, error).await
    }
}

// ─── Uncache ────────────────────────────────────────────────────────────────

/// Remove the zone copy from a provider and drop the link.
/// Params: `{"provider_id": "..."}`.
pub struct UncacheTask;

#[async_trait]
impl TaskHandler for UncacheTask {
    fn kind(&self) -> &'static str {
        kinds::DNS_ZONE_UNCACHE
    }

    fn op(&self) -> &'static str {
        "uncache"
    }

    fn in_progress_status(&self, _spec: &ClassSpec) -> Option<&'static str> {
        Some(DnsZoneStatus::Uncaching.as_str())
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        if stage != "on_init" {
            return Err(CloudError::general(format!("unknown uncache stage {}", stage)));
        }
        let zone = tcx.target().await?;
        let provider = cache_provider(tcx).await?;
        let engine = tcx.engine().clone();
        let relation = engine.registry.relation(CACHE_RELATION)?;

        let rows = engine
            .store
            .list_relations(relation, Some(&zone.id), Some(&provider.id))
            .await?;
        if rows.is_empty() {
            tcx.target_ready().await?;
            return Ok(StageOutcome::done());
        }
        let driver = engine.drivers.driver_for(&provider)?;
        for row in &rows {
            let Some(external_id) = row.attributes.get("external_id").and_then(Value::as_str) else {
                continue;
            };
            match driver
                .delete_resource("dns_zone", &RemoteScope::global(), external_id)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(zone = %zone.name, external_id, "Cached copy already gone");
                }
                Err(e) => return Err(e),
            }
        }
        engine
            .store
            .remove_relation(relation, &zone.id, &provider.id)
            .await?;
        tcx.target_ready().await?;
        info!(zone = %zone.name, provider = %provider.name, "Zone uncached");
        Ok(StageOutcome::done())
    }

    async fn on_failure(&self, tcx: &mut TaskContext, error: &CloudError) -> Result<()> {
        restore_available(tcx, error).await
    }
}

// ─── VPC membership ─────────────────────────────────────────────────────────

/// External ids of the vpcs linked to `zone`.
pub async fn linked_vpc_ids(tcx: &TaskContext, zone: &ResourceRecord) -> Result<Vec<String>> {
    let engine = tcx.engine();
    let relation = engine.registry.relation(VPC_RELATION)?;
    let vpc_spec = engine.spec("vpc")?;
    let mut ids = Vec::new();
    for row in engine.store.list_relations(relation, Some(&zone.id), None).await? {
        match engine.store.get_resource(&vpc_spec, &row.right_id).await? {
            Some(vpc) if vpc.is_external() => ids.push(vpc.external_id),
            Some(_) => {}
            None => warn!(zone = %zone.name, vpc = %row.right_id, "Linked vpc is gone"),
        }
    }
    Ok(ids)
}

/// Push the zone's current vpc links to its provider.
pub struct SyncVpcsTask;

#[async_trait]
impl TaskHandler for SyncVpcsTask {
    fn kind(&self) -> &'static str {
        kinds::DNS_ZONE_SYNC_VPCS
    }

    fn op(&self) -> &'static str {
        "sync_vpcs"
    }

    fn in_progress_status(&self, _spec: &ClassSpec) -> Option<&'static str> {
        Some(DnsZoneStatus::SyncVpcs.as_str())
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        if stage != "on_init" {
            return Err(CloudError::general(format!("unknown sync_vpcs stage {}", stage)));
        }
        let zone = tcx.target().await?;
        let vpc_ids = linked_vpc_ids(tcx, &zone).await?;
        if zone.is_managed() && zone.is_external() {
            let scope = SyncScope::for_record(tcx.engine(), &zone).await?;
            scope
                .driver
                .update_resource(
                    "dns_zone",
                    &scope.remote(),
                    &zone.external_id,
                    "sync-vpcs",
                    &json!({ "vpc_ids": vpc_ids }),
                )
                .await?;
        }
        tcx.target_ready().await?;
        Ok(StageOutcome::Complete(json!({ "vpc_ids": vpc_ids })))
    }

    async fn on_failure(&self, tcx: &mut TaskContext, error: &CloudError) -> Result<()> {
        restore_available(tcx, error).await
    }
}

// ─── Record sets ────────────────────────────────────────────────────────────

/// Re-read the zone's records from its provider, then push the full set to
/// every provider holding a cached copy. Failure leaves the zone in
/// `sync_record_sets_failed`.
pub struct SyncRecordSetsTask;

#[async_trait]
impl TaskHandler for SyncRecordSetsTask {
    fn kind(&self) -> &'static str {
        kinds::DNS_ZONE_SYNC_RECORDSETS
    }

    fn op(&self) -> &'static str {
        "sync_record_sets"
    }

    fn in_progress_status(&self, _spec: &ClassSpec) -> Option<&'static str> {
        Some(DnsZoneStatus::SyncRecordSets.as_str())
    }

    async fn on_stage(&self, tcx: &mut TaskContext, stage: &str) -> Result<StageOutcome> {
        if stage != "on_init" {
            return Err(CloudError::general(format!(
                "unknown sync_record_sets stage {}",
                stage
            )));
        }
        let zone = tcx.target().await?;
        let engine = tcx.engine().clone();
        let record_spec = engine.spec("dns_record")?;
        let mut summary = json!({});

        if zone.is_managed() && zone.is_external() {
            let scope = SyncScope::for_record(&engine, &zone).await?.child(&zone);
            let remote = scope
                .driver
                .list_resources(record_spec.keyword, &scope.remote())
                .await?;
            let result = sync_class(&tcx.cx, record_spec.clone(), scope, remote, SyncOptions::full()).await;
            if !result.is_ok() {
                return Err(CloudError::general(format!("record sync: {}", result)));
            }
            summary["sync"] = json!(result.to_string());
        }

        let records: Vec<Value> = engine
            .store
            .fetch(&ResourceQuery::new(record_spec).filter_by_parent(&zone.id))
            .await?
            .into_iter()
            .map(|r| {
                json!({
                    "name": r.name,
                    "dns_type": r.attr("dns_type"),
                    "dns_value": r.attr("dns_value"),
                    "ttl": r.attr("ttl"),
                    "enabled": r.enabled,
                })
            })
            .collect();

        let relation = engine.registry.relation(CACHE_RELATION)?;
        let mut pushed = 0usize;
        for row in engine.store.list_relations(relation, Some(&zone.id), None).await? {
            let Some(external_id) = row.attributes.get("external_id").and_then(Value::as_str) else {
                continue;
            };
            let provider = engine.providers.get(&row.right_id).await?;
            let driver = engine.drivers.driver_for(&provider)?;
            driver
                .update_resource(
                    "dns_zone",
                    &RemoteScope::global(),
                    external_id,
                    "sync-recordsets",
                    &json!({ "records": records }),
                )
                .await?;
            pushed += 1;
        }
        summary["records"] = json!(records.len());
        summary["caches"] = json!(pushed);
        tcx.target_ready().await?;
        info!(zone = %zone.name, records = records.len(), caches = pushed, "Record sets synced");
        Ok(StageOutcome::Complete(summary))
    }
}
