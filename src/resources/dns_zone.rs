//! DNS zones: zone-type checks, vpc membership for private zones, and
//! copies cached on other providers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::generic::{self, standard_actions};
use super::{service, ActionOutcome, ActionTable, CreateInput, ResourceHooks};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;
use crate::task::{self, kinds};

pub const PUBLIC_ZONE: &str = "PublicZone";
pub const PRIVATE_ZONE: &str = "PrivateZone";

const VPC_RELATION: &str = "dns_zone_vpc";
const CACHE_RELATION: &str = "dns_zone_cache";

pub struct DnsZoneHooks;

fn domain_name_regex() -> Result<Regex> {
    Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)*[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.?$")
        .map_err(|e| CloudError::general(format!("domain regex: {}", e)))
}

pub fn is_domain_name(name: &str) -> Result<bool> {
    Ok(name.len() <= 253 && domain_name_regex()?.is_match(name))
}

/// `vpc_ids` from a request body, as a list of strings.
fn vpc_refs(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CloudError::input_parameter("vpc_ids must be strings"))
            })
            .collect(),
        Some(_) => Err(CloudError::input_parameter("vpc_ids must be a list")),
    }
}

/// Resolve vpc references and check they live on `manager_id`.
async fn resolve_vpcs(
    cx: &OpContext,
    refs: &[String],
    manager_id: Option<&str>,
) -> Result<Vec<ResourceRecord>> {
    let vpc_spec = cx.engine.spec("vpc")?;
    let mut vpcs = Vec::with_capacity(refs.len());
    for vpc_ref in refs {
        let vpc = service::find(cx, &vpc_spec, vpc_ref).await?;
        if vpc.manager_id.as_deref() != manager_id {
            return Err(CloudError::conflict(format!(
                "vpc {} is not on the zone's provider",
                vpc.name
            )));
        }
        vpcs.push(vpc);
    }
    Ok(vpcs)
}

#[async_trait]
impl ResourceHooks for DnsZoneHooks {
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        mut input: CreateInput,
    ) -> Result<CreateInput> {
        let zone_type = input
            .attr_str("zone_type")
            .ok_or_else(|| CloudError::missing_parameter("zone_type"))?
            .to_string();
        if zone_type != PUBLIC_ZONE && zone_type != PRIVATE_ZONE {
            return Err(CloudError::input_parameter(format!(
                "zone_type must be {} or {}, got {}",
                PUBLIC_ZONE, PRIVATE_ZONE, zone_type
            )));
        }

        let provider = match input.manager_id {
            Some(ref manager_ref) => Some(cx.engine.providers.get(manager_ref).await?),
            None => None,
        };
        if let Some(ref provider) = provider {
            let driver = cx.engine.drivers.driver_for(provider)?;
            if !driver.supported_dns_zone_types().iter().any(|t| *t == zone_type) {
                return Err(CloudError::not_supported(format!(
                    "{} on {}",
                    zone_type, provider.brand
                )));
            }
        }

        input.name = input.name.trim().to_lowercase();
        if !is_domain_name(&input.name)? {
            return Err(CloudError::input_parameter(format!(
                "invalid domain name {}",
                input.name
            )));
        }
        if zone_type == PUBLIC_ZONE && provider.is_some() && !input.name.contains('.') {
            return Err(CloudError::input_parameter(format!(
                "public zone {} needs a dotted name",
                input.name
            )));
        }

        let refs = vpc_refs(input.extra.get("vpc_ids"))?;
        if zone_type == PRIVATE_ZONE {
            if provider.is_some() && refs.is_empty() {
                return Err(CloudError::missing_parameter("vpc_ids"));
            }
            let manager_id = provider.as_ref().map(|p| p.id.as_str());
            let vpcs = resolve_vpcs(cx, &refs, manager_id).await?;
            let ids: Vec<Value> = vpcs.into_iter().map(|v| json!(v.id)).collect();
            input.extra.insert("vpc_ids".to_string(), Value::Array(ids));
        } else if !refs.is_empty() {
            return Err(CloudError::input_parameter("public zones take no vpcs"));
        }

        generic::validate_create(cx, spec, input).await
    }

    async fn post_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        input: &CreateInput,
    ) -> Result<Option<String>> {
        let relation = cx.engine.registry.relation(VPC_RELATION)?;
        for vpc_id in vpc_refs(input.extra.get("vpc_ids"))? {
            cx.engine
                .store
                .add_relation(relation, &record.id, &vpc_id, &Map::new())
                .await?;
        }
        generic::post_create(cx, spec, record, input).await
    }

    fn actions(&self, spec: &ClassSpec) -> ActionTable {
        standard_actions(spec)
            .register("cache", |cx, spec, record, params| {
                cache(cx, spec, record, params, true).boxed()
            })
            .register("uncache", |cx, spec, record, params| {
                cache(cx, spec, record, params, false).boxed()
            })
            .register("add-vpcs", |cx, spec, record, params| {
                change_vpcs(cx, spec, record, params, true).boxed()
            })
            .register("remove-vpcs", |cx, spec, record, params| {
                change_vpcs(cx, spec, record, params, false).boxed()
            })
            .register("sync-recordsets", |cx, spec, record, _params| {
                async move {
                    require_ready(&spec, &record)?;
                    let task_id =
                        task::start_for(&cx, kinds::DNS_ZONE_SYNC_RECORDSETS, &record, Value::Null)
                            .await?;
                    Ok(ActionOutcome::task(record, task_id))
                }
                .boxed()
            })
    }
}

fn require_ready(spec: &ClassSpec, record: &ResourceRecord) -> Result<()> {
    if record.status != spec.statuses.ready {
        return Err(CloudError::invalid_status(
            record.status.clone(),
            spec.statuses.ready,
        ));
    }
    Ok(())
}

/// `cache` / `uncache`: params `{"provider_id": "..."}`.
async fn cache(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    record: ResourceRecord,
    params: Value,
    add: bool,
) -> Result<ActionOutcome> {
    require_ready(&spec, &record)?;
    let provider_ref = params
        .get("provider_id")
        .and_then(Value::as_str)
        .ok_or_else(|| CloudError::missing_parameter("provider_id"))?;
    let provider = cx.engine.providers.get(provider_ref).await?;
    if record.manager_id.as_deref() == Some(provider.id.as_str()) {
        return Err(CloudError::input_parameter(format!(
            "zone {} already lives on {}",
            record.name, provider.name
        )));
    }
    let kind = if add {
        if !provider.enabled {
            return Err(CloudError::invalid_status("disabled", "enabled"));
        }
        kinds::DNS_ZONE_CACHE
    } else {
        let relation = cx.engine.registry.relation(CACHE_RELATION)?;
        let cached = cx
            .engine
            .store
            .list_relations(relation, Some(&record.id), Some(&provider.id))
            .await?;
        if cached.is_empty() {
            return Err(CloudError::not_found(
                CACHE_RELATION,
                format!("{}/{}", record.name, provider.name),
            ));
        }
        kinds::DNS_ZONE_UNCACHE
    };
    let task_id = task::start_for(&cx, kind, &record, json!({ "provider_id": provider.id })).await?;
    let record = cx.engine.load(&spec, &record.id).await?;
    Ok(ActionOutcome::task(record, task_id))
}

/// `add-vpcs` / `remove-vpcs`: params `{"vpc_ids": [...]}`. Managed zones
/// push the new membership with a task.
async fn change_vpcs(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    record: ResourceRecord,
    params: Value,
    add: bool,
) -> Result<ActionOutcome> {
    require_ready(&spec, &record)?;
    if record.attr_str("zone_type") != Some(PRIVATE_ZONE) {
        return Err(CloudError::not_supported("vpc membership on a public zone"));
    }
    let refs = vpc_refs(params.get("vpc_ids"))?;
    if refs.is_empty() {
        return Err(CloudError::missing_parameter("vpc_ids"));
    }
    let vpcs = resolve_vpcs(&cx, &refs, record.manager_id.as_deref()).await?;
    let engine = &cx.engine;
    let relation = engine.registry.relation(VPC_RELATION)?;

    if add {
        for vpc in &vpcs {
            engine
                .store
                .add_relation(relation, &record.id, &vpc.id, &Map::new())
                .await?;
        }
    } else {
        let linked = engine
            .store
            .list_relations(relation, Some(&record.id), None)
            .await?;
        let remaining = linked
            .iter()
            .filter(|row| !vpcs.iter().any(|v| v.id == row.right_id))
            .count();
        if record.is_managed() && remaining == 0 {
            return Err(CloudError::input_parameter(
                "a managed private zone needs at least one vpc",
            ));
        }
        for vpc in &vpcs {
            engine
                .store
                .remove_relation(relation, &record.id, &vpc.id)
                .await?;
        }
    }

    if record.is_managed() && record.is_external() {
        let task_id = task::start_for(&cx, kinds::DNS_ZONE_SYNC_VPCS, &record, Value::Null).await?;
        let record = engine.load(&spec, &record.id).await?;
        return Ok(ActionOutcome::task(record, task_id));
    }
    Ok(ActionOutcome::done(record))
}
