//! Inter-VPC networks and their routes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use super::generic::{self, remote_verb, standard_actions};
use super::{service, ActionOutcome, ActionTable, CreateInput, ResourceHooks};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;

const VPC_RELATION: &str = "inter_vpc_network_vpc";

fn vpc_refs(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| CloudError::input_parameter(format!("vpc_ids: {}", e))),
    }
}

async fn resolve_vpcs(
    cx: &OpContext,
    refs: &[String],
    manager_id: Option<&str>,
) -> Result<Vec<ResourceRecord>> {
    let spec = cx.engine.spec("vpc")?;
    let mut vpcs = Vec::new();
    for vpc_ref in refs {
        let vpc = service::find(cx, &spec, vpc_ref).await?;
        if vpc.manager_id.as_deref() != manager_id {
            return Err(CloudError::conflict(format!(
                "vpc {} is on another provider",
                vpc.name
            )));
        }
        vpcs.push(vpc);
    }
    Ok(vpcs)
}

// ─── Networks ───────────────────────────────────────────────────────────────

pub struct InterVpcHooks;

#[async_trait]
impl ResourceHooks for InterVpcHooks {
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        input: CreateInput,
    ) -> Result<CreateInput> {
        let mut input = generic::validate_create(cx, spec, input).await?;
        // Runs after the generic step so manager_id is already a provider id.
        let refs = vpc_refs(input.extra.get("vpc_ids"))?;
        let vpcs = resolve_vpcs(cx, &refs, input.manager_id.as_deref()).await?;
        let ids: Vec<Value> = vpcs.into_iter().map(|v| json!(v.id)).collect();
        input.extra.insert("vpc_ids".to_string(), Value::Array(ids));
        Ok(input)
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
            .register("add-vpcs", |cx, spec, record, params| {
                change_vpcs(cx, spec, record, params, true).boxed()
            })
            .register("remove-vpcs", |cx, spec, record, params| {
                change_vpcs(cx, spec, record, params, false).boxed()
            })
    }
}

/// Params: `{"vpc_ids": [...]}`. Managed networks push the full member list.
async fn change_vpcs(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    record: ResourceRecord,
    params: Value,
    add: bool,
) -> Result<ActionOutcome> {
    let refs = vpc_refs(params.get("vpc_ids"))?;
    if refs.is_empty() {
        return Err(CloudError::missing_parameter("vpc_ids"));
    }
    let vpcs = resolve_vpcs(&cx, &refs, record.manager_id.as_deref()).await?;
    let engine = &cx.engine;
    let relation = engine.registry.relation(VPC_RELATION)?;
    for vpc in &vpcs {
        if add {
            engine
                .store
                .add_relation(relation, &record.id, &vpc.id, &Map::new())
                .await?;
        } else {
            engine
                .store
                .remove_relation(relation, &record.id, &vpc.id)
                .await?;
        }
    }
    if !(record.is_managed() && record.is_external()) {
        return Ok(ActionOutcome::done(record));
    }

    let vpc_spec = engine.spec("vpc")?;
    let mut members = Vec::new();
    for row in engine.store.list_relations(relation, Some(&record.id), None).await? {
        if let Some(vpc) = engine.store.get_resource(&vpc_spec, &row.right_id).await? {
            members.push(vpc.external_id);
        }
    }
    remote_verb(&cx, &spec, record, "sync-vpcs", json!({ "vpc_ids": members })).await
}

// ─── Routes ─────────────────────────────────────────────────────────────────

/// Routes are read from the cloud; operators only switch them on and off.
pub struct RouteHooks;

#[async_trait]
impl ResourceHooks for RouteHooks {
    fn actions(&self, spec: &ClassSpec) -> ActionTable {
        standard_actions(spec)
            .register("enable", |cx, spec, record, _params| {
                switch(cx, spec, record, true).boxed()
            })
            .register("disable", |cx, spec, record, _params| {
                switch(cx, spec, record, false).boxed()
            })
    }
}

async fn switch(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    mut record: ResourceRecord,
    enabled: bool,
) -> Result<ActionOutcome> {
    if record.enabled == enabled {
        return Ok(ActionOutcome::done(record));
    }
    if record.is_managed() && record.is_external() {
        let verb = if enabled { "enable" } else { "disable" };
        return remote_verb(&cx, &spec, record, verb, json!({})).await;
    }
    record.enabled = enabled;
    cx.engine.store.update_resource(&spec, &record).await?;
    Ok(ActionOutcome::done(record))
}
