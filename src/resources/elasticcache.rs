//! Managed cache and database instances share one shape: an engine picked
//! at create time and a `change-config` action that resizes in place.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};

use super::generic::{self, remote_verb, standard_actions};
use super::{ActionOutcome, ActionTable, CreateInput, ResourceHooks};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;

pub struct ChangeConfigHooks;

fn engines_for(keyword: &str) -> &'static [&'static str] {
    match keyword {
        "elasticcache" => &["redis", "memcached"],
        "dbinstance" => &["mysql", "postgresql", "mariadb", "sqlserver"],
        _ => &[],
    }
}

/// Keys `change-config` may carry, per class.
fn config_keys(keyword: &str) -> &'static [&'static str] {
    match keyword {
        "elasticcache" => &["instance_type", "capacity_mb", "node_type"],
        "dbinstance" => &["instance_type", "vcpu_count", "vmem_size_mb", "disk_size_gb"],
        _ => &[],
    }
}

#[async_trait]
impl ResourceHooks for ChangeConfigHooks {
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        mut input: CreateInput,
    ) -> Result<CreateInput> {
        let engine = input
            .attr_str("engine")
            .ok_or_else(|| CloudError::missing_parameter("engine"))?
            .to_lowercase();
        let allowed = engines_for(spec.keyword);
        if !allowed.is_empty() && !allowed.contains(&engine.as_str()) {
            return Err(CloudError::input_parameter(format!(
                "{} engine must be one of {}",
                spec.keyword,
                allowed.join(", ")
            )));
        }
        input
            .attributes
            .insert("engine".to_string(), Value::String(engine));
        generic::validate_create(cx, spec, input).await
    }

    fn actions(&self, spec: &ClassSpec) -> ActionTable {
        standard_actions(spec).register("change-config", |cx, spec, record, params| {
            change_config(cx, spec, record, params).boxed()
        })
    }
}

/// Params: a subset of the class's sizing keys, e.g. `{"instance_type": "..."}`.
async fn change_config(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    record: ResourceRecord,
    params: Value,
) -> Result<ActionOutcome> {
    let requested = params
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| CloudError::missing_parameter("instance_type"))?;
    let keys = config_keys(spec.keyword);
    let mut changes = Map::new();
    for (key, value) in requested {
        if !keys.contains(&key.as_str()) {
            return Err(CloudError::input_parameter(format!(
                "{} cannot be changed on {}",
                key, spec.keyword
            )));
        }
        if let Some(field) = spec.field_spec(key) {
            field.check(value)?;
        }
        if record.attr(key) != Some(value) {
            changes.insert(key.clone(), value.clone());
        }
    }
    if changes.is_empty() {
        return Ok(ActionOutcome::done(record));
    }
    remote_verb(&cx, &spec, record, "change-config", Value::Object(changes)).await
}
