//! Admin-facing operations on any registered class: list, get, create,
//! update, delete and perform. Every mutation re-reads its record under the
//! object lock before touching it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ActionOutcome, CreateInput, UpdateInput};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::query::{compose, ListInput};
use crate::registry::{status, ClassSpec};
use crate::state::models::{project_src, ResourceRecord};
use crate::sync::cycle::CycleOptions;
use crate::sync::naming::{name_scope, reserve_name};
use crate::sync::refresh::refresh_on_access;
use crate::task::provider_task;

/// One page of a list call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListOutput {
    /// Matches before limit and offset.
    pub total: usize,
    pub data: Vec<Value>,
}

/// Resolve `ident` as an id, then as a name, within what the caller may see.
/// A name shared by several visible records is a `conflict`.
pub async fn find(cx: &OpContext, spec: &Arc<ClassSpec>, ident: &str) -> Result<ResourceRecord> {
    let engine = &cx.engine;
    let by_id = ListInput {
        ids: vec![ident.to_string()],
        ..ListInput::default()
    };
    let query = compose(&engine.registry, &cx.identity, spec.clone(), &by_id)?;
    if let Some(record) = engine.store.fetch(&query).await?.into_iter().next() {
        return Ok(record);
    }

    let by_name = ListInput {
        names: vec![ident.to_string()],
        ..ListInput::default()
    };
    let query = compose(&engine.registry, &cx.identity, spec.clone(), &by_name)?;
    let mut found = engine.store.fetch(&query).await?;
    match found.len() {
        0 => Err(CloudError::not_found(spec.keyword, ident)),
        1 => Ok(found.remove(0)),
        n => Err(CloudError::conflict(format!(
            "{} {} records are named {}, use an id",
            n, spec.keyword, ident
        ))),
    }
}

pub async fn list(cx: &OpContext, class: &str, input: &ListInput) -> Result<ListOutput> {
    let engine = &cx.engine;
    let spec = engine.spec(class)?;
    let query = compose(&engine.registry, &cx.identity, spec.clone(), input)?;

    let unpaged = ListInput {
        limit: None,
        offset: None,
        export_keys: Vec::new(),
        order_by: Vec::new(),
        ..input.clone()
    };
    let total = engine
        .store
        .count(&compose(&engine.registry, &cx.identity, spec.clone(), &unpaged)?)
        .await?;

    let data = if query.is_projection() {
        engine.store.fetch_rows(&query).await?
    } else {
        let mut data = Vec::new();
        for record in engine.store.fetch(&query).await? {
            let record = refresh_on_access(cx, &spec, record).await?;
            data.push(serde_json::to_value(&record)?);
        }
        data
    };
    Ok(ListOutput { total, data })
}

/// Fetch one record, refreshing cacheable classes whose window has elapsed.
pub async fn get(cx: &OpContext, class: &str, ident: &str) -> Result<ResourceRecord> {
    let spec = cx.engine.spec(class)?;
    let record = find(cx, &spec, ident).await?;
    refresh_on_access(cx, &spec, record).await
}

/// Validate, insert with the class's creating status, then hand off to
/// PostCreate. Returns the stored record and the create task id, if any.
pub async fn create(
    cx: &OpContext,
    class: &str,
    input: CreateInput,
) -> Result<(ResourceRecord, Option<String>)> {
    let engine = &cx.engine;
    let spec = engine.spec(class)?;
    let hooks = engine.hooks(class);
    let input = hooks.validate_create(cx, &spec, input).await?;

    let mut record = ResourceRecord::new(spec.keyword, &input.name);
    record.description = input.description.clone();
    record.manager_id = input.manager_id.clone();
    record.region_id = input.region_id.clone();
    record.zone_id = input.zone_id.clone();
    record.parent_id = input.parent_id.clone();
    record.domain_id = input.domain_id.clone().unwrap_or_default();
    record.project_id = input.project_id.clone().unwrap_or_default();
    record.project_src = project_src::LOCAL.to_string();
    record.attributes = input.attributes.clone();
    record.status = spec.statuses.creating.to_string();

    let inserted = insert_named(cx, &spec, &mut record, input.generate_name).await;
    if let Err(e) = inserted {
        if let Some(resource) = spec.quota {
            engine.quotas.cancel_pending(&record.domain_id, resource).await?;
        }
        return Err(e);
    }
    info!(record = %record.reference(), user = %cx.identity.user_id, "Created record");

    let task_id = match hooks.post_create(cx, &spec, &record, &input).await {
        Ok(task_id) => task_id,
        Err(e) => {
            engine
                .store
                .set_status(&spec, &record.id, &status::failed("create"), &e.to_string())
                .await?;
            return Err(e);
        }
    };
    let record = engine.load(&spec, &record.id).await?;
    Ok((record, task_id))
}

/// Insert under the class's name lock. A strict request whose name was taken
/// since validation fails with `conflict`.
async fn insert_named(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &mut ResourceRecord,
    generate_name: bool,
) -> Result<()> {
    let scope = name_scope(
        spec,
        record.parent_id.as_deref(),
        &record.domain_id,
        &record.project_id,
    );
    let reserved = reserve_name(cx, spec, &scope, &record.name, None).await?;
    if reserved.name != record.name {
        if !generate_name {
            return Err(CloudError::conflict(format!(
                "{} name {} already in use",
                spec.keyword, record.name
            )));
        }
        record.name = reserved.name.clone();
    }
    cx.engine.store.insert_resource(spec, record).await
}

pub async fn update(
    cx: &OpContext,
    class: &str,
    ident: &str,
    input: UpdateInput,
) -> Result<(ResourceRecord, Option<String>)> {
    let engine = &cx.engine;
    let spec = engine.spec(class)?;
    let hooks = engine.hooks(class);
    let found = find(cx, &spec, ident).await?;

    let _guard = engine
        .locks
        .lock_object(&cx.unit, spec.keyword, &found.id)
        .await;
    let mut record = engine.load(&spec, &found.id).await?;
    let input = hooks.validate_update(cx, &spec, &record, input).await?;

    if let Some(ref name) = input.name {
        record.name = name.clone();
    }
    if let Some(ref description) = input.description {
        record.description = description.clone();
    }
    for (key, value) in &input.attributes {
        record.set_attr(key, value.clone());
    }
    record.updated_at = chrono::Utc::now().to_rfc3339();
    engine.store.update_resource(&spec, &record).await?;
    debug!(record = %record.reference(), "Updated record");

    let task_id = hooks.post_update(cx, &spec, &record, &input).await?;
    let record = engine.load(&spec, &record.id).await?;
    Ok((record, task_id))
}

/// Record delete intent and schedule the delete task. The row stays in the
/// class's deleting status until RealDelete runs.
pub async fn delete(cx: &OpContext, class: &str, ident: &str) -> Result<Option<String>> {
    let engine = &cx.engine;
    let spec = engine.spec(class)?;
    let hooks = engine.hooks(class);
    let found = find(cx, &spec, ident).await?;

    let _guard = engine
        .locks
        .lock_object(&cx.unit, spec.keyword, &found.id)
        .await;
    // A concurrent sync may have removed it while we waited.
    let record = engine.load(&spec, &found.id).await?;
    hooks.validate_delete(cx, &spec, &record).await?;
    hooks.delete(cx, &spec, &record).await?;
    let task_id = hooks.customize_delete(cx, &spec, &record).await?;
    info!(record = %record.reference(), user = %cx.identity.user_id, "Delete requested");
    Ok(task_id)
}

/// Run a named perform action on one record under its object lock.
pub async fn perform(
    cx: &OpContext,
    class: &str,
    ident: &str,
    action: &str,
    params: Value,
) -> Result<ActionOutcome> {
    let engine = &cx.engine;
    let spec = engine.spec(class)?;
    let found = find(cx, &spec, ident).await?;
    let handler = engine
        .hooks(class)
        .actions(&spec)
        .get(action)
        .ok_or_else(|| CloudError::not_supported(format!("{} on {}", action, spec.keyword)))?;

    let _guard = engine
        .locks
        .lock_object(&cx.unit, spec.keyword, &found.id)
        .await;
    let record = engine.load(&spec, &found.id).await?;
    debug!(record = %record.reference(), action, "Perform");
    handler(cx.clone(), spec, record, params).await
}

/// Names of the perform actions `class` answers to.
pub fn actions(cx: &OpContext, class: &str) -> Result<Vec<&'static str>> {
    let spec = cx.engine.spec(class)?;
    Ok(cx.engine.hooks(class).actions(&spec).names())
}

/// Perform actions on a provider: `sync` (as a task), `enable`, `disable`.
pub async fn perform_provider(
    cx: &OpContext,
    provider_ref: &str,
    action: &str,
    params: Value,
) -> Result<ActionOutcome> {
    if !cx.identity.is_system_admin() {
        return Err(CloudError::forbidden("provider actions require a system admin"));
    }
    let engine = &cx.engine;
    match action {
        "sync" => {
            let options = CycleOptions {
                force: params.get("force").and_then(Value::as_bool).unwrap_or(false),
                xor: params.get("xor").and_then(Value::as_bool).unwrap_or(false),
            };
            let task_id = provider_task::start(cx, provider_ref, options).await?;
            Ok(ActionOutcome {
                task_id: Some(task_id),
                ..ActionOutcome::default()
            })
        }
        "enable" | "disable" => {
            let provider = engine
                .providers
                .set_enabled(provider_ref, action == "enable")
                .await?;
            Ok(ActionOutcome {
                result: json!({ "id": provider.id, "enabled": provider.enabled }),
                ..ActionOutcome::default()
            })
        }
        other => Err(CloudError::not_supported(format!("{} on cloudprovider", other))),
    }
}
