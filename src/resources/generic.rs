//! Default create/update/delete/sync behavior shared by every class.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{service, ActionOutcome, ActionTable, CreateInput, ResourceHooks, UpdateInput};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::identity::Role;
use crate::provider::RemoteHandle;
use crate::query::{ManagedFilter, ResourceQuery};
use crate::registry::{Capability, ChildPolicy, ClassSpec, Locality, Ownership, Visibility};
use crate::state::models::{project_src, ResourceRecord};
use crate::sync::naming::{is_free, name_scope, reserve_name};
use crate::sync::project::resolve_owner;
use crate::sync::SyncScope;
use crate::task::{self, kinds};

/// Hooks for classes with no customization.
pub struct GenericHooks;

impl ResourceHooks for GenericHooks {}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ─── Create ─────────────────────────────────────────────────────────────────

pub async fn validate_create(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    mut input: CreateInput,
) -> Result<CreateInput> {
    if !spec.has(Capability::Create) {
        return Err(CloudError::not_supported(format!("create {}", spec.keyword)));
    }
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err(CloudError::missing_parameter("name"));
    }
    let engine = &cx.engine;

    if let Some(parent_kw) = spec.parent {
        let parent_ref = input
            .parent_id
            .clone()
            .ok_or_else(|| CloudError::missing_parameter("parent_id"))?;
        let parent_spec = engine.spec(parent_kw)?;
        let parent = service::find(cx, &parent_spec, &parent_ref).await?;
        if parent.status != parent_spec.statuses.ready {
            return Err(CloudError::invalid_status(
                parent.status.clone(),
                parent_spec.statuses.ready,
            ));
        }
        input.parent_id = Some(parent.id.clone());
        input.manager_id = input.manager_id.or_else(|| parent.manager_id.clone());
        input.region_id = input.region_id.or_else(|| parent.region_id.clone());
        input.zone_id = input.zone_id.or_else(|| parent.zone_id.clone());
        input.domain_id = Some(parent.domain_id.clone());
        input.project_id = Some(parent.project_id.clone());
    } else {
        resolve_create_owner(cx, spec, &mut input)?;
    }

    if let Some(manager_ref) = input.manager_id.clone() {
        let provider = engine.providers.get(&manager_ref).await?;
        if !provider.enabled {
            return Err(CloudError::invalid_status("disabled", "enabled"));
        }
        input.manager_id = Some(provider.id);
    }
    if let Some(region_id) = input.region_id.clone() {
        let region = engine.load(&*engine.spec("cloudregion")?, &region_id).await?;
        if input.manager_id.is_some() && region.manager_id != input.manager_id {
            return Err(CloudError::conflict(format!(
                "region {} belongs to another provider",
                region.name
            )));
        }
    }
    if let Some(zone_id) = input.zone_id.clone() {
        let zone = engine.load(&*engine.spec("zone")?, &zone_id).await?;
        if input.region_id.is_none() {
            input.region_id = zone.parent_id.clone();
        }
    }
    if spec.locality != Locality::Global && input.manager_id.is_some() && input.region_id.is_none() {
        return Err(CloudError::missing_parameter("region_id"));
    }

    check_create_fields(spec, &input.attributes)?;

    if !input.generate_name {
        let scope = name_scope(
            spec,
            input.parent_id.as_deref(),
            input.domain_id.as_deref().unwrap_or_default(),
            input.project_id.as_deref().unwrap_or_default(),
        );
        if !is_free(cx, spec, &scope, &input.name).await? {
            return Err(CloudError::conflict(format!(
                "{} name {} already in use",
                spec.keyword, input.name
            )));
        }
    }

    if let Some(resource) = spec.quota {
        let domain = input.domain_id.clone().unwrap_or_default();
        engine.quotas.reserve(&domain, resource).await?;
    }
    Ok(input)
}

/// Fill the owner of a top-level create from the caller. Only admins may
/// place a record outside their own project.
fn resolve_create_owner(cx: &OpContext, spec: &ClassSpec, input: &mut CreateInput) -> Result<()> {
    let identity = &cx.identity;
    let domain = match input.domain_id.take() {
        Some(d) if d != identity.domain_id && !identity.is_system_admin() => {
            return Err(CloudError::forbidden(format!(
                "{} may not create in domain {}",
                identity.user_id, d
            )));
        }
        Some(d) => d,
        None => identity.domain_id.clone(),
    };
    let project = match input.project_id.take() {
        Some(p) if p != identity.project_id && identity.role == Role::Member => {
            return Err(CloudError::forbidden(format!(
                "{} may not create in project {}",
                identity.user_id, p
            )));
        }
        Some(p) => p,
        None => identity.project_id.clone(),
    };
    if spec.ownership == Ownership::Project && project.is_empty() {
        return Err(CloudError::missing_parameter("project_id"));
    }
    input.domain_id = Some(domain);
    input.project_id = Some(match spec.ownership {
        Ownership::Project => project,
        _ => String::new(),
    });
    Ok(())
}

fn check_create_fields(spec: &ClassSpec, attributes: &Map<String, Value>) -> Result<()> {
    for field in &spec.fields {
        if field.create == Visibility::Required && !attributes.contains_key(field.name) {
            return Err(CloudError::missing_parameter(field.name));
        }
    }
    for (key, value) in attributes {
        let field = spec.field_spec(key).ok_or_else(|| {
            CloudError::input_parameter(format!("{} has no attribute {}", spec.keyword, key))
        })?;
        if field.create == Visibility::Hidden {
            return Err(CloudError::input_parameter(format!(
                "{} cannot be set on create",
                key
            )));
        }
        field.check(value)?;
    }
    Ok(())
}

pub async fn post_create(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
    _input: &CreateInput,
) -> Result<Option<String>> {
    if let Some(resource) = spec.quota {
        cx.engine.quotas.commit(&record.domain_id, resource).await?;
    }
    if !record.is_managed() {
        cx.engine
            .store
            .set_status(spec, &record.id, spec.statuses.ready, "")
            .await?;
        return Ok(None);
    }
    let task_id = task::start_for(cx, kinds::CREATE, record, Value::Null).await?;
    Ok(Some(task_id))
}

// ─── Update ─────────────────────────────────────────────────────────────────

pub async fn validate_update(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
    mut input: UpdateInput,
) -> Result<UpdateInput> {
    if !spec.has(Capability::Update) {
        return Err(CloudError::not_supported(format!("update {}", spec.keyword)));
    }
    if spec.statuses.is_transitional(&record.status) {
        return Err(CloudError::invalid_status(
            record.status.clone(),
            spec.statuses.ready,
        ));
    }
    if let Some(name) = input.name.take() {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CloudError::input_parameter("name must not be empty"));
        }
        if name != record.name {
            let scope = name_scope(
                spec,
                record.parent_id.as_deref(),
                &record.domain_id,
                &record.project_id,
            );
            if !is_free(cx, spec, &scope, &name).await? {
                return Err(CloudError::conflict(format!(
                    "{} name {} already in use",
                    spec.keyword, name
                )));
            }
            input.name = Some(name);
        }
    }
    for (key, value) in &input.attributes {
        let field = spec.field_spec(key).ok_or_else(|| {
            CloudError::input_parameter(format!("{} has no attribute {}", spec.keyword, key))
        })?;
        if !field.updatable {
            return Err(CloudError::input_parameter(format!("{} is not updatable", key)));
        }
        field.check(value)?;
    }
    Ok(input)
}

/// Push observable changes of a materialized record to its provider.
pub async fn post_update(
    cx: &OpContext,
    _spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
    input: &UpdateInput,
) -> Result<Option<String>> {
    if !record.is_managed() || !record.is_external() {
        return Ok(None);
    }
    if input.name.is_none() && input.attributes.is_empty() {
        return Ok(None);
    }
    let mut params = input.attributes.clone();
    if let Some(ref name) = input.name {
        params.insert("name".to_string(), json!(name));
    }
    let task_id = task::start_for(
        cx,
        kinds::UPDATE,
        record,
        json!({ "verb": "update", "params": params }),
    )
    .await?;
    Ok(Some(task_id))
}

// ─── Delete ─────────────────────────────────────────────────────────────────

pub async fn validate_delete(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
) -> Result<()> {
    if !spec.has(Capability::Delete) {
        return Err(CloudError::not_supported(format!("delete {}", spec.keyword)));
    }
    if record.status == spec.statuses.deleting {
        return Err(CloudError::invalid_status(record.status.clone(), "not deleting"));
    }
    check_no_blocking_children(cx, spec, record).await
}

/// Refuse while a child class with the blocking policy still has live rows.
pub async fn check_no_blocking_children(
    cx: &OpContext,
    spec: &ClassSpec,
    record: &ResourceRecord,
) -> Result<()> {
    for child in cx.engine.registry.children_of(spec.keyword) {
        if child.child_policy != ChildPolicy::Block {
            continue;
        }
        let live = cx.engine.store.count_children(&child, &record.id).await?;
        if live > 0 {
            return Err(CloudError::not_empty(format!(
                "{} still has {} {}",
                record.reference(),
                live,
                child.plural
            )));
        }
    }
    Ok(())
}

/// Record delete intent.
pub async fn delete(cx: &OpContext, spec: &Arc<ClassSpec>, record: &ResourceRecord) -> Result<()> {
    cx.engine
        .store
        .set_status(spec, &record.id, spec.statuses.deleting, "")
        .await
}

pub async fn customize_delete(
    cx: &OpContext,
    _spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
) -> Result<Option<String>> {
    let task_id = task::start_for(cx, kinds::DELETE, record, Value::Null).await?;
    Ok(Some(task_id))
}

/// Children first, then relations and metadata, then the tombstone.
pub async fn real_delete(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
) -> Result<()> {
    let engine = &cx.engine;
    for child_spec in engine.registry.children_of(spec.keyword) {
        let query = ResourceQuery::new(child_spec.clone()).filter_by_parent(&record.id);
        for child in engine.store.fetch(&query).await? {
            let _guard = engine
                .locks
                .lock_object(&cx.unit, child_spec.keyword, &child.id)
                .await;
            engine
                .hooks(child_spec.keyword)
                .real_delete(cx, &child_spec, &child)
                .await?;
        }
    }
    for relation in engine.registry.relations_of(spec.keyword) {
        let purged = engine.store.purge_relations(relation, &record.id).await?;
        if purged > 0 {
            debug!(relation = relation.name, purged, record = %record.reference(), "Purged relation rows");
        }
    }
    engine.store.delete_metadata(spec.keyword, &record.id).await?;
    engine.store.mark_deleted(spec, &record.id).await?;
    // Only locally created records were charged.
    if let Some(resource) = spec.quota {
        if record.project_src == project_src::LOCAL {
            engine.quotas.release(&record.domain_id, resource).await?;
        }
    }
    info!(record = %record.reference(), "Deleted record");
    Ok(())
}

/// The remote side vanished: remove the row if nothing blocks it, otherwise
/// flag it with the class's lost status and report the failure.
pub async fn sync_remove(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
) -> Result<()> {
    let outcome = match check_no_blocking_children(cx, spec, record).await {
        Ok(()) => {
            cx.engine
                .hooks(spec.keyword)
                .real_delete(cx, spec, record)
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(ref e) = outcome {
        cx.engine
            .store
            .set_status(spec, &record.id, spec.statuses.lost, &e.to_string())
            .await?;
    }
    outcome
}

// ─── Sync ───────────────────────────────────────────────────────────────────

/// Copy synced fields, status, emulation flag and zone from a remote handle.
pub async fn apply_remote(
    cx: &OpContext,
    spec: &ClassSpec,
    record: &mut ResourceRecord,
    remote: &RemoteHandle,
    scope: &SyncScope,
) -> Result<()> {
    for field in spec.synced_fields() {
        match remote.attribute(field.name) {
            Some(value) if !value.is_null() => record.set_attr(field.name, value),
            _ => {
                record.attributes.remove(field.name);
            }
        }
    }
    if let Some(Value::Bool(enabled)) = remote.attribute("enabled") {
        record.enabled = enabled;
    }
    if !remote.status().is_empty() {
        record.status = remote.status().to_string();
    } else if record.status.is_empty() {
        record.status = spec.statuses.ready.to_string();
    }
    record.is_emulated = remote.is_emulated();
    if spec.locality == Locality::Zonal {
        if let Some(zone_gid) = remote.zone_id() {
            record.zone_id = local_zone(cx, &scope.provider.id, zone_gid).await?;
        }
    }
    record.last_sync_at = Some(now());
    Ok(())
}

async fn local_zone(cx: &OpContext, provider_id: &str, zone_gid: &str) -> Result<Option<String>> {
    let query = ResourceQuery::new(cx.engine.spec("zone")?)
        .filter_by_managed(&ManagedFilter::provider(provider_id))
        .filter_by_external_id(zone_gid)
        .limit(1);
    Ok(cx.engine.store.fetch(&query).await?.into_iter().next().map(|z| z.id))
}

/// Store remote tags as `ext:` metadata, replacing the previous set.
pub async fn sync_tags(cx: &OpContext, spec: &ClassSpec, record: &ResourceRecord, remote: &RemoteHandle) -> Result<()> {
    let tags: BTreeMap<String, String> = remote.tags().clone();
    cx.engine
        .store
        .replace_metadata(spec.keyword, &record.id, "ext:", &tags)
        .await
}

pub async fn sync_with_cloud(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    record: &ResourceRecord,
    remote: &RemoteHandle,
    scope: &SyncScope,
) -> Result<ResourceRecord> {
    let mut updated = record.clone();
    apply_remote(cx, spec, &mut updated, remote, scope).await?;
    resolve_owner(cx, spec, scope, remote, Some(record))
        .await?
        .apply(&mut updated);

    let remote_name = remote.name();
    let reserved = if !remote_name.is_empty() && remote_name != record.name {
        let names = name_scope(
            spec,
            updated.parent_id.as_deref(),
            &updated.domain_id,
            &updated.project_id,
        );
        let reserved = reserve_name(cx, spec, &names, remote_name, Some(&record.name)).await?;
        updated.name = reserved.name.clone();
        Some(reserved)
    } else {
        None
    };
    updated.updated_at = now();
    cx.engine.store.update_resource(spec, &updated).await?;
    drop(reserved);
    sync_tags(cx, spec, &updated, remote).await?;
    Ok(updated)
}

pub async fn new_from_cloud(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    remote: &RemoteHandle,
    scope: &SyncScope,
) -> Result<ResourceRecord> {
    let base = if remote.name().is_empty() {
        remote.global_id()
    } else {
        remote.name()
    };
    let mut record = ResourceRecord::new(spec.keyword, base);
    record.external_id = remote.global_id().to_string();
    record.manager_id = Some(scope.provider.id.clone());
    record.parent_id = scope.parent.as_ref().map(|p| p.id.clone());
    if spec.locality != Locality::Global {
        record.region_id = scope.region_id();
    }
    if let Some(created) = remote.created_at() {
        record.created_at = created.to_string();
    }
    apply_remote(cx, spec, &mut record, remote, scope).await?;
    resolve_owner(cx, spec, scope, remote, None)
        .await?
        .apply(&mut record);

    let names = name_scope(
        spec,
        record.parent_id.as_deref(),
        &record.domain_id,
        &record.project_id,
    );
    {
        let reserved = reserve_name(cx, spec, &names, base, None).await?;
        record.name = reserved.name.clone();
        cx.engine.store.insert_resource(spec, &record).await?;
    }
    sync_tags(cx, spec, &record, remote).await?;
    debug!(record = %record.reference(), external_id = %record.external_id, "Materialized from cloud");
    Ok(record)
}

// ─── Actions ────────────────────────────────────────────────────────────────

/// Actions every class gets: `syncstatus` where supported, `purge`, and
/// local `enable`/`disable`.
pub fn standard_actions(spec: &ClassSpec) -> ActionTable {
    let mut table = ActionTable::new()
        .register("purge", |cx, spec, record, _params| {
            async move {
                if !cx.identity.is_system_admin() {
                    return Err(CloudError::forbidden("purge requires a system admin"));
                }
                cx.engine
                    .hooks(spec.keyword)
                    .real_delete(&cx, &spec, &record)
                    .await?;
                Ok(ActionOutcome {
                    result: json!({ "purged": record.id }),
                    ..ActionOutcome::default()
                })
            }
            .boxed()
        })
        .register("enable", |cx, spec, record, _params| set_enabled(cx, spec, record, true).boxed())
        .register("disable", |cx, spec, record, _params| {
            set_enabled(cx, spec, record, false).boxed()
        });
    if spec.has(Capability::SyncStatus) {
        table = table.register("syncstatus", |cx, _spec, record, _params| {
            async move {
                if !record.is_managed() || !record.is_external() {
                    return Err(CloudError::invalid_status(
                        "local",
                        "materialized on a provider",
                    ));
                }
                let task_id = task::start_for(&cx, kinds::SYNCSTATUS, &record, Value::Null).await?;
                Ok(ActionOutcome::task(record, task_id))
            }
            .boxed()
        });
    }
    table
}

async fn set_enabled(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    mut record: ResourceRecord,
    enabled: bool,
) -> Result<ActionOutcome> {
    record.enabled = enabled;
    record.updated_at = now();
    cx.engine.store.update_resource(&spec, &record).await?;
    Ok(ActionOutcome::done(record))
}

/// Start an update task that sends `verb` with `params` to the provider.
pub async fn remote_verb(
    cx: &OpContext,
    spec: &ClassSpec,
    record: ResourceRecord,
    verb: &str,
    params: Value,
) -> Result<ActionOutcome> {
    if !record.is_managed() || !record.is_external() {
        return Err(CloudError::invalid_status("local", "materialized on a provider"));
    }
    if spec.statuses.is_transitional(&record.status) {
        return Err(CloudError::invalid_status(
            record.status.clone(),
            spec.statuses.ready,
        ));
    }
    let task_id = task::start_for(
        cx,
        kinds::UPDATE,
        &record,
        json!({ "verb": verb, "params": params }),
    )
    .await?;
    let record = cx.engine.load(spec, &record.id).await?;
    Ok(ActionOutcome::task(record, task_id))
}
