//! Per-class lifecycle hooks and the admin-facing resource service.

pub mod cachedimage;
pub mod cloudregion;
pub mod dns_record;
pub mod dns_zone;
pub mod elasticcache;
pub mod externalproject;
pub mod generic;
pub mod inter_vpc;
pub mod loadbalancer;
pub mod service;
pub mod waf;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::OpContext;
use crate::error::Result;
use crate::provider::RemoteHandle;
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;
use crate::sync::SyncScope;

// ─── Operation Inputs ───────────────────────────────────────────────────────

/// Create request. Unknown top-level keys land in `extra` and are left to
/// class hooks (e.g. `vpc_ids` for DNS zones).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateInput {
    pub name: String,
    /// Pick a free name derived from `name` instead of failing on a clash.
    pub generate_name: bool,
    pub description: String,
    /// Provider that owns the remote side; absent for local-only records.
    pub manager_id: Option<String>,
    pub region_id: Option<String>,
    pub zone_id: Option<String>,
    pub parent_id: Option<String>,
    /// Owner override, honored for admins only.
    pub domain_id: Option<String>,
    pub project_id: Option<String>,
    pub attributes: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CreateInput {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub attributes: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a perform action produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionOutcome {
    pub record: Option<ResourceRecord>,
    pub task_id: Option<String>,
    pub result: Value,
}

impl ActionOutcome {
    pub fn task(record: ResourceRecord, task_id: String) -> Self {
        Self {
            record: Some(record),
            task_id: Some(task_id),
            result: Value::Null,
        }
    }

    pub fn done(record: ResourceRecord) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }
}

pub type ActionHandler = Arc<
    dyn Fn(OpContext, Arc<ClassSpec>, ResourceRecord, Value) -> BoxFuture<'static, Result<ActionOutcome>>
        + Send
        + Sync,
>;

/// Named perform-* handlers for one class.
#[derive(Clone, Default)]
pub struct ActionTable {
    handlers: BTreeMap<&'static str, ActionHandler>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(OpContext, Arc<ClassSpec>, ResourceRecord, Value) -> BoxFuture<'static, Result<ActionOutcome>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    /// Overlay `other` on top of this table.
    pub fn merge(mut self, other: ActionTable) -> Self {
        self.handlers.extend(other.handlers);
        self
    }

    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

// ─── Hooks ──────────────────────────────────────────────────────────────────

/// Customization points of the generic create/update/delete/sync pipeline.
///
/// Every method defaults to the generic behavior in [`generic`]; class hooks
/// override what they need and usually delegate to the generic step.
#[async_trait]
pub trait ResourceHooks: Send + Sync {
    /// Check and normalize a create request. May reserve quota.
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        input: CreateInput,
    ) -> Result<CreateInput> {
        generic::validate_create(cx, spec, input).await
    }

    /// Runs after the row is inserted. Returns the id of a started task.
    async fn post_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        input: &CreateInput,
    ) -> Result<Option<String>> {
        generic::post_create(cx, spec, record, input).await
    }

    async fn validate_update(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        input: UpdateInput,
    ) -> Result<UpdateInput> {
        generic::validate_update(cx, spec, record, input).await
    }

    async fn post_update(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        input: &UpdateInput,
    ) -> Result<Option<String>> {
        generic::post_update(cx, spec, record, input).await
    }

    async fn validate_delete(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
    ) -> Result<()> {
        generic::validate_delete(cx, spec, record).await
    }

    /// Record delete intent: the row moves to the class's deleting status.
    async fn delete(&self, cx: &OpContext, spec: &Arc<ClassSpec>, record: &ResourceRecord) -> Result<()> {
        generic::delete(cx, spec, record).await
    }

    /// Schedule the delete task. Returns its id.
    async fn customize_delete(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
    ) -> Result<Option<String>> {
        generic::customize_delete(cx, spec, record).await
    }

    /// Remove the row, its children, relations and metadata.
    async fn real_delete(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
    ) -> Result<()> {
        generic::real_delete(cx, spec, record).await
    }

    /// The remote object vanished.
    async fn sync_remove(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
    ) -> Result<()> {
        generic::sync_remove(cx, spec, record).await
    }

    /// Copy remote state onto an existing record. Callers hold its object lock.
    async fn sync_with_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        generic::sync_with_cloud(cx, spec, record, remote, scope).await
    }

    /// Materialize a new local record for a remote object.
    async fn new_from_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        generic::new_from_cloud(cx, spec, remote, scope).await
    }

    fn actions(&self, spec: &ClassSpec) -> ActionTable {
        generic::standard_actions(spec)
    }
}

/// Hooks for every class that customizes the generic pipeline.
pub fn builtin_hooks() -> BTreeMap<&'static str, Arc<dyn ResourceHooks>> {
    let mut hooks: BTreeMap<&'static str, Arc<dyn ResourceHooks>> = BTreeMap::new();
    hooks.insert("cloudregion", Arc::new(cloudregion::RegionHooks));
    hooks.insert("dns_zone", Arc::new(dns_zone::DnsZoneHooks));
    hooks.insert("dns_record", Arc::new(dns_record::DnsRecordHooks));
    hooks.insert("elasticcache", Arc::new(elasticcache::ChangeConfigHooks));
    hooks.insert("dbinstance", Arc::new(elasticcache::ChangeConfigHooks));
    hooks.insert("loadbalancer_acl", Arc::new(loadbalancer::AclHooks));
    hooks.insert("inter_vpc_network_route", Arc::new(inter_vpc::RouteHooks));
    hooks.insert("inter_vpc_network", Arc::new(inter_vpc::InterVpcHooks));
    hooks.insert("cachedimage", Arc::new(cachedimage::CachedImageHooks));
    hooks.insert("externalproject", Arc::new(externalproject::ExternalProjectHooks));
    hooks.insert("waf_instance", Arc::new(waf::WafHooks));
    hooks
}
