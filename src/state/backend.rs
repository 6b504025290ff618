use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use super::models::{
    NameScope, ProjectRecord, ProviderRecord, QuotaRecord, RelationRow, ResourceRecord,
    ScheduledTaskRecord, SubtaskRecord, TaskFilter, TaskRecord,
};
use crate::error::Result;
use crate::query::ResourceQuery;
use crate::registry::{ClassSpec, Registry, RelationSpec};

/// Pluggable state backend trait.
/// Implemented by SQLite; every engine component goes through it.
#[async_trait]
pub trait StateBackend: Send + Sync {
    // ─── Initialization ─────────────────────────────────────────────────────

    /// Create static tables and one table per registered class and relation.
    async fn initialize(&self, registry: &Registry) -> Result<()>;

    // ─── Resource Records ───────────────────────────────────────────────────

    async fn insert_resource(&self, spec: &ClassSpec, record: &ResourceRecord) -> Result<()>;

    /// Overwrite every column of a live record.
    async fn update_resource(&self, spec: &ClassSpec, record: &ResourceRecord) -> Result<()>;

    /// Get a live (not soft-deleted) record by id.
    async fn get_resource(&self, spec: &ClassSpec, id: &str) -> Result<Option<ResourceRecord>>;

    /// Run a composed query and decode full records.
    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<ResourceRecord>>;

    /// Run a composed query honoring its projection; rows as JSON objects.
    async fn fetch_rows(&self, query: &ResourceQuery) -> Result<Vec<serde_json::Value>>;

    async fn count(&self, query: &ResourceQuery) -> Result<usize>;

    async fn set_status(&self, spec: &ClassSpec, id: &str, status: &str, reason: &str)
        -> Result<()>;

    /// Tombstone a record: `deleted = 1`, `deleted_at = now`.
    async fn mark_deleted(&self, spec: &ClassSpec, id: &str) -> Result<()>;

    /// Names of live records within a name-uniqueness scope.
    async fn live_names(&self, spec: &ClassSpec, scope: &NameScope) -> Result<HashSet<String>>;

    async fn count_children(&self, spec: &ClassSpec, parent_id: &str) -> Result<usize>;

    // ─── Providers ──────────────────────────────────────────────────────────

    async fn insert_provider(&self, provider: &ProviderRecord) -> Result<()>;

    async fn update_provider(&self, provider: &ProviderRecord) -> Result<()>;

    async fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>>;

    async fn get_provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>>;

    async fn list_providers(&self) -> Result<Vec<ProviderRecord>>;

    // ─── Projects ───────────────────────────────────────────────────────────

    async fn insert_project(&self, project: &ProjectRecord) -> Result<()>;

    async fn get_project_by_name(&self, domain_id: &str, name: &str)
        -> Result<Option<ProjectRecord>>;

    async fn list_projects(&self, domain_id: Option<&str>) -> Result<Vec<ProjectRecord>>;

    // ─── Tasks ──────────────────────────────────────────────────────────────

    async fn insert_task(&self, task: &TaskRecord) -> Result<()>;

    async fn update_task(&self, task: &TaskRecord) -> Result<()>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;

    /// Set the cooperative cancel flag. Returns false if the task is unknown.
    async fn request_cancel(&self, id: &str) -> Result<bool>;

    async fn insert_subtask(&self, subtask: &SubtaskRecord) -> Result<()>;

    async fn set_subtask_status(
        &self,
        task_id: &str,
        subtask_id: &str,
        status: &str,
        result: &serde_json::Value,
    ) -> Result<()>;

    async fn list_subtasks(&self, task_id: &str, stage: &str) -> Result<Vec<SubtaskRecord>>;

    // ─── Relations ──────────────────────────────────────────────────────────

    /// Link two ids. Linking an existing pair is a no-op.
    async fn add_relation(
        &self,
        relation: &RelationSpec,
        left_id: &str,
        right_id: &str,
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;

    async fn remove_relation(&self, relation: &RelationSpec, left_id: &str, right_id: &str)
        -> Result<()>;

    async fn list_relations(
        &self,
        relation: &RelationSpec,
        left_id: Option<&str>,
        right_id: Option<&str>,
    ) -> Result<Vec<RelationRow>>;

    /// Drop every row of `relation` that references `id` on either side.
    async fn purge_relations(&self, relation: &RelationSpec, id: &str) -> Result<usize>;

    // ─── Quotas ─────────────────────────────────────────────────────────────

    async fn get_quota(&self, domain_id: &str, resource: &str) -> Result<QuotaRecord>;

    /// Atomically add `count` to pending if `used + pending + count <= limit`.
    async fn reserve_quota(
        &self,
        domain_id: &str,
        resource: &str,
        count: i64,
        limit: Option<i64>,
    ) -> Result<()>;

    /// Move `count` from pending to used.
    async fn commit_quota(&self, domain_id: &str, resource: &str, count: i64) -> Result<()>;

    /// Drop `count` from pending.
    async fn cancel_quota(&self, domain_id: &str, resource: &str, count: i64) -> Result<()>;

    /// Drop `count` from used.
    async fn release_quota(&self, domain_id: &str, resource: &str, count: i64) -> Result<()>;

    // ─── Metadata ───────────────────────────────────────────────────────────

    async fn set_metadata(&self, obj_type: &str, obj_id: &str, key: &str, value: &str)
        -> Result<()>;

    async fn get_metadata(&self, obj_type: &str, obj_id: &str) -> Result<BTreeMap<String, String>>;

    /// Replace all keys under `prefix` with `values` (keys given without prefix).
    async fn replace_metadata(
        &self,
        obj_type: &str,
        obj_id: &str,
        prefix: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn delete_metadata(&self, obj_type: &str, obj_id: &str) -> Result<()>;

    // ─── Scheduled Operations ───────────────────────────────────────────────

    async fn insert_scheduled(&self, scheduled: &ScheduledTaskRecord) -> Result<()>;

    async fn update_scheduled(&self, scheduled: &ScheduledTaskRecord) -> Result<()>;

    async fn list_scheduled(&self, enabled_only: bool) -> Result<Vec<ScheduledTaskRecord>>;

    // ─── Query ──────────────────────────────────────────────────────────────

    /// Execute a raw SQL query against the state database.
    /// Returns rows as JSON values.
    async fn query_raw(&self, sql: &str) -> Result<Vec<serde_json::Value>>;
}
