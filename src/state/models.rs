use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timer::Timer;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ─── Resource Records ───────────────────────────────────────────────────────

/// A locally materialized cloud object of any registered class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    /// Registry keyword; not a column, filled in when the row is loaded.
    pub class: String,
    pub name: String,
    pub description: String,
    /// Provider-issued global id. Empty until materialized remotely.
    pub external_id: String,
    pub domain_id: String,
    pub project_id: String,
    /// "local", "cloud" or "system".
    pub project_src: String,
    pub manager_id: Option<String>,
    pub region_id: Option<String>,
    pub zone_id: Option<String>,
    pub parent_id: Option<String>,
    pub status: String,
    pub status_reason: String,
    pub enabled: bool,
    pub is_emulated: bool,
    pub attributes: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
    pub last_sync_at: Option<String>,
    pub last_ref_at: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<String>,
}

impl ResourceRecord {
    pub fn new(class: &str, name: &str) -> Self {
        let now = now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            class: class.to_string(),
            name: name.to_string(),
            description: String::new(),
            external_id: String::new(),
            domain_id: String::new(),
            project_id: String::new(),
            project_src: project_src::LOCAL.to_string(),
            manager_id: None,
            region_id: None,
            zone_id: None,
            parent_id: None,
            status: String::new(),
            status_reason: String::new(),
            enabled: true,
            is_emulated: false,
            attributes: Map::new(),
            created_at: now.clone(),
            updated_at: now,
            last_sync_at: None,
            last_ref_at: None,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(|v| v.as_i64())
    }

    pub fn set_attr(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    /// Managed records have a remote side owned by a provider.
    pub fn is_managed(&self) -> bool {
        self.manager_id.is_some()
    }

    /// Materialized on the cloud.
    pub fn is_external(&self) -> bool {
        !self.external_id.is_empty()
    }

    /// Short reference used in logs and diagnostics.
    pub fn reference(&self) -> String {
        format!("{}/{}({})", self.class, self.name, self.id)
    }
}

/// Where generated names must be unique: under one parent, or for top-level
/// classes within one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameScope {
    pub parent_id: Option<String>,
    pub domain_id: Option<String>,
    pub project_id: Option<String>,
}

impl NameScope {
    pub fn parent(parent_id: &str) -> Self {
        Self {
            parent_id: Some(parent_id.to_string()),
            ..Self::default()
        }
    }

    pub fn owner(domain_id: &str, project_id: Option<&str>) -> Self {
        Self {
            parent_id: None,
            domain_id: Some(domain_id.to_string()),
            project_id: project_id.map(str::to_string),
        }
    }
}

/// Ownership provenance tags.
pub mod project_src {
    pub const LOCAL: &str = "local";
    pub const CLOUD: &str = "cloud";
    pub const SYSTEM: &str = "system";
}

// ─── Providers ──────────────────────────────────────────────────────────────

/// A cloud account + endpoint + credentials entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub account_id: String,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub credentials: String,
    pub domain_id: String,
    pub project_id: String,
    pub project_src: String,
    pub enabled: bool,
    pub status: String,
    pub sync_status: String,
    pub balance: Option<f64>,
    pub sync_cooldown_secs: Option<i64>,
    pub last_sync_at: Option<String>,
    pub last_sync_end_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProviderRecord {
    pub fn new(name: &str, brand: &str) -> Self {
        let now = now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            brand: brand.to_string(),
            account_id: String::new(),
            endpoint: String::new(),
            credentials: String::new(),
            domain_id: "default".to_string(),
            project_id: String::new(),
            project_src: project_src::LOCAL.to_string(),
            enabled: true,
            status: "init".to_string(),
            sync_status: "idle".to_string(),
            balance: None,
            sync_cooldown_secs: None,
            last_sync_at: None,
            last_sync_end_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Remote projects map onto local projects.
    pub fn maps_cloud_projects(&self) -> bool {
        self.project_src == project_src::CLOUD
    }
}

// ─── Projects ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub domain_id: String,
    pub created_at: String,
}

impl ProjectRecord {
    pub fn new(domain_id: &str, name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            domain_id: domain_id.to_string(),
            created_at: now(),
        }
    }
}

// ─── Tasks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageEntry {
    pub stage: String,
    pub complete_at: String,
}

/// A persisted asynchronous operation on exactly one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: String,
    pub obj_class: String,
    pub obj_id: String,
    pub obj_name: String,
    pub params: Value,
    pub parent_id: Option<String>,
    pub stage: String,
    pub status: String,
    pub stages: Vec<StageEntry>,
    pub failed_reasons: Vec<String>,
    pub result: Value,
    pub user_id: String,
    pub domain_id: String,
    pub project_id: String,
    pub cancel_requested: bool,
    pub created_at: String,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
}

impl TaskRecord {
    pub fn new(kind: &str, obj_class: &str, obj_id: &str, obj_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            obj_class: obj_class.to_string(),
            obj_id: obj_id.to_string(),
            obj_name: obj_name.to_string(),
            params: Value::Object(Map::new()),
            parent_id: None,
            stage: "on_init".to_string(),
            status: task_status::QUEUED.to_string(),
            stages: Vec::new(),
            failed_reasons: Vec::new(),
            result: Value::Null,
            user_id: String::new(),
            domain_id: String::new(),
            project_id: String::new(),
            cancel_requested: false,
            created_at: now(),
            start_at: None,
            end_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            task_status::DONE | task_status::FAILED | task_status::CANCELLED
        )
    }
}

/// Task lifecycle values.
pub mod task_status {
    pub const QUEUED: &str = "queued";
    pub const RUNNING: &str = "running";
    /// Parked until its subtasks for the current stage finish.
    pub const WAITING: &str = "waiting";
    pub const DONE: &str = "done";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";
}

/// A child task registered against one stage of its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub task_id: String,
    pub stage: String,
    pub subtask_id: String,
    pub status: String,
    pub result: Value,
}

pub mod subtask_status {
    pub const INIT: &str = "init";
    pub const COMPLETE: &str = "complete";
    pub const FAIL: &str = "fail";
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub obj_id: Option<String>,
    pub parent_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

// ─── Relations, Quotas, Metadata ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRow {
    pub id: String,
    pub left_id: String,
    pub right_id: String,
    pub attributes: Map<String, Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaRecord {
    pub domain_id: String,
    pub resource: String,
    pub used: i64,
    pub pending: i64,
}

// ─── Scheduled Operations ───────────────────────────────────────────────────

/// A timer bound to a perform action on one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskRecord {
    pub id: String,
    pub name: String,
    pub domain_id: String,
    pub resource_class: String,
    pub resource_id: String,
    pub action: String,
    pub params: Value,
    pub timer: Timer,
    pub enabled: bool,
    pub last_run_at: Option<String>,
    pub last_result: String,
    pub created_at: String,
}

impl ScheduledTaskRecord {
    pub fn new(name: &str, resource_class: &str, resource_id: &str, action: &str, timer: Timer) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            domain_id: "default".to_string(),
            resource_class: resource_class.to_string(),
            resource_id: resource_id.to_string(),
            action: action.to_string(),
            params: Value::Object(Map::new()),
            timer,
            enabled: true,
            last_run_at: None,
            last_result: String::new(),
            created_at: now(),
        }
    }
}
