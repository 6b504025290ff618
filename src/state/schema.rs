/// SQL DDL for the cloudmirror state database.
///
/// Static tables hold providers, projects, tasks, quotas and sync metadata.
/// Resource class tables (`<plural>_tbl`) and relation tables are generated
/// from the registry so every class shares one column layout.
use crate::registry::{ClassSpec, RelationSpec};

pub const SCHEMA_VERSION: i32 = 1;

/// Columns every resource class table carries, in row order.
pub const RESOURCE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "description",
    "external_id",
    "domain_id",
    "project_id",
    "project_src",
    "manager_id",
    "region_id",
    "zone_id",
    "parent_id",
    "status",
    "status_reason",
    "enabled",
    "is_emulated",
    "attributes_json",
    "created_at",
    "updated_at",
    "last_sync_at",
    "last_ref_at",
    "deleted",
    "deleted_at",
];

pub const CREATE_TABLES_SQL: &str = "
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

-- Cloud providers: account + endpoint + credentials
CREATE TABLE IF NOT EXISTS cloudproviders_tbl (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    brand TEXT NOT NULL,
    account_id TEXT NOT NULL DEFAULT '',
    endpoint TEXT NOT NULL DEFAULT '',
    credentials TEXT NOT NULL DEFAULT '',
    domain_id TEXT NOT NULL,
    project_id TEXT NOT NULL DEFAULT '',
    project_src TEXT NOT NULL DEFAULT 'local',
    enabled INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL,
    sync_status TEXT NOT NULL,
    balance REAL,
    sync_cooldown_secs INTEGER,
    last_sync_at TEXT,
    last_sync_end_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Local projects
CREATE TABLE IF NOT EXISTS projects_tbl (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    domain_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(domain_id, name)
);

-- Asynchronous tasks
CREATE TABLE IF NOT EXISTS tasks_tbl (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    obj_class TEXT NOT NULL,
    obj_id TEXT NOT NULL,
    obj_name TEXT NOT NULL DEFAULT '',
    params_json TEXT NOT NULL DEFAULT '{}',
    parent_id TEXT,
    stage TEXT NOT NULL,
    status TEXT NOT NULL,
    stages_json TEXT NOT NULL DEFAULT '[]',
    failed_reasons_json TEXT NOT NULL DEFAULT '[]',
    result_json TEXT NOT NULL DEFAULT 'null',
    user_id TEXT NOT NULL DEFAULT '',
    domain_id TEXT NOT NULL DEFAULT '',
    project_id TEXT NOT NULL DEFAULT '',
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    start_at TEXT,
    end_at TEXT
);

-- Child tasks registered per parent stage
CREATE TABLE IF NOT EXISTS subtasks_tbl (
    task_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    subtask_id TEXT NOT NULL,
    status TEXT NOT NULL,
    result_json TEXT NOT NULL DEFAULT 'null',
    PRIMARY KEY (task_id, subtask_id)
);

-- Per-domain quota counters
CREATE TABLE IF NOT EXISTS quotas_tbl (
    domain_id TEXT NOT NULL,
    resource TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    pending INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (domain_id, resource)
);

-- Sync metadata key/value rows
CREATE TABLE IF NOT EXISTS metadata_tbl (
    obj_type TEXT NOT NULL,
    obj_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (obj_type, obj_id, key)
);

-- Timer-driven operations
CREATE TABLE IF NOT EXISTS scheduledtasks_tbl (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    domain_id TEXT NOT NULL,
    resource_class TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    action TEXT NOT NULL,
    params_json TEXT NOT NULL DEFAULT '{}',
    timer_json TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    last_result TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_tasks_obj ON tasks_tbl(obj_id);
CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks_tbl(parent_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks_tbl(status);
CREATE INDEX IF NOT EXISTS idx_subtasks_stage ON subtasks_tbl(task_id, stage);
";

/// DDL for one resource class table and its indexes.
pub fn class_table_sql(spec: &ClassSpec) -> String {
    let table = spec.table();
    format!(
        "
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    external_id TEXT NOT NULL DEFAULT '',
    domain_id TEXT NOT NULL DEFAULT '',
    project_id TEXT NOT NULL DEFAULT '',
    project_src TEXT NOT NULL DEFAULT 'local',
    manager_id TEXT NOT NULL DEFAULT '',
    region_id TEXT NOT NULL DEFAULT '',
    zone_id TEXT NOT NULL DEFAULT '',
    parent_id TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    status_reason TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1,
    is_emulated INTEGER NOT NULL DEFAULT 0,
    attributes_json TEXT NOT NULL DEFAULT '{{}}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_sync_at TEXT,
    last_ref_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_{plural}_external
    ON {table}(manager_id, parent_id, external_id)
    WHERE external_id != '' AND deleted = 0;
CREATE INDEX IF NOT EXISTS idx_{plural}_parent ON {table}(parent_id);
CREATE INDEX IF NOT EXISTS idx_{plural}_manager ON {table}(manager_id);
CREATE INDEX IF NOT EXISTS idx_{plural}_owner ON {table}(domain_id, project_id);
",
        table = table,
        plural = spec.plural,
    )
}

/// DDL for one relation table.
pub fn relation_table_sql(relation: &RelationSpec) -> String {
    let table = relation.table();
    format!(
        "
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    left_id TEXT NOT NULL,
    right_id TEXT NOT NULL,
    attributes_json TEXT NOT NULL DEFAULT '{{}}',
    created_at TEXT NOT NULL,
    UNIQUE(left_id, right_id)
);
CREATE INDEX IF NOT EXISTS idx_{name}_right ON {table}(right_id);
",
        table = table,
        name = relation.name,
    )
}
