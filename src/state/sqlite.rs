use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::backend::StateBackend;
use super::migration;
use super::models::*;
use super::schema::RESOURCE_COLUMNS;
use crate::error::{CloudError, Result};
use crate::query::ResourceQuery;
use crate::registry::{ClassSpec, Registry, RelationSpec};

/// SQLite-backed state store.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the SQLite state database.
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let parent = Path::new(db_path).parent();
        if let Some(dir) = parent {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open state database at {}", db_path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CloudError::general("state database mutex poisoned"))
    }
}

#[async_trait]
impl StateBackend for SqliteBackend {
    // ─── Initialization ─────────────────────────────────────────────────────

    async fn initialize(&self, registry: &Registry) -> Result<()> {
        let conn = self.conn()?;
        migration::check_and_migrate(&conn, registry)?;
        Ok(())
    }

    // ─── Resource Records ───────────────────────────────────────────────────

    async fn insert_resource(&self, spec: &ClassSpec, record: &ResourceRecord) -> Result<()> {
        let conn = self.conn()?;
        let placeholders: Vec<String> = (1..=RESOURCE_COLUMNS.len())
            .map(|i| format!("?{}", i))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.table(),
            RESOURCE_COLUMNS.join(", "),
            placeholders.join(", ")
        );
        let attrs = serde_json::to_string(&record.attributes)?;
        conn.execute(
            &sql,
            params![
                record.id,
                record.name,
                record.description,
                record.external_id,
                record.domain_id,
                record.project_id,
                record.project_src,
                record.manager_id.as_deref().unwrap_or(""),
                record.region_id.as_deref().unwrap_or(""),
                record.zone_id.as_deref().unwrap_or(""),
                record.parent_id.as_deref().unwrap_or(""),
                record.status,
                record.status_reason,
                record.enabled as i32,
                record.is_emulated as i32,
                attrs,
                record.created_at,
                record.updated_at,
                record.last_sync_at,
                record.last_ref_at,
                record.deleted as i32,
                record.deleted_at,
            ],
        )
        .map_err(|e| constraint_to_conflict(e, &record.reference()))?;
        Ok(())
    }

    async fn update_resource(&self, spec: &ClassSpec, record: &ResourceRecord) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET name = ?2, description = ?3, external_id = ?4, domain_id = ?5,
                project_id = ?6, project_src = ?7, manager_id = ?8, region_id = ?9,
                zone_id = ?10, parent_id = ?11, status = ?12, status_reason = ?13,
                enabled = ?14, is_emulated = ?15, attributes_json = ?16, updated_at = ?17,
                last_sync_at = ?18, last_ref_at = ?19
             WHERE id = ?1 AND deleted = 0",
            spec.table()
        );
        let attrs = serde_json::to_string(&record.attributes)?;
        let changed = conn
            .execute(
                &sql,
                params![
                    record.id,
                    record.name,
                    record.description,
                    record.external_id,
                    record.domain_id,
                    record.project_id,
                    record.project_src,
                    record.manager_id.as_deref().unwrap_or(""),
                    record.region_id.as_deref().unwrap_or(""),
                    record.zone_id.as_deref().unwrap_or(""),
                    record.parent_id.as_deref().unwrap_or(""),
                    record.status,
                    record.status_reason,
                    record.enabled as i32,
                    record.is_emulated as i32,
                    attrs,
                    Self::now(),
                    record.last_sync_at,
                    record.last_ref_at,
                ],
            )
            .map_err(|e| constraint_to_conflict(e, &record.reference()))?;
        if changed == 0 {
            return Err(CloudError::not_found(spec.keyword, &record.id));
        }
        Ok(())
    }

    async fn get_resource(&self, spec: &ClassSpec, id: &str) -> Result<Option<ResourceRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1 AND deleted = 0",
            RESOURCE_COLUMNS.join(", "),
            spec.table()
        );
        let record = conn
            .query_row(&sql, params![id], |row| resource_from_row(spec.keyword, row))
            .optional()?;
        Ok(record)
    }

    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<ResourceRecord>> {
        let conn = self.conn()?;
        let (sql, values) = query.to_sql();
        let keyword = query.spec().keyword;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                resource_from_row(keyword, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn fetch_rows(&self, query: &ResourceQuery) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn()?;
        let (sql, values) = query.to_rows_sql();
        let mut stmt = conn.prepare(&sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(row_to_json(row, &column_names))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn count(&self, query: &ResourceQuery) -> Result<usize> {
        let conn = self.conn()?;
        let (sql, values) = query.count_sql();
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn set_status(
        &self,
        spec: &ClassSpec,
        id: &str,
        status: &str,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET status = ?2, status_reason = ?3, updated_at = ?4
             WHERE id = ?1 AND deleted = 0",
            spec.table()
        );
        let changed = conn.execute(&sql, params![id, status, reason, Self::now()])?;
        if changed == 0 {
            return Err(CloudError::not_found(spec.keyword, id));
        }
        Ok(())
    }

    async fn mark_deleted(&self, spec: &ClassSpec, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::now();
        let sql = format!(
            "UPDATE {} SET deleted = 1, deleted_at = ?2, updated_at = ?2
             WHERE id = ?1 AND deleted = 0",
            spec.table()
        );
        conn.execute(&sql, params![id, now])?;
        Ok(())
    }

    async fn live_names(&self, spec: &ClassSpec, scope: &NameScope) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT name FROM {} WHERE deleted = 0", spec.table());
        let mut values: Vec<String> = Vec::new();
        if let Some(ref parent_id) = scope.parent_id {
            sql.push_str(" AND parent_id = ?");
            values.push(parent_id.clone());
        }
        if let Some(ref domain_id) = scope.domain_id {
            sql.push_str(" AND domain_id = ?");
            values.push(domain_id.clone());
        }
        if let Some(ref project_id) = scope.project_id {
            sql.push_str(" AND project_id = ?");
            values.push(project_id.clone());
        }
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    async fn count_children(&self, spec: &ClassSpec, parent_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE parent_id = ?1 AND deleted = 0",
            spec.table()
        );
        let count: i64 = conn.query_row(&sql, params![parent_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ─── Providers ──────────────────────────────────────────────────────────

    async fn insert_provider(&self, provider: &ProviderRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cloudproviders_tbl (id, name, brand, account_id, endpoint, credentials,
                domain_id, project_id, project_src, enabled, status, sync_status, balance,
                sync_cooldown_secs, last_sync_at, last_sync_end_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                provider.id,
                provider.name,
                provider.brand,
                provider.account_id,
                provider.endpoint,
                provider.credentials,
                provider.domain_id,
                provider.project_id,
                provider.project_src,
                provider.enabled as i32,
                provider.status,
                provider.sync_status,
                provider.balance,
                provider.sync_cooldown_secs,
                provider.last_sync_at,
                provider.last_sync_end_at,
                provider.created_at,
                provider.updated_at,
            ],
        )
        .map_err(|e| constraint_to_conflict(e, &format!("provider {}", provider.name)))?;
        Ok(())
    }

    async fn update_provider(&self, provider: &ProviderRecord) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE cloudproviders_tbl SET name = ?2, brand = ?3, account_id = ?4, endpoint = ?5,
                credentials = ?6, domain_id = ?7, project_id = ?8, project_src = ?9, enabled = ?10,
                status = ?11, sync_status = ?12, balance = ?13, sync_cooldown_secs = ?14,
                last_sync_at = ?15, last_sync_end_at = ?16, updated_at = ?17
             WHERE id = ?1",
            params![
                provider.id,
                provider.name,
                provider.brand,
                provider.account_id,
                provider.endpoint,
                provider.credentials,
                provider.domain_id,
                provider.project_id,
                provider.project_src,
                provider.enabled as i32,
                provider.status,
                provider.sync_status,
                provider.balance,
                provider.sync_cooldown_secs,
                provider.last_sync_at,
                provider.last_sync_end_at,
                Self::now(),
            ],
        )?;
        if changed == 0 {
            return Err(CloudError::not_found("cloudprovider", &provider.id));
        }
        Ok(())
    }

    async fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM cloudproviders_tbl WHERE id = ?1", PROVIDER_COLUMNS);
        let provider = conn
            .query_row(&sql, params![id], provider_from_row)
            .optional()?;
        Ok(provider)
    }

    async fn get_provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM cloudproviders_tbl WHERE name = ?1",
            PROVIDER_COLUMNS
        );
        let provider = conn
            .query_row(&sql, params![name], provider_from_row)
            .optional()?;
        Ok(provider)
    }

    async fn list_providers(&self) -> Result<Vec<ProviderRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM cloudproviders_tbl ORDER BY name",
            PROVIDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], provider_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ─── Projects ───────────────────────────────────────────────────────────

    async fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO projects_tbl (id, name, domain_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![project.id, project.name, project.domain_id, project.created_at],
        )
        .map_err(|e| constraint_to_conflict(e, &format!("project {}", project.name)))?;
        Ok(())
    }

    async fn get_project_by_name(
        &self,
        domain_id: &str,
        name: &str,
    ) -> Result<Option<ProjectRecord>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                "SELECT id, name, domain_id, created_at FROM projects_tbl
                 WHERE domain_id = ?1 AND name = ?2",
                params![domain_id, name],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    async fn list_projects(&self, domain_id: Option<&str>) -> Result<Vec<ProjectRecord>> {
        let conn = self.conn()?;
        let mut sql =
            String::from("SELECT id, name, domain_id, created_at FROM projects_tbl WHERE 1 = 1");
        let mut values: Vec<String> = Vec::new();
        if let Some(domain_id) = domain_id {
            sql.push_str(" AND domain_id = ?");
            values.push(domain_id.to_string());
        }
        sql.push_str(" ORDER BY domain_id, name");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    async fn insert_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks_tbl (id, kind, obj_class, obj_id, obj_name, params_json, parent_id,
                stage, status, stages_json, failed_reasons_json, result_json, user_id, domain_id,
                project_id, cancel_requested, created_at, start_at, end_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                task.id,
                task.kind,
                task.obj_class,
                task.obj_id,
                task.obj_name,
                serde_json::to_string(&task.params)?,
                task.parent_id,
                task.stage,
                task.status,
                serde_json::to_string(&task.stages)?,
                serde_json::to_string(&task.failed_reasons)?,
                serde_json::to_string(&task.result)?,
                task.user_id,
                task.domain_id,
                task.project_id,
                task.cancel_requested as i32,
                task.created_at,
                task.start_at,
                task.end_at,
            ],
        )?;
        Ok(())
    }

    async fn update_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        // cancel_requested is only ever raised through request_cancel.
        let changed = conn.execute(
            "UPDATE tasks_tbl SET params_json = ?2, stage = ?3, status = ?4, stages_json = ?5,
                failed_reasons_json = ?6, result_json = ?7, start_at = ?8, end_at = ?9
             WHERE id = ?1",
            params![
                task.id,
                serde_json::to_string(&task.params)?,
                task.stage,
                task.status,
                serde_json::to_string(&task.stages)?,
                serde_json::to_string(&task.failed_reasons)?,
                serde_json::to_string(&task.result)?,
                task.start_at,
                task.end_at,
            ],
        )?;
        if changed == 0 {
            return Err(CloudError::not_found("task", &task.id));
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM tasks_tbl WHERE id = ?1", TASK_COLUMNS);
        let task = conn.query_row(&sql, params![id], task_from_row).optional()?;
        Ok(task)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {} FROM tasks_tbl WHERE 1 = 1", TASK_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        if let Some(ref obj_id) = filter.obj_id {
            sql.push_str(" AND obj_id = ?");
            values.push(obj_id.clone());
        }
        if let Some(ref parent_id) = filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            values.push(parent_id.clone());
        }
        if let Some(ref status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(status.clone());
        }
        sql.push_str(" ORDER BY created_at DESC, id");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn request_cancel(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tasks_tbl SET cancel_requested = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    async fn insert_subtask(&self, subtask: &SubtaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO subtasks_tbl (task_id, stage, subtask_id, status, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                subtask.task_id,
                subtask.stage,
                subtask.subtask_id,
                subtask.status,
                serde_json::to_string(&subtask.result)?,
            ],
        )?;
        Ok(())
    }

    async fn set_subtask_status(
        &self,
        task_id: &str,
        subtask_id: &str,
        status: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE subtasks_tbl SET status = ?3, result_json = ?4
             WHERE task_id = ?1 AND subtask_id = ?2",
            params![task_id, subtask_id, status, serde_json::to_string(result)?],
        )?;
        Ok(())
    }

    async fn list_subtasks(&self, task_id: &str, stage: &str) -> Result<Vec<SubtaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, stage, subtask_id, status, result_json FROM subtasks_tbl
             WHERE task_id = ?1 AND stage = ?2 ORDER BY subtask_id",
        )?;
        let rows = stmt
            .query_map(params![task_id, stage], |row| {
                Ok(SubtaskRecord {
                    task_id: row.get(0)?,
                    stage: row.get(1)?,
                    subtask_id: row.get(2)?,
                    status: row.get(3)?,
                    result: json_col(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ─── Relations ──────────────────────────────────────────────────────────

    async fn add_relation(
        &self,
        relation: &RelationSpec,
        left_id: &str,
        right_id: &str,
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO {} (id, left_id, right_id, attributes_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(left_id, right_id) DO UPDATE SET attributes_json = excluded.attributes_json",
            relation.table()
        );
        conn.execute(
            &sql,
            params![
                uuid::Uuid::new_v4().to_string(),
                left_id,
                right_id,
                serde_json::to_string(attributes)?,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    async fn remove_relation(
        &self,
        relation: &RelationSpec,
        left_id: &str,
        right_id: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "DELETE FROM {} WHERE left_id = ?1 AND right_id = ?2",
            relation.table()
        );
        conn.execute(&sql, params![left_id, right_id])?;
        Ok(())
    }

    async fn list_relations(
        &self,
        relation: &RelationSpec,
        left_id: Option<&str>,
        right_id: Option<&str>,
    ) -> Result<Vec<RelationRow>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT id, left_id, right_id, attributes_json, created_at FROM {} WHERE 1 = 1",
            relation.table()
        );
        let mut values: Vec<String> = Vec::new();
        if let Some(left_id) = left_id {
            sql.push_str(" AND left_id = ?");
            values.push(left_id.to_string());
        }
        if let Some(right_id) = right_id {
            sql.push_str(" AND right_id = ?");
            values.push(right_id.to_string());
        }
        sql.push_str(" ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(RelationRow {
                    id: row.get(0)?,
                    left_id: row.get(1)?,
                    right_id: row.get(2)?,
                    attributes: json_col(row, 3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn purge_relations(&self, relation: &RelationSpec, id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let sql = format!(
            "DELETE FROM {} WHERE left_id = ?1 OR right_id = ?1",
            relation.table()
        );
        Ok(conn.execute(&sql, params![id])?)
    }

    // ─── Quotas ─────────────────────────────────────────────────────────────

    async fn get_quota(&self, domain_id: &str, resource: &str) -> Result<QuotaRecord> {
        let conn = self.conn()?;
        read_quota(&conn, domain_id, resource)
    }

    async fn reserve_quota(
        &self,
        domain_id: &str,
        resource: &str,
        count: i64,
        limit: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let current = read_quota(&conn, domain_id, resource)?;
        if let Some(limit) = limit {
            if current.used + current.pending + count > limit {
                return Err(CloudError::out_of_quota(resource, limit));
            }
        }
        conn.execute(
            "INSERT INTO quotas_tbl (domain_id, resource, used, pending) VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(domain_id, resource) DO UPDATE SET pending = pending + excluded.pending",
            params![domain_id, resource, count],
        )?;
        Ok(())
    }

    async fn commit_quota(&self, domain_id: &str, resource: &str, count: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO quotas_tbl (domain_id, resource, used, pending) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(domain_id, resource) DO UPDATE SET
                used = used + excluded.used,
                pending = MAX(pending - excluded.used, 0)",
            params![domain_id, resource, count],
        )?;
        Ok(())
    }

    async fn cancel_quota(&self, domain_id: &str, resource: &str, count: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE quotas_tbl SET pending = MAX(pending - ?3, 0)
             WHERE domain_id = ?1 AND resource = ?2",
            params![domain_id, resource, count],
        )?;
        Ok(())
    }

    async fn release_quota(&self, domain_id: &str, resource: &str, count: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE quotas_tbl SET used = MAX(used - ?3, 0)
             WHERE domain_id = ?1 AND resource = ?2",
            params![domain_id, resource, count],
        )?;
        Ok(())
    }

    // ─── Metadata ───────────────────────────────────────────────────────────

    async fn set_metadata(
        &self,
        obj_type: &str,
        obj_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO metadata_tbl (obj_type, obj_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(obj_type, obj_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![obj_type, obj_id, key, value, Self::now()],
        )?;
        Ok(())
    }

    async fn get_metadata(&self, obj_type: &str, obj_id: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM metadata_tbl WHERE obj_type = ?1 AND obj_id = ?2",
        )?;
        let rows = stmt
            .query_map(params![obj_type, obj_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
        Ok(rows)
    }

    async fn replace_metadata(
        &self,
        obj_type: &str,
        obj_id: &str,
        prefix: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let now = Self::now();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM metadata_tbl WHERE obj_type = ?1 AND obj_id = ?2 AND substr(key, 1, ?4) = ?3",
            params![obj_type, obj_id, prefix, prefix.len() as i64],
        )?;
        for (key, value) in values {
            tx.execute(
                "INSERT INTO metadata_tbl (obj_type, obj_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![obj_type, obj_id, format!("{}{}", prefix, key), value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_metadata(&self, obj_type: &str, obj_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM metadata_tbl WHERE obj_type = ?1 AND obj_id = ?2",
            params![obj_type, obj_id],
        )?;
        Ok(())
    }

    // ─── Scheduled Operations ───────────────────────────────────────────────

    async fn insert_scheduled(&self, scheduled: &ScheduledTaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduledtasks_tbl (id, name, domain_id, resource_class, resource_id,
                action, params_json, timer_json, enabled, last_run_at, last_result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                scheduled.id,
                scheduled.name,
                scheduled.domain_id,
                scheduled.resource_class,
                scheduled.resource_id,
                scheduled.action,
                serde_json::to_string(&scheduled.params)?,
                serde_json::to_string(&scheduled.timer)?,
                scheduled.enabled as i32,
                scheduled.last_run_at,
                scheduled.last_result,
                scheduled.created_at,
            ],
        )?;
        Ok(())
    }

    async fn update_scheduled(&self, scheduled: &ScheduledTaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scheduledtasks_tbl SET params_json = ?2, timer_json = ?3, enabled = ?4,
                last_run_at = ?5, last_result = ?6
             WHERE id = ?1",
            params![
                scheduled.id,
                serde_json::to_string(&scheduled.params)?,
                serde_json::to_string(&scheduled.timer)?,
                scheduled.enabled as i32,
                scheduled.last_run_at,
                scheduled.last_result,
            ],
        )?;
        Ok(())
    }

    async fn list_scheduled(&self, enabled_only: bool) -> Result<Vec<ScheduledTaskRecord>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, name, domain_id, resource_class, resource_id, action, params_json,
                    timer_json, enabled, last_run_at, last_result, created_at
             FROM scheduledtasks_tbl",
        );
        if enabled_only {
            sql.push_str(" WHERE enabled = 1");
        }
        sql.push_str(" ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ScheduledTaskRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    domain_id: row.get(2)?,
                    resource_class: row.get(3)?,
                    resource_id: row.get(4)?,
                    action: row.get(5)?,
                    params: json_col(row, 6)?,
                    timer: json_col(row, 7)?,
                    enabled: row.get::<_, i32>(8)? != 0,
                    last_run_at: row.get(9)?,
                    last_result: row.get(10)?,
                    created_at: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ─── Query ──────────────────────────────────────────────────────────────

    async fn query_raw(&self, sql: &str) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = stmt
            .query_map([], |row| Ok(row_to_json(row, &column_names)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ─── Helper functions ───────────────────────────────────────────────────────

const PROVIDER_COLUMNS: &str = "id, name, brand, account_id, endpoint, credentials, domain_id,
    project_id, project_src, enabled, status, sync_status, balance, sync_cooldown_secs,
    last_sync_at, last_sync_end_at, created_at, updated_at";

const TASK_COLUMNS: &str = "id, kind, obj_class, obj_id, obj_name, params_json, parent_id, stage,
    status, stages_json, failed_reasons_json, result_json, user_id, domain_id, project_id,
    cancel_requested, created_at, start_at, end_at";

fn constraint_to_conflict(e: rusqlite::Error, what: &str) -> CloudError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            CloudError::conflict(format!("{} violates a uniqueness constraint", what))
                .with_source(e)
        }
        other => other.into(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn resource_from_row(class: &str, row: &Row<'_>) -> rusqlite::Result<ResourceRecord> {
    Ok(ResourceRecord {
        id: row.get(0)?,
        class: class.to_string(),
        name: row.get(1)?,
        description: row.get(2)?,
        external_id: row.get(3)?,
        domain_id: row.get(4)?,
        project_id: row.get(5)?,
        project_src: row.get(6)?,
        manager_id: non_empty(row.get(7)?),
        region_id: non_empty(row.get(8)?),
        zone_id: non_empty(row.get(9)?),
        parent_id: non_empty(row.get(10)?),
        status: row.get(11)?,
        status_reason: row.get(12)?,
        enabled: row.get::<_, i32>(13)? != 0,
        is_emulated: row.get::<_, i32>(14)? != 0,
        attributes: json_col(row, 15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        last_sync_at: row.get(18)?,
        last_ref_at: row.get(19)?,
        deleted: row.get::<_, i32>(20)? != 0,
        deleted_at: row.get(21)?,
    })
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderRecord> {
    Ok(ProviderRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        brand: row.get(2)?,
        account_id: row.get(3)?,
        endpoint: row.get(4)?,
        credentials: row.get(5)?,
        domain_id: row.get(6)?,
        project_id: row.get(7)?,
        project_src: row.get(8)?,
        enabled: row.get::<_, i32>(9)? != 0,
        status: row.get(10)?,
        sync_status: row.get(11)?,
        balance: row.get(12)?,
        sync_cooldown_secs: row.get(13)?,
        last_sync_at: row.get(14)?,
        last_sync_end_at: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        domain_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        obj_class: row.get(2)?,
        obj_id: row.get(3)?,
        obj_name: row.get(4)?,
        params: json_col(row, 5)?,
        parent_id: row.get(6)?,
        stage: row.get(7)?,
        status: row.get(8)?,
        stages: json_col(row, 9)?,
        failed_reasons: json_col(row, 10)?,
        result: json_col(row, 11)?,
        user_id: row.get(12)?,
        domain_id: row.get(13)?,
        project_id: row.get(14)?,
        cancel_requested: row.get::<_, i32>(15)? != 0,
        created_at: row.get(16)?,
        start_at: row.get(17)?,
        end_at: row.get(18)?,
    })
}

fn read_quota(conn: &Connection, domain_id: &str, resource: &str) -> Result<QuotaRecord> {
    let quota = conn
        .query_row(
            "SELECT used, pending FROM quotas_tbl WHERE domain_id = ?1 AND resource = ?2",
            params![domain_id, resource],
            |row| {
                Ok(QuotaRecord {
                    domain_id: domain_id.to_string(),
                    resource: resource.to_string(),
                    used: row.get(0)?,
                    pending: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(quota.unwrap_or_else(|| QuotaRecord {
        domain_id: domain_id.to_string(),
        resource: resource.to_string(),
        used: 0,
        pending: 0,
    }))
}

/// Decode one row into a JSON object. Text that looks like a JSON document
/// (the `*_json` columns) is decoded in place.
fn row_to_json(row: &Row<'_>, column_names: &[String]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (i, col_name) in column_names.iter().enumerate() {
        let value = match row.get_ref(i) {
            Ok(ValueRef::Null) | Err(_) => serde_json::Value::Null,
            Ok(ValueRef::Integer(n)) => serde_json::json!(n),
            Ok(ValueRef::Real(f)) => serde_json::json!(f),
            Ok(ValueRef::Text(bytes)) => {
                let text = String::from_utf8_lossy(bytes).to_string();
                if text.starts_with('{') || text.starts_with('[') {
                    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
                } else {
                    serde_json::Value::String(text)
                }
            }
            Ok(ValueRef::Blob(bytes)) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
        };
        map.insert(col_name.clone(), value);
    }
    serde_json::Value::Object(map)
}
