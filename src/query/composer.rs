use std::sync::Arc;

use crate::error::{CloudError, Result};
use crate::identity::{Identity, ScopeLevel};
use crate::registry::{ClassSpec, Locality, Ownership, Registry};
use crate::state::schema::RESOURCE_COLUMNS;

use super::input::{ListInput, ManagedFilter, OrderKey};

pub type SqlValue = rusqlite::types::Value;

/// A refinable query over one class table. Nothing runs until the handle
/// is passed to a backend terminal (`fetch`, `count`, `fetch_rows`).
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    spec: Arc<ClassSpec>,
    joins: Vec<String>,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
    order: Vec<String>,
    projection: Option<Vec<(String, String)>>,
    limit: Option<usize>,
    offset: Option<usize>,
    include_deleted: bool,
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn to_sql_value(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

impl ResourceQuery {
    pub fn new(spec: Arc<ClassSpec>) -> Self {
        Self {
            spec,
            joins: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
            projection: None,
            limit: None,
            offset: None,
            include_deleted: false,
        }
    }

    pub fn spec(&self) -> &Arc<ClassSpec> {
        &self.spec
    }

    pub fn is_projection(&self) -> bool {
        self.projection.is_some()
    }

    /// Add a raw condition with positional `?` parameters.
    pub fn filter(mut self, condition: &str, params: Vec<SqlValue>) -> Self {
        self.conditions.push(condition.to_string());
        self.params.extend(params);
        self
    }

    fn filter_in(self, column: &str, values: &[String]) -> Self {
        if values.is_empty() {
            return self;
        }
        let condition = format!("{} IN ({})", column, placeholders(values.len()));
        let params = values.iter().map(|v| text(v)).collect();
        self.filter(&condition, params)
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    // ─── Filters ────────────────────────────────────────────────────────────

    /// Name/id/status/enabled filters.
    pub fn filter_by_standard(mut self, input: &ListInput) -> Self {
        self = self
            .filter_in("t.id", &input.ids)
            .filter_in("t.name", &input.names)
            .filter_in("t.status", &input.status);
        if let Some(enabled) = input.enabled {
            self = self.filter("t.enabled = ?", vec![SqlValue::Integer(enabled as i64)]);
        }
        if let Some(ref search) = input.search {
            self = self.filter("t.name LIKE ?", vec![text(&format!("%{}%", search))]);
        }
        self
    }

    /// Restrict to records the identity may see at `scope`.
    ///
    /// Classes that inherit ownership follow the parent chain with an
    /// `IN (subquery)` constraint. An identity with no domain sees nothing.
    pub fn filter_by_owner(
        self,
        registry: &Registry,
        identity: &Identity,
        scope: ScopeLevel,
    ) -> Result<Self> {
        identity.check_scope(scope)?;
        match owner_condition(registry, &self.spec, identity, scope)? {
            Some((condition, params)) => Ok(self.filter(&condition, params)),
            None => Ok(self),
        }
    }

    pub fn filter_by_parent(self, parent_id: &str) -> Self {
        self.filter("t.parent_id = ?", vec![text(parent_id)])
    }

    /// Provider, account, region and zone filters.
    pub fn filter_by_managed(mut self, managed: &ManagedFilter) -> Self {
        self = self.filter_in("t.manager_id", &managed.provider_ids);
        if !managed.account_ids.is_empty() {
            let condition = format!(
                "t.manager_id IN (SELECT id FROM cloudproviders_tbl WHERE account_id IN ({}))",
                placeholders(managed.account_ids.len())
            );
            let params = managed.account_ids.iter().map(|v| text(v)).collect();
            self = self.filter(&condition, params);
        }
        if self.spec.locality == Locality::Global {
            if !managed.region_ids.is_empty() || !managed.zone_ids.is_empty() {
                tracing::debug!(
                    class = self.spec.keyword,
                    "Ignoring region/zone filter on a global class"
                );
            }
            return self;
        }
        self = self.filter_in("t.region_id", &managed.region_ids);
        if !managed.zone_ids.is_empty() {
            if self.spec.locality == Locality::Zonal {
                self = self.filter_in("t.zone_id", &managed.zone_ids);
            } else {
                let condition = format!(
                    "t.region_id IN (SELECT parent_id FROM zones_tbl WHERE deleted = 0 AND id IN ({}))",
                    placeholders(managed.zone_ids.len())
                );
                let params = managed.zone_ids.iter().map(|v| text(v)).collect();
                self = self.filter(&condition, params);
            }
        }
        self
    }

    pub fn filter_by_region(self, region_id: Option<&str>) -> Self {
        match region_id {
            Some(id) => self.filter("t.region_id = ?", vec![text(id)]),
            None => self,
        }
    }

    /// Materialized-on-cloud (`true`) versus local-only (`false`).
    pub fn filter_by_external_status(self, external: bool) -> Self {
        if external {
            self.filter("t.external_id != ''", vec![])
        } else {
            self.filter("t.external_id = ''", vec![])
        }
    }

    pub fn filter_by_external_id(self, external_id: &str) -> Self {
        self.filter("t.external_id = ?", vec![text(external_id)])
    }

    /// Equality on a declared class attribute.
    pub fn filter_by_attribute(self, key: &str, value: &serde_json::Value) -> Result<Self> {
        let field = self.spec.field_spec(key).ok_or_else(|| {
            CloudError::input_parameter(format!("{} has no attribute {}", self.spec.keyword, key))
        })?;
        let condition = format!("json_extract(t.attributes_json, '$.{}') = ?", field.name);
        Ok(self.filter(&condition, vec![to_sql_value(value)]))
    }

    /// Records joined to `other_id` through a named relation.
    pub fn filter_by_relation(
        self,
        registry: &Registry,
        relation: &str,
        other_id: &str,
    ) -> Result<Self> {
        let rel = registry.relation(relation)?;
        let (own, other) = if rel.left == self.spec.keyword {
            ("left_id", "right_id")
        } else if rel.right == self.spec.keyword {
            ("right_id", "left_id")
        } else {
            return Err(CloudError::input_parameter(format!(
                "relation {} does not involve {}",
                relation, self.spec.keyword
            )));
        };
        let condition = format!(
            "t.id IN (SELECT {} FROM {} WHERE {} = ?)",
            own,
            rel.table(),
            other
        );
        Ok(self.filter(&condition, vec![text(other_id)]))
    }

    // ─── Ordering and projection ────────────────────────────────────────────

    pub fn order_by(mut self, column: &str, desc: bool) -> Result<Self> {
        if !RESOURCE_COLUMNS.contains(&column) || column == "attributes_json" {
            return Err(CloudError::input_parameter(format!(
                "cannot order by {}",
                column
            )));
        }
        self.order
            .push(format!("t.{} {}", column, if desc { "DESC" } else { "ASC" }));
        Ok(self)
    }

    /// Order by computed aggregates: `<child>_count` for child classes and
    /// `<relation>_count` for relations, each joined as a grouped subquery.
    pub fn order_by_extra(mut self, registry: &Registry, keys: &[OrderKey]) -> Result<Self> {
        for key in keys {
            let alias = format!("ob_{}", key.key);
            let subquery = self.extra_subquery(registry, &key.key).ok_or_else(|| {
                CloudError::input_parameter(format!(
                    "unknown order key {} for {}",
                    key.key, self.spec.keyword
                ))
            })?;
            self.joins.push(format!(
                "LEFT JOIN ({}) AS {alias} ON {alias}.pid = t.id",
                subquery,
                alias = alias
            ));
            self.order.push(format!(
                "COALESCE({}.cnt, 0) {}",
                alias,
                if key.desc { "DESC" } else { "ASC" }
            ));
        }
        Ok(self)
    }

    fn extra_subquery(&self, registry: &Registry, key: &str) -> Option<String> {
        let base = key.strip_suffix("_count")?;
        if let Some(child) = registry
            .children_of(self.spec.keyword)
            .into_iter()
            .find(|c| c.keyword == base)
        {
            return Some(format!(
                "SELECT parent_id AS pid, COUNT(*) AS cnt FROM {} WHERE deleted = 0 GROUP BY parent_id",
                child.table()
            ));
        }
        let rel = registry.relation(base).ok()?;
        let column = if rel.left == self.spec.keyword {
            "left_id"
        } else if rel.right == self.spec.keyword {
            "right_id"
        } else {
            return None;
        };
        Some(format!(
            "SELECT {col} AS pid, COUNT(*) AS cnt FROM {table} GROUP BY {col}",
            col = column,
            table = rel.table()
        ))
    }

    /// Limit the projected columns to standard columns and declared attributes.
    pub fn list_export_keys(mut self, keys: &[String]) -> Result<Self> {
        let mut projection = Vec::with_capacity(keys.len());
        for key in keys {
            let expr = if RESOURCE_COLUMNS.contains(&key.as_str()) && key != "attributes_json" {
                format!("t.{}", key)
            } else if let Some(field) = self.spec.field_spec(key) {
                format!("json_extract(t.attributes_json, '$.{}')", field.name)
            } else {
                return Err(CloudError::input_parameter(format!(
                    "unknown export key {} for {}",
                    key, self.spec.keyword
                )));
            };
            projection.push((expr, key.clone()));
        }
        self.projection = Some(projection);
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    // ─── SQL rendering ──────────────────────────────────────────────────────

    fn where_clause(&self) -> String {
        let mut conditions = Vec::new();
        if !self.include_deleted {
            conditions.push("t.deleted = 0".to_string());
        }
        conditions.extend(self.conditions.iter().cloned());
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    fn from_clause(&self) -> String {
        let mut from = format!(" FROM {} AS t", self.spec.table());
        for join in &self.joins {
            from.push(' ');
            from.push_str(join);
        }
        from
    }

    fn tail(&self) -> String {
        let mut tail = String::new();
        let mut order = self.order.clone();
        order.push("t.created_at ASC".to_string());
        order.push("t.id ASC".to_string());
        tail.push_str(&format!(" ORDER BY {}", order.join(", ")));
        // SQLite only takes OFFSET after LIMIT; -1 leaves the page open.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                tail.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => tail.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => tail.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        tail
    }

    /// Full-record select.
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let columns: Vec<String> = RESOURCE_COLUMNS.iter().map(|c| format!("t.{}", c)).collect();
        let sql = format!(
            "SELECT {}{}{}{}",
            columns.join(", "),
            self.from_clause(),
            self.where_clause(),
            self.tail()
        );
        (sql, self.params.clone())
    }

    /// Projected select for export keys; falls back to every column.
    pub fn to_rows_sql(&self) -> (String, Vec<SqlValue>) {
        let columns = match &self.projection {
            Some(projection) => projection
                .iter()
                .map(|(expr, alias)| format!("{} AS \"{}\"", expr, alias))
                .collect::<Vec<_>>()
                .join(", "),
            None => "t.*".to_string(),
        };
        let sql = format!(
            "SELECT {}{}{}{}",
            columns,
            self.from_clause(),
            self.where_clause(),
            self.tail()
        );
        (sql, self.params.clone())
    }

    pub fn count_sql(&self) -> (String, Vec<SqlValue>) {
        let sql = format!(
            "SELECT COUNT(*){}{}",
            self.from_clause(),
            self.where_clause()
        );
        (sql, self.params.clone())
    }

    /// `SELECT t.id …` for embedding as an `IN (…)` constraint.
    pub fn id_subquery(&self) -> (String, Vec<SqlValue>) {
        let sql = format!("SELECT t.id{}{}", self.from_clause(), self.where_clause());
        (sql, self.params.clone())
    }
}

fn owner_condition(
    registry: &Registry,
    spec: &ClassSpec,
    identity: &Identity,
    scope: ScopeLevel,
) -> Result<Option<(String, Vec<SqlValue>)>> {
    if scope == ScopeLevel::System || spec.ownership == Ownership::Public {
        return Ok(None);
    }
    if identity.domain_id.is_empty() {
        return Ok(Some(("1 = 0".to_string(), vec![])));
    }
    let condition = match spec.ownership {
        Ownership::Public => None,
        Ownership::Domain => Some((
            "t.domain_id = ?".to_string(),
            vec![text(&identity.domain_id)],
        )),
        Ownership::Project => match scope {
            ScopeLevel::Project => Some((
                "t.domain_id = ? AND t.project_id = ?".to_string(),
                vec![text(&identity.domain_id), text(&identity.project_id)],
            )),
            _ => Some((
                "t.domain_id = ?".to_string(),
                vec![text(&identity.domain_id)],
            )),
        },
        Ownership::Inherit => {
            let parent_kw = spec.parent.ok_or_else(|| {
                CloudError::general(format!("{} inherits ownership without a parent", spec.keyword))
            })?;
            let parent = registry.get(parent_kw)?;
            match owner_condition(registry, &parent, identity, scope)? {
                Some((cond, params)) => {
                    let sub = ResourceQuery::new(parent).filter(&cond, params);
                    let (sql, params) = sub.id_subquery();
                    Some((format!("t.parent_id IN ({})", sql), params))
                }
                None => None,
            }
        }
    };
    Ok(condition)
}

/// Apply every option of a list descriptor to a fresh query for `spec`.
pub fn compose(
    registry: &Registry,
    identity: &Identity,
    spec: Arc<ClassSpec>,
    input: &ListInput,
) -> Result<ResourceQuery> {
    let scope = input.scope.unwrap_or_else(|| identity.default_scope());
    let mut query = ResourceQuery::new(spec)
        .filter_by_standard(input)
        .filter_by_owner(registry, identity, scope)?
        .filter_by_managed(&input.managed);
    if let Some(ref parent_id) = input.parent_id {
        query = query.filter_by_parent(parent_id);
    }
    if let Some(external) = input.external {
        query = query.filter_by_external_status(external);
    }
    for (key, value) in &input.attributes {
        query = query.filter_by_attribute(key, value)?;
    }
    let mut extra = Vec::new();
    for raw in &input.order_by {
        let key = OrderKey::parse(raw);
        if RESOURCE_COLUMNS.contains(&key.key.as_str()) {
            query = query.order_by(&key.key, key.desc)?;
        } else {
            extra.push(key);
        }
    }
    if !extra.is_empty() {
        query = query.order_by_extra(registry, &extra)?;
    }
    if input.is_projection() {
        query = query.list_export_keys(&input.export_keys)?;
    }
    if let Some(limit) = input.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = input.offset {
        query = query.offset(offset);
    }
    Ok(query)
}
