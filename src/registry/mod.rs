pub mod catalog;
pub mod status;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{CloudError, Result};
use status::StatusSet;

// ─── Class Descriptors ──────────────────────────────────────────────────────

/// How a record's owner is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Stored domain + project.
    Project,
    /// Stored domain only.
    Domain,
    /// Follows the parent chain.
    Inherit,
    /// Infrastructure catalogue visible to every caller.
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Global,
    Regional,
    Zonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Create,
    Update,
    Delete,
    SyncStatus,
    Syncable,
    Cacheable,
}

/// What a live child does to a parent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPolicy {
    /// Parent RealDelete removes the child.
    Cascade,
    /// Parent delete is refused with `not_empty` while the child lives.
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Int,
    Bool,
    Json,
    Cidr,
    Ipv4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Required,
    Optional,
    Hidden,
}

/// Declarative descriptor of a class-specific attribute.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Copied from the remote handle on every sync.
    pub synced: bool,
    pub create: Visibility,
    pub updatable: bool,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            synced: false,
            create: Visibility::Hidden,
            updatable: false,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn json(name: &'static str) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn synced(mut self) -> Self {
        self.synced = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.create = Visibility::Required;
        self
    }

    pub fn optional(mut self) -> Self {
        self.create = Visibility::Optional;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    /// Check a JSON value against the declared kind.
    pub fn check(&self, value: &serde_json::Value) -> Result<()> {
        let ok = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Json => true,
            FieldKind::Cidr => value.as_str().map(is_cidr).unwrap_or(false),
            FieldKind::Ipv4 => value
                .as_str()
                .map(|s| s.parse::<std::net::Ipv4Addr>().is_ok())
                .unwrap_or(false),
        };
        if ok {
            Ok(())
        } else {
            Err(CloudError::input_parameter(format!(
                "invalid {:?} value for {}: {}",
                self.kind, self.name, value
            )))
        }
    }
}

/// IPv4 `a.b.c.d/n` with `n <= 32`.
pub fn is_cidr(s: &str) -> bool {
    match s.split_once('/') {
        Some((addr, mask)) => {
            addr.parse::<std::net::Ipv4Addr>().is_ok()
                && mask.parse::<u8>().map(|m| m <= 32).unwrap_or(false)
        }
        None => false,
    }
}

/// Catalog entry for one resource class.
#[derive(Debug, Clone)]
pub struct ClassSpec {
    pub keyword: &'static str,
    pub plural: &'static str,
    pub parent: Option<&'static str>,
    pub child_policy: ChildPolicy,
    pub ownership: Ownership,
    pub locality: Locality,
    pub uniqueness: Vec<Vec<&'static str>>,
    pub capabilities: Vec<Capability>,
    /// Custom perform-* actions beyond the capability-derived ones.
    pub actions: Vec<&'static str>,
    pub fields: Vec<FieldSpec>,
    pub statuses: StatusSet,
    /// Quota resource reserved on create.
    pub quota: Option<&'static str>,
    /// On-access refresh window for cacheable classes.
    pub refresh_window: Option<Duration>,
}

impl ClassSpec {
    pub fn new(keyword: &'static str, plural: &'static str) -> Self {
        Self {
            keyword,
            plural,
            parent: None,
            child_policy: ChildPolicy::Cascade,
            ownership: Ownership::Project,
            locality: Locality::Regional,
            uniqueness: vec![vec!["parent_id", "name"]],
            capabilities: vec![
                Capability::Create,
                Capability::Update,
                Capability::Delete,
                Capability::SyncStatus,
                Capability::Syncable,
            ],
            actions: Vec::new(),
            fields: Vec::new(),
            statuses: StatusSet::default(),
            quota: None,
            refresh_window: None,
        }
    }

    pub fn table(&self) -> String {
        format!("{}_tbl", self.plural)
    }

    pub fn child_of(mut self, parent: &'static str, policy: ChildPolicy) -> Self {
        self.parent = Some(parent);
        self.child_policy = policy;
        self.ownership = Ownership::Inherit;
        self
    }

    pub fn owned_by(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn uniqueness(mut self, keys: Vec<Vec<&'static str>>) -> Self {
        self.uniqueness = keys;
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn action(mut self, name: &'static str) -> Self {
        self.actions.push(name);
        self
    }

    pub fn statuses(mut self, statuses: StatusSet) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn quota(mut self, resource: &'static str) -> Self {
        self.quota = Some(resource);
        self
    }

    pub fn capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    pub fn cacheable(mut self, window: Duration) -> Self {
        if !self.capabilities.contains(&Capability::Cacheable) {
            self.capabilities.push(Capability::Cacheable);
        }
        self.refresh_window = Some(window);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn synced_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.synced)
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Plain names must be unique within the parent or owner. Classes whose
    /// uniqueness key also covers attributes (DNS records) allow repeats.
    pub fn unique_names(&self) -> bool {
        self.uniqueness.iter().any(|key| {
            key.contains(&"name")
                && key
                    .iter()
                    .all(|k| matches!(*k, "name" | "parent_id" | "domain_id" | "project_id"))
        })
    }
}

/// A named join between two classes (or a class and providers).
#[derive(Debug, Clone)]
pub struct RelationSpec {
    pub name: &'static str,
    pub left: &'static str,
    pub right: &'static str,
}

impl RelationSpec {
    pub fn table(&self) -> String {
        format!("{}s_tbl", self.name)
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Runtime catalogue of resource classes, built once at startup and passed
/// explicitly to every consumer.
#[derive(Debug, Default)]
pub struct Registry {
    classes: BTreeMap<&'static str, Arc<ClassSpec>>,
    relations: BTreeMap<&'static str, RelationSpec>,
    graph: DiGraph<&'static str, ()>,
    nodes: HashMap<&'static str, NodeIndex>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Parents must be registered first.
    pub fn register(&mut self, spec: ClassSpec) -> Result<()> {
        if self.classes.contains_key(spec.keyword) {
            return Err(CloudError::conflict(format!(
                "class {} registered twice",
                spec.keyword
            )));
        }
        let node = self.graph.add_node(spec.keyword);
        self.nodes.insert(spec.keyword, node);
        if let Some(parent) = spec.parent {
            let parent_node = self
                .nodes
                .get(parent)
                .copied()
                .ok_or_else(|| CloudError::not_found("class", parent))?;
            self.graph.add_edge(parent_node, node, ());
        }
        self.classes.insert(spec.keyword, Arc::new(spec));
        Ok(())
    }

    pub fn register_relation(&mut self, relation: RelationSpec) -> Result<()> {
        for end in [relation.left, relation.right] {
            if end != "cloudprovider" && !self.classes.contains_key(end) {
                return Err(CloudError::not_found("class", end));
            }
        }
        self.relations.insert(relation.name, relation);
        Ok(())
    }

    pub fn get(&self, keyword: &str) -> Result<Arc<ClassSpec>> {
        self.classes
            .get(keyword)
            .cloned()
            .ok_or_else(|| CloudError::not_found("class", keyword))
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.classes.contains_key(keyword)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassSpec>> {
        self.classes.values()
    }

    pub fn relation(&self, name: &str) -> Result<&RelationSpec> {
        self.relations
            .get(name)
            .ok_or_else(|| CloudError::not_found("relation", name))
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationSpec> {
        self.relations.values()
    }

    /// Relations with `keyword` on either side.
    pub fn relations_of(&self, keyword: &str) -> Vec<&RelationSpec> {
        self.relations
            .values()
            .filter(|r| r.left == keyword || r.right == keyword)
            .collect()
    }

    /// Direct child classes of `keyword`.
    pub fn children_of(&self, keyword: &str) -> Vec<Arc<ClassSpec>> {
        let Some(node) = self.nodes.get(keyword) else {
            return Vec::new();
        };
        let mut children: Vec<Arc<ClassSpec>> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .filter_map(|n| self.classes.get(self.graph[n]).cloned())
            .collect();
        children.sort_by_key(|c| c.keyword);
        children
    }

    /// Classes without a parent, parents before dependants, in a stable order.
    pub fn top_level(&self) -> Result<Vec<Arc<ClassSpec>>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            CloudError::general(format!(
                "class graph has a cycle at {}",
                self.graph[cycle.node_id()]
            ))
        })?;
        Ok(order
            .into_iter()
            .filter_map(|n| self.classes.get(self.graph[n]))
            .filter(|c| !c.is_child())
            .cloned()
            .collect())
    }

    /// Chain of ancestors, nearest first.
    pub fn ancestors(&self, keyword: &str) -> Result<Vec<Arc<ClassSpec>>> {
        let mut chain = Vec::new();
        let mut current = self.get(keyword)?;
        while let Some(parent) = current.parent {
            let spec = self.get(parent)?;
            chain.push(spec.clone());
            current = spec;
        }
        Ok(chain)
    }
}
