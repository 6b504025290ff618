use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    CloudDriver, CreateSpec, DnsCapabilities, DriverFactory, RemoteHandle, RemoteObject,
    RemoteScope, TtlRange,
};
use crate::error::{CloudError, Result};
use crate::state::models::ProviderRecord;

pub const BRAND: &str = "snapshot";

/// Whole remote inventory of one account, as served by [`SnapshotDriver`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub balance: Option<f64>,
    /// Regions, with zones nested under `children.zone`.
    pub regions: Vec<RemoteObject>,
    /// Set for on-premise accounts; replaces `regions` during sync.
    pub on_premise_region: Option<RemoteObject>,
    pub projects: Vec<RemoteObject>,
    /// Top-level objects by class keyword; child classes nest under `children`.
    pub resources: BTreeMap<String, Vec<RemoteObject>>,
    pub dns_zone_types: Vec<String>,
    /// DNS capabilities by zone type.
    pub dns: BTreeMap<String, DnsCapabilities>,
    pub waf_types: Vec<String>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CloudError::general(format!("cannot read inventory {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            CloudError::input_parameter(format!("invalid inventory {}: {}", path.display(), e))
        })
    }

    fn find_mut(&mut self, global_id: &str) -> Option<&mut RemoteObject> {
        fn search<'a>(objs: &'a mut [RemoteObject], gid: &str) -> Option<&'a mut RemoteObject> {
            for obj in objs.iter_mut() {
                if obj.global_id == gid {
                    return Some(obj);
                }
                for children in obj.children.values_mut() {
                    if let Some(found) = search(children, gid) {
                        return Some(found);
                    }
                }
            }
            None
        }
        for objs in self.resources.values_mut() {
            if let Some(found) = search(objs, global_id) {
                return Some(found);
            }
        }
        None
    }

    /// The list a class lives in for `scope`, created on demand.
    fn bucket_mut(&mut self, class: &str, scope: &RemoteScope) -> Result<&mut Vec<RemoteObject>> {
        match scope.parent {
            Some(ref parent) => {
                let parent_obj = self
                    .find_mut(parent)
                    .ok_or_else(|| CloudError::not_found("remote parent", parent))?;
                Ok(parent_obj.children.entry(class.to_string()).or_default())
            }
            None => Ok(self.resources.entry(class.to_string()).or_default()),
        }
    }

    fn in_scope(obj: &RemoteObject, scope: &RemoteScope) -> bool {
        match (&scope.region, &scope.parent) {
            (_, Some(_)) => true,
            (Some(region), None) => obj.region.as_deref() == Some(region.as_str()),
            (None, None) => true,
        }
    }
}

/// In-memory driver serving a YAML inventory. Counts list calls so callers
/// can observe how often the remote side was actually consulted.
pub struct SnapshotDriver {
    inventory: Mutex<Inventory>,
    path: Option<PathBuf>,
    list_calls: AtomicUsize,
    failures: Mutex<HashSet<(String, String)>>,
}

impl SnapshotDriver {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            path: None,
            list_calls: AtomicUsize::new(0),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Serve the file at `path`, writing remote mutations back to it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let inventory = if path.exists() {
            Inventory::load(path)?
        } else {
            Inventory::default()
        };
        let mut driver = Self::new(inventory);
        driver.path = Some(path.to_path_buf());
        Ok(driver)
    }

    fn inventory(&self) -> MutexGuard<'_, Inventory> {
        self.inventory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of list calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make every `op` (`list`, `get`, `create`, `delete`, `update`) on `class` fail.
    pub fn fail(&self, class: &str, op: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((class.to_string(), op.to_string()));
    }

    pub fn heal(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn check_failure(&self, class: &str, op: &str) -> Result<()> {
        let failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if failures.contains(&(class.to_string(), op.to_string())) {
            return Err(CloudError::general(format!(
                "remote {} on {} failed",
                op, class
            )));
        }
        Ok(())
    }

    // ─── Inventory editing ──────────────────────────────────────────────────

    pub fn set_regions(&self, regions: Vec<RemoteObject>) {
        self.inventory().regions = regions;
    }

    pub fn set_on_premise_region(&self, region: Option<RemoteObject>) {
        self.inventory().on_premise_region = region;
    }

    pub fn set_projects(&self, projects: Vec<RemoteObject>) {
        self.inventory().projects = projects;
    }

    /// Replace every top-level object of `class`.
    pub fn set_resources(&self, class: &str, objects: Vec<RemoteObject>) {
        self.inventory().resources.insert(class.to_string(), objects);
    }

    /// Replace the `class` children of the object `parent`.
    pub fn set_children(&self, parent: &str, class: &str, objects: Vec<RemoteObject>) -> Result<()> {
        let mut inventory = self.inventory();
        let parent_obj = inventory
            .find_mut(parent)
            .ok_or_else(|| CloudError::not_found("remote parent", parent))?;
        parent_obj.children.insert(class.to_string(), objects);
        Ok(())
    }

    pub fn set_dns_capabilities(&self, zone_type: &str, caps: DnsCapabilities) {
        let mut inventory = self.inventory();
        if !inventory.dns_zone_types.iter().any(|t| t == zone_type) {
            inventory.dns_zone_types.push(zone_type.to_string());
        }
        inventory.dns.insert(zone_type.to_string(), caps);
    }

    pub fn set_waf_types(&self, types: &[&str]) {
        self.inventory().waf_types = types.iter().map(|t| t.to_string()).collect();
    }

    pub fn set_balance(&self, balance: f64) {
        self.inventory().balance = Some(balance);
    }

    /// Current remote objects of `class` under `scope`.
    pub fn objects(&self, class: &str, scope: &RemoteScope) -> Vec<RemoteObject> {
        let mut inventory = self.inventory();
        match inventory.bucket_mut(class, scope) {
            Ok(bucket) => bucket
                .iter()
                .filter(|o| Inventory::in_scope(o, scope))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn persist(&self, inventory: &Inventory) -> Result<()> {
        if let Some(ref path) = self.path {
            let yaml = serde_yaml::to_string(inventory)
                .map_err(|e| CloudError::general(format!("serialize inventory: {}", e)))?;
            std::fs::write(path, yaml).map_err(|e| {
                CloudError::general(format!("write inventory {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}

fn handles(objs: Vec<RemoteObject>) -> Vec<RemoteHandle> {
    objs.into_iter().map(|o| Arc::new(o) as RemoteHandle).collect()
}

fn default_dns_capabilities() -> DnsCapabilities {
    DnsCapabilities {
        record_types: ["A", "AAAA", "CNAME", "MX", "TXT", "NS", "SRV", "CAA"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        policy_types: vec!["Simple".to_string()],
        policy_values: BTreeMap::new(),
        ttl_range: TtlRange::default(),
    }
}

#[async_trait]
impl CloudDriver for SnapshotDriver {
    fn brand(&self) -> &str {
        BRAND
    }

    async fn get_balance(&self) -> Result<Option<f64>> {
        Ok(self.inventory().balance)
    }

    async fn list_regions(&self) -> Result<Vec<RemoteHandle>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("cloudregion", "list")?;
        Ok(handles(self.inventory().regions.clone()))
    }

    async fn list_zones(&self, region: &str) -> Result<Vec<RemoteHandle>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("zone", "list")?;
        let inventory = self.inventory();
        let zones = inventory
            .regions
            .iter()
            .chain(inventory.on_premise_region.iter())
            .find(|r| r.global_id == region)
            .and_then(|r| r.children.get("zone").cloned())
            .unwrap_or_default();
        Ok(handles(zones))
    }

    fn is_on_premise(&self) -> bool {
        self.inventory().on_premise_region.is_some()
    }

    async fn get_on_prem_region(&self) -> Result<RemoteHandle> {
        self.check_failure("cloudregion", "get")?;
        self.inventory()
            .on_premise_region
            .clone()
            .map(|r| Arc::new(r) as RemoteHandle)
            .ok_or_else(|| CloudError::not_supported("snapshot inventory has no on-premise region"))
    }

    async fn list_projects(&self) -> Result<Vec<RemoteHandle>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("externalproject", "list")?;
        Ok(handles(self.inventory().projects.clone()))
    }

    async fn list_resources(&self, class: &str, scope: &RemoteScope) -> Result<Vec<RemoteHandle>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(class, "list")?;
        let mut inventory = self.inventory();
        let objs = match inventory.bucket_mut(class, scope) {
            Ok(bucket) => bucket
                .iter()
                .filter(|o| Inventory::in_scope(o, scope))
                .cloned()
                .collect(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(handles(objs))
    }

    async fn get_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        global_id: &str,
    ) -> Result<RemoteHandle> {
        self.check_failure(class, "get")?;
        let mut inventory = self.inventory();
        let found = inventory
            .bucket_mut(class, scope)?
            .iter()
            .find(|o| o.global_id == global_id)
            .cloned()
            .ok_or_else(|| CloudError::not_found(class, global_id))?;
        Ok(Arc::new(found))
    }

    async fn create_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        spec: &CreateSpec,
    ) -> Result<RemoteHandle> {
        self.check_failure(class, "create")?;
        let uuid = uuid::Uuid::new_v4().to_string();
        let obj = RemoteObject {
            global_id: format!("{}-{}", class, &uuid[..8]),
            name: spec.name.clone(),
            status: "available".to_string(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            project_id: spec.project_id.clone(),
            region: scope.region.clone(),
            zone: spec.zone.clone(),
            attributes: spec.attributes.clone(),
            ..RemoteObject::default()
        };
        let mut inventory = self.inventory();
        inventory.bucket_mut(class, scope)?.push(obj.clone());
        self.persist(&inventory)?;
        Ok(Arc::new(obj))
    }

    async fn delete_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        global_id: &str,
    ) -> Result<()> {
        self.check_failure(class, "delete")?;
        let mut inventory = self.inventory();
        let bucket = inventory.bucket_mut(class, scope)?;
        let before = bucket.len();
        bucket.retain(|o| o.global_id != global_id);
        if bucket.len() == before {
            return Err(CloudError::not_found(class, global_id));
        }
        self.persist(&inventory)
    }

    async fn update_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        global_id: &str,
        verb: &str,
        params: &serde_json::Value,
    ) -> Result<RemoteHandle> {
        self.check_failure(class, "update")?;
        let mut inventory = self.inventory();
        let obj = inventory
            .bucket_mut(class, scope)?
            .iter_mut()
            .find(|o| o.global_id == global_id)
            .ok_or_else(|| CloudError::not_found(class, global_id))?;
        match verb {
            "enable" => {
                obj.attributes
                    .insert("enabled".to_string(), serde_json::Value::Bool(true));
            }
            "disable" => {
                obj.attributes
                    .insert("enabled".to_string(), serde_json::Value::Bool(false));
            }
            _ => {}
        }
        if let Some(map) = params.as_object() {
            for (key, value) in map {
                if key == "name" {
                    if let Some(name) = value.as_str() {
                        obj.name = name.to_string();
                    }
                    continue;
                }
                obj.attributes.insert(key.clone(), value.clone());
            }
        }
        let updated = obj.clone();
        self.persist(&inventory)?;
        Ok(Arc::new(updated))
    }

    fn supported_dns_zone_types(&self) -> Vec<String> {
        let inventory = self.inventory();
        if inventory.dns_zone_types.is_empty() {
            vec!["PublicZone".to_string(), "PrivateZone".to_string()]
        } else {
            inventory.dns_zone_types.clone()
        }
    }

    fn dns_capabilities(&self, zone_type: &str) -> DnsCapabilities {
        self.inventory()
            .dns
            .get(zone_type)
            .cloned()
            .unwrap_or_else(default_dns_capabilities)
    }

    fn supported_waf_types(&self) -> Vec<String> {
        self.inventory().waf_types.clone()
    }
}

/// Connects `snapshot` providers to the inventory file named by their endpoint.
pub struct SnapshotFactory;

impl DriverFactory for SnapshotFactory {
    fn brand(&self) -> &str {
        BRAND
    }

    fn connect(&self, provider: &ProviderRecord) -> Result<Arc<dyn super::CloudDriver>> {
        if provider.endpoint.is_empty() {
            return Ok(Arc::new(SnapshotDriver::new(Inventory::default())));
        }
        Ok(Arc::new(SnapshotDriver::from_file(Path::new(&provider.endpoint))?))
    }
}
