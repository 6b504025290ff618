pub mod manager;
pub mod snapshot;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};
use crate::state::models::ProviderRecord;

// ─── Remote Handles ─────────────────────────────────────────────────────────

/// Opaque handle on one remote object. The engine compares handles only by
/// `global_id`; everything else is copied into local records.
pub trait RemoteResource: Send + Sync + fmt::Debug {
    fn global_id(&self) -> &str;
    fn name(&self) -> &str;
    fn status(&self) -> &str;
    fn created_at(&self) -> Option<&str>;
    /// Remote project tag, mapped to a local project in "cloud" project-source mode.
    fn project_id(&self) -> Option<&str>;
    fn tags(&self) -> &BTreeMap<String, String>;
    fn is_emulated(&self) -> bool;
    /// Class-specific getter, keyed by the class's field names.
    fn attribute(&self, key: &str) -> Option<serde_json::Value>;
    /// External id of the zone the object lives in, for zonal classes.
    fn zone_id(&self) -> Option<&str>;
}

pub type RemoteHandle = Arc<dyn RemoteResource>;

/// Plain-data remote object, used by drivers that fetch JSON/YAML inventories.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteObject {
    pub global_id: String,
    pub name: String,
    pub status: String,
    pub created_at: Option<String>,
    pub project_id: Option<String>,
    /// External id of the owning region; absent for global classes.
    pub region: Option<String>,
    pub zone: Option<String>,
    pub emulated: bool,
    pub tags: BTreeMap<String, String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Nested child objects keyed by child class keyword.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<RemoteObject>>,
}

impl RemoteObject {
    pub fn new(global_id: &str, name: &str) -> Self {
        Self {
            global_id: global_id.to_string(),
            name: name.to_string(),
            status: "available".to_string(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_attr(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_zone(mut self, zone: &str) -> Self {
        self.zone = Some(zone.to_string());
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_children(mut self, class: &str, children: Vec<RemoteObject>) -> Self {
        self.children.insert(class.to_string(), children);
        self
    }
}

impl RemoteResource for RemoteObject {
    fn global_id(&self) -> &str {
        &self.global_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> &str {
        &self.status
    }

    fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    fn is_emulated(&self) -> bool {
        self.emulated
    }

    fn attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.attributes.get(key).cloned()
    }

    fn zone_id(&self) -> Option<&str> {
        self.zone.as_deref()
    }
}

// ─── Scopes and Capabilities ────────────────────────────────────────────────

/// Where in the remote hierarchy a driver call applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteScope {
    /// External id of the region; `None` for global classes.
    pub region: Option<String>,
    /// External id of the parent object for child classes.
    pub parent: Option<String>,
}

impl RemoteScope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn region(region: Option<&str>) -> Self {
        Self {
            region: region.map(str::to_string),
            parent: None,
        }
    }

    pub fn child(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }
}

impl fmt::Display for RemoteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.region.as_deref().unwrap_or("-"),
            self.parent.as_deref().unwrap_or("-")
        )
    }
}

/// Accepted TTL values for DNS records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlRange {
    Continuous { min: i64, max: i64 },
    Discrete(Vec<i64>),
}

impl TtlRange {
    pub fn contains(&self, ttl: i64) -> bool {
        match self {
            TtlRange::Continuous { min, max } => ttl >= *min && ttl <= *max,
            TtlRange::Discrete(values) => values.contains(&ttl),
        }
    }
}

impl Default for TtlRange {
    fn default() -> Self {
        TtlRange::Continuous {
            min: 1,
            max: 86400,
        }
    }
}

impl fmt::Display for TtlRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlRange::Continuous { min, max } => write!(f, "{}..={}", min, max),
            TtlRange::Discrete(values) => write!(f, "{:?}", values),
        }
    }
}

/// DNS capability set for one zone type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsCapabilities {
    pub record_types: Vec<String>,
    pub policy_types: Vec<String>,
    /// Allowed values per policy type; a missing entry accepts any value.
    pub policy_values: BTreeMap<String, Vec<String>>,
    pub ttl_range: TtlRange,
}

impl DnsCapabilities {
    pub fn supports_type(&self, dns_type: &str) -> bool {
        self.record_types.iter().any(|t| t.eq_ignore_ascii_case(dns_type))
    }

    pub fn supports_policy(&self, policy_type: &str) -> bool {
        self.policy_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(policy_type))
    }
}

/// Input for a remote create.
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub name: String,
    pub description: String,
    pub project_id: Option<String>,
    pub zone: Option<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

// ─── Driver Interface ───────────────────────────────────────────────────────

/// Capability surface the engine needs from a cloud driver. Every call may
/// block on the network; drivers impose their own per-call timeouts.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    fn brand(&self) -> &str;

    // Per provider
    async fn get_balance(&self) -> Result<Option<f64>>;
    async fn list_regions(&self) -> Result<Vec<RemoteHandle>>;
    async fn list_zones(&self, region: &str) -> Result<Vec<RemoteHandle>>;
    async fn list_projects(&self) -> Result<Vec<RemoteHandle>>;
    /// On-premise accounts expose one fixed region instead of a region list.
    fn is_on_premise(&self) -> bool {
        false
    }
    async fn get_on_prem_region(&self) -> Result<RemoteHandle> {
        Err(CloudError::not_supported(format!("{} on-premise region", self.brand())))
    }

    // Per region / parent
    async fn list_resources(&self, class: &str, scope: &RemoteScope) -> Result<Vec<RemoteHandle>>;
    async fn get_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        global_id: &str,
    ) -> Result<RemoteHandle>;
    async fn create_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        spec: &CreateSpec,
    ) -> Result<RemoteHandle>;
    /// Deleting an object that is already gone returns `not_found`.
    async fn delete_resource(&self, class: &str, scope: &RemoteScope, global_id: &str)
        -> Result<()>;
    /// Class-specific update verb (`update`, `change-config`, `enable`, ...).
    async fn update_resource(
        &self,
        class: &str,
        scope: &RemoteScope,
        global_id: &str,
        verb: &str,
        params: &serde_json::Value,
    ) -> Result<RemoteHandle>;

    // Capability probes
    fn supported_dns_zone_types(&self) -> Vec<String>;
    fn dns_capabilities(&self, zone_type: &str) -> DnsCapabilities;
    fn supported_waf_types(&self) -> Vec<String>;
}

/// Builds a driver for one provider record.
pub trait DriverFactory: Send + Sync {
    fn brand(&self) -> &str;
    fn connect(&self, provider: &ProviderRecord) -> Result<Arc<dyn CloudDriver>>;
}

/// Factories by brand plus connected drivers by provider id.
#[derive(Default)]
pub struct DriverRegistry {
    factories: DashMap<String, Arc<dyn DriverFactory>>,
    drivers: DashMap<String, Arc<dyn CloudDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_factory(&self, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(factory.brand().to_string(), factory);
    }

    /// Bind a ready driver to a provider id, bypassing the factory.
    pub fn register_driver(&self, provider_id: &str, driver: Arc<dyn CloudDriver>) {
        self.drivers.insert(provider_id.to_string(), driver);
    }

    pub fn brands(&self) -> Vec<String> {
        let mut brands: Vec<String> = self.factories.iter().map(|f| f.key().clone()).collect();
        brands.sort();
        brands
    }

    /// Connected driver for `provider`, connecting on first use.
    pub fn driver_for(&self, provider: &ProviderRecord) -> Result<Arc<dyn CloudDriver>> {
        if let Some(driver) = self.drivers.get(&provider.id) {
            return Ok(driver.clone());
        }
        let factory = self
            .factories
            .get(&provider.brand)
            .map(|f| f.clone())
            .ok_or_else(|| {
                CloudError::not_supported(format!("no driver for brand {}", provider.brand))
            })?;
        let driver = factory.connect(provider)?;
        tracing::debug!(provider = %provider.name, brand = %provider.brand, "Connected driver");
        self.drivers.insert(provider.id.clone(), driver.clone());
        Ok(driver)
    }

    pub fn disconnect(&self, provider_id: &str) {
        self.drivers.remove(provider_id);
    }
}
