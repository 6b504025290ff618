//! Reconciliation of local records against remote inventories.

pub mod cycle;
pub mod engine;
pub mod naming;
pub mod project;
pub mod refresh;
pub mod result;

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{CloudError, Result};
use crate::provider::{CloudDriver, RemoteHandle, RemoteScope};
use crate::state::models::{ProviderRecord, ResourceRecord};

pub use result::{SyncDiagnostic, SyncOp, SyncResult};

// ─── Scope ──────────────────────────────────────────────────────────────────

/// Where one class sync applies: a provider, optionally narrowed to a region
/// and, for child classes, a parent record.
#[derive(Clone)]
pub struct SyncScope {
    pub provider: ProviderRecord,
    pub driver: Arc<dyn CloudDriver>,
    pub region: Option<ResourceRecord>,
    pub parent: Option<ResourceRecord>,
}

impl SyncScope {
    pub fn new(provider: ProviderRecord, driver: Arc<dyn CloudDriver>) -> Self {
        Self {
            provider,
            driver,
            region: None,
            parent: None,
        }
    }

    pub fn with_region(mut self, region: ResourceRecord) -> Self {
        self.region = Some(region);
        self
    }

    /// Scope for the children of `parent`.
    pub fn child(&self, parent: &ResourceRecord) -> Self {
        Self {
            provider: self.provider.clone(),
            driver: self.driver.clone(),
            region: self.region.clone(),
            parent: Some(parent.clone()),
        }
    }

    /// Local id of the region records in this scope belong to. Zones take
    /// their parent region.
    pub fn region_id(&self) -> Option<String> {
        match (&self.region, &self.parent) {
            (Some(region), _) => Some(region.id.clone()),
            (None, Some(parent)) if parent.class == "cloudregion" => Some(parent.id.clone()),
            (None, Some(parent)) => parent.region_id.clone(),
            (None, None) => None,
        }
    }

    pub fn remote(&self) -> RemoteScope {
        let region = self.region.as_ref().map(|r| r.external_id.as_str());
        let scope = RemoteScope::region(region);
        match self.parent {
            Some(ref parent) => scope.child(&parent.external_id),
            None => scope,
        }
    }

    /// Class-lock scope: provider, plus region for regional syncs.
    pub fn key(&self) -> String {
        match self.region {
            Some(ref region) => format!("{}/{}", self.provider.id, region.id),
            None => self.provider.id.clone(),
        }
    }

    /// Rebuild the scope an existing managed record was synced in.
    pub async fn for_record(engine: &Arc<Engine>, record: &ResourceRecord) -> Result<Self> {
        let manager_id = record.manager_id.as_deref().ok_or_else(|| {
            CloudError::invalid_status("unmanaged", format!("{} has no provider", record.reference()))
        })?;
        let provider = engine.providers.get(manager_id).await?;
        let driver = engine.drivers.driver_for(&provider)?;
        let mut scope = Self::new(provider, driver);

        let spec = engine.spec(&record.class)?;
        if let Some(parent_kw) = spec.parent {
            if let Some(ref parent_id) = record.parent_id {
                let parent_spec = engine.spec(parent_kw)?;
                scope.parent = Some(engine.load(&parent_spec, parent_id).await?);
            }
        }
        let region_is_parent = scope
            .parent
            .as_ref()
            .map(|p| p.class == "cloudregion")
            .unwrap_or(false);
        if !region_is_parent {
            if let Some(ref region_id) = record.region_id {
                let region_spec = engine.spec("cloudregion")?;
                scope.region = Some(engine.load(&region_spec, region_id).await?);
            }
        }
        Ok(scope)
    }
}

/// How far a class sync reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip field updates of records present on both sides.
    pub xor: bool,
    /// Carry `xor` to the children of common records. One level only.
    pub xor_children: bool,
}

impl SyncOptions {
    pub fn full() -> Self {
        Self {
            xor: false,
            xor_children: false,
        }
    }

    pub fn xor() -> Self {
        Self {
            xor: true,
            xor_children: true,
        }
    }

    /// Options for the children of a common record: xor reaches the
    /// immediate children, everything below syncs in full.
    pub fn for_common_children(self) -> Self {
        if self.xor && self.xor_children {
            Self {
                xor: true,
                xor_children: false,
            }
        } else {
            Self::full()
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::full()
    }
}

// ─── Set Comparison ─────────────────────────────────────────────────────────

/// Partition of a local set L against a remote set R by global id.
#[derive(Debug, Default)]
pub struct SetDiff {
    /// In L, not in R.
    pub removed: Vec<ResourceRecord>,
    /// In both, paired.
    pub common: Vec<(ResourceRecord, RemoteHandle)>,
    /// In R, not in L.
    pub added: Vec<RemoteHandle>,
}

/// Split `local` and `remote` by external id. Duplicate remote ids keep the
/// first occurrence. Local order is kept for removed and common, remote
/// order for added.
pub fn compare_sets(local: Vec<ResourceRecord>, remote: Vec<RemoteHandle>) -> SetDiff {
    let mut by_gid: HashMap<String, RemoteHandle> = HashMap::with_capacity(remote.len());
    let mut order: Vec<String> = Vec::with_capacity(remote.len());
    for handle in remote {
        let gid = handle.global_id().to_string();
        if by_gid.contains_key(&gid) {
            tracing::warn!(global_id = %gid, "Duplicate remote object ignored");
            continue;
        }
        order.push(gid.clone());
        by_gid.insert(gid, handle);
    }

    let mut diff = SetDiff::default();
    for record in local {
        match by_gid.remove(&record.external_id) {
            Some(handle) => diff.common.push((record, handle)),
            None => diff.removed.push(record),
        }
    }
    diff.added = order
        .into_iter()
        .filter_map(|gid| by_gid.remove(&gid))
        .collect();
    diff
}
