use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::EngineConfig;
use crate::error::{CloudError, Result};
use crate::identity::Identity;
use crate::lock::{LockManager, WorkUnit};
use crate::provider::manager::ProviderManager;
use crate::provider::snapshot::SnapshotFactory;
use crate::provider::DriverRegistry;
use crate::quota::QuotaManager;
use crate::registry::{catalog, ClassSpec, Registry};
use crate::resources::{self, ResourceHooks};
use crate::state::backend::StateBackend;
use crate::state::models::ResourceRecord;
use crate::task::TaskManager;

/// Everything a reconciliation or admin operation needs, built once and
/// passed explicitly.
pub struct Engine {
    pub config: EngineConfig,
    pub registry: Arc<Registry>,
    pub store: Arc<dyn StateBackend>,
    pub locks: LockManager,
    pub drivers: DriverRegistry,
    pub providers: ProviderManager,
    pub quotas: QuotaManager,
    pub tasks: TaskManager,
    hooks: BTreeMap<&'static str, Arc<dyn ResourceHooks>>,
    generic_hooks: Arc<dyn ResourceHooks>,
}

impl Engine {
    /// Build the registry, create tables and wire the builtin hooks, task
    /// handlers and the snapshot driver factory.
    pub async fn new(config: EngineConfig, store: Arc<dyn StateBackend>) -> Result<Arc<Self>> {
        let registry = Arc::new(catalog::builtin(Duration::from_secs(
            config.cache.image_refresh_secs,
        ))?);
        store.initialize(&registry).await?;

        let drivers = DriverRegistry::new();
        drivers.register_factory(Arc::new(SnapshotFactory));

        let engine = Self {
            providers: ProviderManager::new(store.clone(), config.sync.cooldown()),
            quotas: QuotaManager::new(store.clone(), config.quotas.clone()),
            tasks: TaskManager::new(config.workers),
            hooks: resources::builtin_hooks(),
            generic_hooks: Arc::new(resources::generic::GenericHooks),
            locks: LockManager::new(),
            drivers,
            registry,
            store,
            config,
        };
        tracing::debug!(
            classes = engine.registry.classes().count(),
            workers = engine.config.workers,
            "Engine ready"
        );
        Ok(Arc::new(engine))
    }

    pub fn spec(&self, keyword: &str) -> Result<Arc<ClassSpec>> {
        self.registry.get(keyword)
    }

    /// Lifecycle hooks for a class; classes without their own use the generic set.
    pub fn hooks(&self, keyword: &str) -> Arc<dyn ResourceHooks> {
        self.hooks
            .get(keyword)
            .cloned()
            .unwrap_or_else(|| self.generic_hooks.clone())
    }

    /// Load a live record, failing with `not_found`.
    pub async fn load(&self, spec: &ClassSpec, id: &str) -> Result<ResourceRecord> {
        self.store
            .get_resource(spec, id)
            .await?
            .ok_or_else(|| CloudError::not_found(spec.keyword, id))
    }
}

/// Caller identity plus the unit of work that owns any locks taken on its
/// behalf. Clones share the unit; `fork` starts a new one.
#[derive(Clone)]
pub struct OpContext {
    pub engine: Arc<Engine>,
    pub identity: Identity,
    pub unit: WorkUnit,
}

impl OpContext {
    pub fn new(engine: &Arc<Engine>, identity: Identity) -> Self {
        Self {
            engine: engine.clone(),
            identity,
            unit: WorkUnit::new(),
        }
    }

    /// Context used by sync cycles, tasks and scheduled operations.
    pub fn system(engine: &Arc<Engine>) -> Self {
        Self::new(engine, Identity::system())
    }

    pub fn fork(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            identity: self.identity.clone(),
            unit: WorkUnit::new(),
        }
    }
}
