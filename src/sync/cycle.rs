//! One reconciliation cycle over everything a provider exposes.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::engine::sync_class;
use super::{SyncOp, SyncOptions, SyncResult, SyncScope};
use crate::engine::{Engine, OpContext};
use crate::error::{CloudError, Result};
use crate::provider::manager::SyncDecision;
use crate::provider::{RemoteHandle, RemoteScope};
use crate::query::{ManagedFilter, ResourceQuery};
use crate::registry::{Capability, ClassSpec, Locality};
use crate::state::models::ResourceRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Ignore the cooldown window.
    pub force: bool,
    /// Skip field updates of records present on both sides.
    pub xor: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub provider: String,
    /// Why nothing ran, when the cycle was skipped.
    pub skipped: Option<String>,
    pub classes: BTreeMap<String, SyncResult>,
    pub total: SyncResult,
}

impl CycleReport {
    fn record(&mut self, class: &str, result: SyncResult) {
        self.total.merge(result.clone());
        self.classes
            .entry(class.to_string())
            .or_default()
            .merge(result);
    }

    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.skipped {
            Some(ref reason) => write!(f, "{}: skipped ({})", self.provider, reason),
            None => write!(f, "{}: {}", self.provider, self.total),
        }
    }
}

/// Run a cycle for the provider named or identified by `provider_ref`.
///
/// The cooldown applies unless `force` is set. A cycle that is still live
/// fails with `resource_busy`; a disabled provider with `invalid_status`.
pub async fn sync_provider(
    engine: &Arc<Engine>,
    provider_ref: &str,
    options: CycleOptions,
) -> Result<CycleReport> {
    let cx = OpContext::system(engine);
    let provider_id = engine.providers.get(provider_ref).await?.id;

    let provider = {
        let _guard = engine
            .locks
            .lock_object(&cx.unit, "cloudprovider", &provider_id)
            .await;
        let mut provider = engine.providers.get(&provider_id).await?;
        match engine
            .providers
            .decide(&provider, options.force, chrono::Utc::now())
        {
            SyncDecision::Run => {}
            SyncDecision::Cooldown { remaining_secs } => {
                info!(provider = %provider.name, remaining_secs, "Sync skipped: cooldown");
                return Ok(CycleReport {
                    provider: provider.name.clone(),
                    skipped: Some(format!("cooldown, {}s left", remaining_secs)),
                    ..CycleReport::default()
                });
            }
            SyncDecision::Busy => {
                return Err(CloudError::resource_busy(format!(
                    "provider {} is already syncing",
                    provider.name
                )));
            }
            SyncDecision::Disabled => {
                return Err(CloudError::invalid_status("disabled", "enabled"));
            }
        }
        engine.providers.mark_sync_start(&mut provider).await?;
        provider
    };

    let driver = match engine.drivers.driver_for(&provider) {
        Ok(driver) => driver,
        Err(e) => {
            warn!(provider = %provider.name, error = %e, "Cannot connect provider");
            finish(engine, &cx, &provider_id, false, None).await?;
            return Err(e);
        }
    };
    info!(provider = %provider.name, brand = %provider.brand, force = options.force, "Sync started");

    match run_cycle(engine, &cx, SyncScope::new(provider.clone(), driver), options).await {
        Ok((report, connected, balance)) => {
            finish(engine, &cx, &provider_id, connected, balance).await?;
            info!(provider = %provider.name, result = %report.total, "Sync finished");
            Ok(report)
        }
        Err(e) => {
            finish(engine, &cx, &provider_id, false, None).await?;
            Err(e)
        }
    }
}

/// Projects, regions (with zones), then every syncable top-level class,
/// per region for regional classes. Returns the report, whether the
/// provider answered, and its balance.
async fn run_cycle(
    engine: &Arc<Engine>,
    cx: &OpContext,
    scope: SyncScope,
    options: CycleOptions,
) -> Result<(CycleReport, bool, Option<f64>)> {
    let provider = scope.provider.clone();
    let driver = scope.driver.clone();
    let sync_options = if options.xor || engine.config.sync.xor {
        SyncOptions::xor()
    } else {
        SyncOptions::full()
    };
    let mut report = CycleReport {
        provider: provider.name.clone(),
        total: SyncResult::with_limit(engine.config.sync.error_limit),
        ..CycleReport::default()
    };

    let balance = match driver.get_balance().await {
        Ok(balance) => balance,
        Err(e) => {
            warn!(provider = %provider.name, error = %e, "Balance probe failed");
            None
        }
    };

    if provider.maps_cloud_projects() {
        let listed = driver.list_projects().await;
        sync_listed(cx, &mut report, "externalproject", &scope, listed, sync_options).await?;
    }

    let regions_listed = if driver.is_on_premise() {
        driver.get_on_prem_region().await.map(|region| vec![region])
    } else {
        driver.list_regions().await
    };
    let connected = regions_listed.is_ok();
    let classes = syncable_classes(engine)?;

    // Records in a region that vanished go first, so the region itself is
    // free to go when the region list is reconciled.
    if let Ok(ref listed) = regions_listed {
        let present: HashSet<&str> = listed.iter().map(|r| r.global_id()).collect();
        let vanished = managed_regions(engine, &provider.id)
            .await?
            .into_iter()
            .filter(|r| !present.contains(r.external_id.as_str()));
        for region in vanished {
            let regional = scope.clone().with_region(region);
            for spec in classes.iter().filter(|s| s.locality != Locality::Global) {
                sync_listed(cx, &mut report, spec.keyword, &regional, Ok(Vec::new()), sync_options).await?;
            }
        }
    }
    sync_listed(cx, &mut report, "cloudregion", &scope, regions_listed, sync_options).await?;

    let regions = managed_regions(engine, &provider.id).await?;
    for spec in &classes {
        if spec.locality == Locality::Global {
            let listed = driver.list_resources(spec.keyword, &RemoteScope::global()).await;
            sync_listed(cx, &mut report, spec.keyword, &scope, listed, sync_options).await?;
            continue;
        }
        for region in &regions {
            let regional = scope.clone().with_region(region.clone());
            let listed = driver.list_resources(spec.keyword, &regional.remote()).await;
            sync_listed(cx, &mut report, spec.keyword, &regional, listed, sync_options).await?;
        }
    }

    Ok((report, connected, balance))
}

/// Top-level syncable classes other than regions and projects, in
/// dependency order.
fn syncable_classes(engine: &Engine) -> Result<Vec<Arc<ClassSpec>>> {
    Ok(engine
        .registry
        .top_level()?
        .into_iter()
        .filter(|spec| {
            !matches!(spec.keyword, "cloudregion" | "externalproject") && spec.has(Capability::Syncable)
        })
        .collect())
}

async fn managed_regions(engine: &Engine, provider_id: &str) -> Result<Vec<ResourceRecord>> {
    engine
        .store
        .fetch(
            &ResourceQuery::new(engine.spec("cloudregion")?)
                .filter_by_managed(&ManagedFilter::provider(provider_id))
                .filter_by_external_status(true),
        )
        .await
}

async fn sync_listed(
    cx: &OpContext,
    report: &mut CycleReport,
    class: &str,
    scope: &SyncScope,
    listed: Result<Vec<RemoteHandle>>,
    options: SyncOptions,
) -> Result<()> {
    let spec = cx.engine.spec(class)?;
    let result = match listed {
        Ok(remote) => sync_class(cx, spec, scope.clone(), remote, options).await,
        Err(e) => {
            let mut failed = SyncResult::default();
            failed.error(class, SyncOp::List, &scope.key(), &e);
            failed
        }
    };
    report.record(class, result);
    Ok(())
}

/// End-of-cycle mark, written under the provider's object lock.
async fn finish(
    engine: &Arc<Engine>,
    cx: &OpContext,
    provider_id: &str,
    connected: bool,
    balance: Option<f64>,
) -> Result<()> {
    let _guard = engine
        .locks
        .lock_object(&cx.unit, "cloudprovider", provider_id)
        .await;
    let mut provider = engine.providers.get(provider_id).await?;
    engine
        .providers
        .mark_sync_end(&mut provider, connected, balance)
        .await
}
