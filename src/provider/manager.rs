use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::types::ProviderSeed;
use crate::error::{CloudError, Result};
use crate::registry::status::{ProviderStatus, ProviderSyncStatus};
use crate::state::backend::StateBackend;
use crate::state::models::ProviderRecord;

/// What a sync request on a provider should do right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    Run,
    /// Last sync ended inside the cooldown window.
    Cooldown { remaining_secs: i64 },
    /// Another cycle is running and is not stale yet.
    Busy,
    Disabled,
}

/// Provider bookkeeping: registration, lookup, enablement and the sync
/// status fields that gate reconciliation cycles.
pub struct ProviderManager {
    store: Arc<dyn StateBackend>,
    default_cooldown: Duration,
}

impl ProviderManager {
    pub fn new(store: Arc<dyn StateBackend>, default_cooldown: Duration) -> Self {
        Self {
            store,
            default_cooldown,
        }
    }

    /// Register a provider from a seed entry. Names are unique.
    pub async fn add(&self, seed: &ProviderSeed) -> Result<ProviderRecord> {
        if self.store.get_provider_by_name(&seed.name).await?.is_some() {
            return Err(CloudError::conflict(format!(
                "provider {} already exists",
                seed.name
            )));
        }
        let mut provider = ProviderRecord::new(&seed.name, &seed.brand);
        provider.account_id = seed.account_id.clone();
        provider.endpoint = seed.endpoint.clone();
        provider.credentials = seed.credentials.clone();
        provider.domain_id = seed.domain_id.clone();
        provider.project_id = seed.project_id.clone();
        provider.project_src = seed.project_src.clone();
        provider.sync_cooldown_secs = seed.sync_cooldown_secs.map(|s| s as i64);
        self.store.insert_provider(&provider).await?;
        info!(provider = %provider.name, brand = %provider.brand, "Registered provider");
        Ok(provider)
    }

    /// Register every seed not yet present. Returns how many were added.
    pub async fn seed(&self, seeds: &[ProviderSeed]) -> Result<usize> {
        let mut added = 0;
        for seed in seeds {
            if self.store.get_provider_by_name(&seed.name).await?.is_none() {
                self.add(seed).await?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Look a provider up by id, then by name.
    pub async fn get(&self, name_or_id: &str) -> Result<ProviderRecord> {
        if let Some(provider) = self.store.get_provider(name_or_id).await? {
            return Ok(provider);
        }
        self.store
            .get_provider_by_name(name_or_id)
            .await?
            .ok_or_else(|| CloudError::not_found("cloudprovider", name_or_id))
    }

    pub async fn list(&self) -> Result<Vec<ProviderRecord>> {
        self.store.list_providers().await
    }

    pub async fn set_enabled(&self, name_or_id: &str, enabled: bool) -> Result<ProviderRecord> {
        let mut provider = self.get(name_or_id).await?;
        provider.enabled = enabled;
        self.store.update_provider(&provider).await?;
        Ok(provider)
    }

    pub fn cooldown_for(&self, provider: &ProviderRecord) -> Duration {
        provider
            .sync_cooldown_secs
            .map(|s| Duration::from_secs(s.max(0) as u64))
            .unwrap_or(self.default_cooldown)
    }

    /// Decide whether a sync may start at `now`.
    ///
    /// A cycle stuck in `syncing` for longer than the cooldown is stale and
    /// may be re-entered. `force` bypasses the cooldown but not a live cycle.
    pub fn decide(&self, provider: &ProviderRecord, force: bool, now: DateTime<Utc>) -> SyncDecision {
        if !provider.enabled {
            return SyncDecision::Disabled;
        }
        let cooldown = chrono::Duration::from_std(self.cooldown_for(provider))
            .unwrap_or_else(|_| chrono::Duration::zero());

        if provider.sync_status != ProviderSyncStatus::Idle.as_str() {
            let started = provider.last_sync_at.as_deref().and_then(parse_time);
            let stale = started.map(|t| now - t > cooldown).unwrap_or(true);
            if !stale {
                return SyncDecision::Busy;
            }
            tracing::warn!(provider = %provider.name, "Re-entering stale sync");
            return SyncDecision::Run;
        }

        if force {
            return SyncDecision::Run;
        }
        match provider.last_sync_end_at.as_deref().and_then(parse_time) {
            Some(ended) if now - ended < cooldown => SyncDecision::Cooldown {
                remaining_secs: (cooldown - (now - ended)).num_seconds(),
            },
            _ => SyncDecision::Run,
        }
    }

    /// Record the start of a cycle. Callers hold the provider's object lock.
    pub async fn mark_sync_start(&self, provider: &mut ProviderRecord) -> Result<()> {
        provider.sync_status = ProviderSyncStatus::Syncing.as_str().to_string();
        provider.last_sync_at = Some(Utc::now().to_rfc3339());
        self.store.update_provider(provider).await
    }

    /// Record the end of a cycle and the probed connectivity and balance.
    pub async fn mark_sync_end(
        &self,
        provider: &mut ProviderRecord,
        connected: bool,
        balance: Option<f64>,
    ) -> Result<()> {
        provider.sync_status = ProviderSyncStatus::Idle.as_str().to_string();
        provider.last_sync_end_at = Some(Utc::now().to_rfc3339());
        provider.status = if connected {
            ProviderStatus::Connected.as_str().to_string()
        } else {
            ProviderStatus::Disconnected.as_str().to_string()
        };
        if balance.is_some() {
            provider.balance = balance;
        }
        self.store.update_provider(provider).await
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
