use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ─── Top-Level Config ───────────────────────────────────────────────────────

/// Root configuration for the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    /// Size of the task worker pool.
    pub workers: usize,
    pub sync: SyncSettings,
    pub cache: CacheSettings,
    pub netprep: NetprepSettings,
    /// Per-domain limits keyed by quota resource name. Absent means unlimited.
    pub quotas: BTreeMap<String, i64>,
    /// Providers registered by `cloudmirror init`.
    pub providers: Vec<ProviderSeed>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            workers: 10,
            sync: SyncSettings::default(),
            cache: CacheSettings::default(),
            netprep: NetprepSettings::default(),
            quotas: BTreeMap::new(),
            providers: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn quota_limit(&self, resource: &str) -> Option<i64> {
        self.quotas.get(resource).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".cloudmirror/state.db".to_string(),
        }
    }
}

// ─── Sync ───────────────────────────────────────────────────────────────────

/// Settings controlling reconciliation cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Minimum seconds between two unforced syncs of the same provider.
    pub cooldown_secs: u64,
    /// Maximum diagnostics retained per sync result.
    pub error_limit: usize,
    /// Default skip-update mode for periodic cycles.
    pub xor: bool,
}

impl SyncSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            error_limit: 32,
            xor: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub image_refresh_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            image_refresh_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetprepSettings {
    pub gateway_last_octet: u8,
}

impl Default for NetprepSettings {
    fn default() -> Self {
        Self {
            gateway_last_octet: 1,
        }
    }
}

// ─── Providers ──────────────────────────────────────────────────────────────

/// A provider declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSeed {
    pub name: String,
    pub brand: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub credentials: String,
    #[serde(default = "default_domain")]
    pub domain_id: String,
    #[serde(default)]
    pub project_id: String,
    /// "local" keeps local ownership, "cloud" maps remote projects.
    #[serde(default = "default_project_src")]
    pub project_src: String,
    #[serde(default)]
    pub sync_cooldown_secs: Option<u64>,
}

fn default_domain() -> String {
    "default".to_string()
}

fn default_project_src() -> String {
    "local".to_string()
}
