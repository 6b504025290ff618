use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::ScopeLevel;

/// Recognized list options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListInput {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub status: Vec<String>,
    pub enabled: Option<bool>,
    /// Substring match on name.
    pub search: Option<String>,
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub managed: ManagedFilter,
    /// `true` for records materialized on the cloud, `false` for local-only.
    pub external: Option<bool>,
    /// Equality filters on declared class attributes.
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Column or computed key, `-` prefix for descending.
    pub order_by: Vec<String>,
    pub export_keys: Vec<String>,
    pub scope: Option<ScopeLevel>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListInput {
    pub fn is_projection(&self) -> bool {
        !self.export_keys.is_empty()
    }
}

/// Provider/region/zone chain filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedFilter {
    pub provider_ids: Vec<String>,
    pub account_ids: Vec<String>,
    pub region_ids: Vec<String>,
    pub zone_ids: Vec<String>,
}

impl ManagedFilter {
    pub fn is_empty(&self) -> bool {
        self.provider_ids.is_empty()
            && self.account_ids.is_empty()
            && self.region_ids.is_empty()
            && self.zone_ids.is_empty()
    }

    pub fn provider(id: &str) -> Self {
        Self {
            provider_ids: vec![id.to_string()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub key: String,
    pub desc: bool,
}

impl OrderKey {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(key) => Self {
                key: key.to_string(),
                desc: true,
            },
            None => Self {
                key: raw.to_string(),
                desc: false,
            },
        }
    }
}
