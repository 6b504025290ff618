use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::state::backend::StateBackend;
use crate::state::models::QuotaRecord;

/// Per-domain counters. A create reserves a pending unit at validation time;
/// PostCreate commits it, a failed or abandoned create cancels it, and
/// RealDelete releases a committed unit.
pub struct QuotaManager {
    store: Arc<dyn StateBackend>,
    limits: BTreeMap<String, i64>,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn StateBackend>, limits: BTreeMap<String, i64>) -> Self {
        Self { store, limits }
    }

    pub fn limit(&self, resource: &str) -> Option<i64> {
        self.limits.get(resource).copied()
    }

    /// Fails with `out_of_quota` when the domain is at its limit.
    pub async fn reserve(&self, domain_id: &str, resource: &str) -> Result<()> {
        self.store
            .reserve_quota(domain_id, resource, 1, self.limit(resource))
            .await?;
        tracing::debug!(domain = domain_id, resource, "Reserved quota");
        Ok(())
    }

    pub async fn commit(&self, domain_id: &str, resource: &str) -> Result<()> {
        self.store.commit_quota(domain_id, resource, 1).await
    }

    pub async fn cancel_pending(&self, domain_id: &str, resource: &str) -> Result<()> {
        self.store.cancel_quota(domain_id, resource, 1).await
    }

    pub async fn release(&self, domain_id: &str, resource: &str) -> Result<()> {
        self.store.release_quota(domain_id, resource, 1).await
    }

    pub async fn usage(&self, domain_id: &str, resource: &str) -> Result<QuotaRecord> {
        self.store.get_quota(domain_id, resource).await
    }
}
