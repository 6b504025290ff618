//! Provider regions. A region stays while live regional records still point
//! at it.

use std::sync::Arc;

use async_trait::async_trait;

use super::generic;
use super::ResourceHooks;
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::query::ResourceQuery;
use crate::registry::{ClassSpec, Locality};
use crate::state::models::ResourceRecord;

pub struct RegionHooks;

/// Live records of every regional or zonal top-level class placed in `region`.
/// Zones are the region's own children and cascade with it.
pub async fn dependants(cx: &OpContext, region: &ResourceRecord) -> Result<Vec<(&'static str, usize)>> {
    let mut found = Vec::new();
    for spec in cx.engine.registry.classes() {
        if spec.locality == Locality::Global || spec.parent.is_some() {
            continue;
        }
        let query = ResourceQuery::new(spec.clone()).filter_by_region(Some(&region.id));
        let live = cx.engine.store.count(&query).await?;
        if live > 0 {
            found.push((spec.plural, live));
        }
    }
    Ok(found)
}

#[async_trait]
impl ResourceHooks for RegionHooks {
    async fn sync_remove(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
    ) -> Result<()> {
        let blocking = dependants(cx, record).await?;
        if let Some((plural, live)) = blocking.first() {
            let err = CloudError::not_empty(format!(
                "{} still has {} {}",
                record.reference(),
                live,
                plural
            ));
            cx.engine
                .store
                .set_status(spec, &record.id, spec.statuses.lost, &err.to_string())
                .await?;
            return Err(err);
        }
        generic::sync_remove(cx, spec, record).await
    }
}
