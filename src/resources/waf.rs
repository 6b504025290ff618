//! Web application firewalls. The provider decides which WAF types it can
//! host.

use std::sync::Arc;

use async_trait::async_trait;

use super::generic;
use super::{CreateInput, ResourceHooks};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::registry::ClassSpec;

pub struct WafHooks;

#[async_trait]
impl ResourceHooks for WafHooks {
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        input: CreateInput,
    ) -> Result<CreateInput> {
        let waf_type = input
            .attr_str("waf_type")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CloudError::missing_parameter("waf_type"))?
            .to_string();
        if let Some(ref manager_ref) = input.manager_id {
            let provider = cx.engine.providers.get(manager_ref).await?;
            let driver = cx.engine.drivers.driver_for(&provider)?;
            if !driver.supported_waf_types().iter().any(|t| *t == waf_type) {
                return Err(CloudError::not_supported(format!(
                    "waf type {} on {}",
                    waf_type, provider.brand
                )));
            }
        }
        generic::validate_create(cx, spec, input).await
    }
}
