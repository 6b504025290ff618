use anyhow::{bail, Result};
use std::collections::HashSet;

use super::types::EngineConfig;

/// Validate the entire configuration for correctness.
pub fn validate(config: &EngineConfig) -> Result<()> {
    validate_settings(config)?;
    validate_providers(config)?;
    Ok(())
}

fn validate_settings(config: &EngineConfig) -> Result<()> {
    if config.workers == 0 {
        bail!("workers must be at least 1");
    }
    let octet = config.netprep.gateway_last_octet;
    if octet == 0 || octet == 255 {
        bail!(
            "netprep.gateway_last_octet must be within 1..=254, got {}",
            octet
        );
    }
    for (resource, limit) in &config.quotas {
        if *limit < 0 {
            bail!("Quota '{}' has a negative limit {}", resource, limit);
        }
    }
    Ok(())
}

/// Ensure provider names are unique and project source modes are known.
fn validate_providers(config: &EngineConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.name.is_empty() {
            bail!("Provider entry is missing a name");
        }
        if !seen.insert(provider.name.as_str()) {
            bail!("Provider '{}' is declared more than once", provider.name);
        }
        if provider.project_src != "local" && provider.project_src != "cloud" {
            bail!(
                "Provider '{}' has unknown project_src '{}' (expected local or cloud)",
                provider.name,
                provider.project_src
            );
        }
    }
    Ok(())
}
