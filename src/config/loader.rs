use std::path::Path;

use anyhow::{Context, Result};

use crate::config::types::EngineConfig;
use crate::config::validator;

/// Default config file name looked up in the current directory.
pub const DEFAULT_CONFIG: &str = "cloudmirror.yaml";

/// Load engine configuration from a YAML file.
///
/// - If `path` exists, parse it and validate.
/// - If `path` is the default file name and doesn't exist, fall back to defaults.
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let p = Path::new(path);

    if !p.exists() {
        if path == DEFAULT_CONFIG {
            tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG);
            return Ok(EngineConfig::default());
        }
        anyhow::bail!("Config not found: '{}'", path);
    }

    let content = std::fs::read_to_string(p)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    parse_config(&content)
}

/// Parse a YAML document into an engine config and validate it.
pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(content).context("Failed to parse YAML config")?
    };
    validator::validate(&config)?;
    Ok(config)
}
