//! Effective configuration for one CLI invocation
//!
//! Priority chain (lowest to highest):
//! 1. Defaults
//! 2. Config file
//! 3. Environment variables
//! 4. CLI arguments

use anyhow::{Context, Result};
use keithley_core::{resolve_config_path, StaticConfig};
use std::path::PathBuf;

/// Flag-level overrides taken from the command line
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Explicit config file path
    pub config: Option<PathBuf>,
    /// Resource string
    pub resource: Option<String>,
    /// Force the simulated instrument
    pub mock: bool,
    /// Current compliance in amperes
    pub current_limit: Option<f64>,
}

/// Merged configuration plus where it came from
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    /// Path the file layer was read from (it may not exist)
    pub path: PathBuf,
    /// Validated configuration
    pub config: StaticConfig,
}

/// Build the effective configuration
pub fn load(overrides: &Overrides) -> Result<EffectiveConfig> {
    let path = resolve_config_path(overrides.config.clone());

    let mut config = StaticConfig::load(&path)
        .with_context(|| format!("Failed to load config file {}", path.display()))?;

    config
        .apply_env_overrides()
        .context("Invalid environment override")?;

    if let Some(resource) = &overrides.resource {
        config.connection.resource = resource.clone();
    }
    if overrides.mock {
        config.connection.resource = "mock".to_string();
    }
    if let Some(limit) = overrides.current_limit {
        config.source.current_limit = Some(limit);
    }

    config.validate().context("Invalid configuration")?;

    Ok(EffectiveConfig { path, config })
}
