//! Configuration types for source-meter sessions
//!
//! A single [`StaticConfig`] TOML file holds the link settings, the ramp
//! safety limits, and the initial source settings. It is read once when a
//! session starts.
//!
//! Priority chain (lowest to highest): defaults, file, environment, CLI flags.

mod paths;
mod static_config;

pub use paths::{default_config_path, resolve_config_path, CONFIG_PATH_ENV};
pub use static_config::{
    ConnectionConfig, SafetyConfig, SourceConfig, StaticConfig, POLARITY_ENV, RESOURCE_ENV,
};
