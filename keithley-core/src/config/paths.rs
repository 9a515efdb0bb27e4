//! Default path resolution for configuration files
//!
//! Uses XDG Base Directory specification when available, with sensible fallbacks.

use std::path::PathBuf;

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "KEITHLEY_CONFIG";

/// Returns the default path for the static configuration file.
///
/// Uses XDG config directory if available:
/// - Linux/macOS: `~/.config/keithley/config.toml`
/// - Fallback: `/etc/keithley/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("keithley")
        .join("config.toml")
}

/// Resolve the configuration path: explicit path > `KEITHLEY_CONFIG` > default
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path())
    })
}
