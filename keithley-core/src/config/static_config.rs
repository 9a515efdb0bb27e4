//! Static configuration loaded once at startup
//!
//! This configuration is read-only after a session starts. Ramp limits and
//! polarity cannot change under a live controller.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    Polarity, RampParameters, Resource, Result, SmuError, DEFAULT_SLEW_RATE, DEFAULT_VOLT_STEP,
};

/// Environment variable overriding `connection.resource`
pub const RESOURCE_ENV: &str = "KEITHLEY_RESOURCE";

/// Environment variable overriding `safety.polarity`
pub const POLARITY_ENV: &str = "KEITHLEY_POLARITY";

/// Link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection string, see [`Resource`]
    pub resource: String,
    /// Link timeout in milliseconds
    pub timeout_ms: u64,
    /// Serial baud rate; the instrument's default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            resource: "/dev/ttyUSB0".to_string(),
            timeout_ms: 2000,
            baud_rate: None,
        }
    }
}

/// Ramp safety configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Sign forced onto every commanded voltage
    pub polarity: Polarity,
    /// Volts per second
    #[serde(default = "default_slew_rate")]
    pub slew_rate: f64,
    /// Volts per step
    #[serde(default = "default_volt_step")]
    pub volt_step: f64,
}

fn default_slew_rate() -> f64 {
    DEFAULT_SLEW_RATE
}

fn default_volt_step() -> f64 {
    DEFAULT_VOLT_STEP
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            // LGAD sensors are reverse biased
            polarity: Polarity::Negative,
            slew_rate: DEFAULT_SLEW_RATE,
            volt_step: DEFAULT_VOLT_STEP,
        }
    }
}

/// Source settings applied when a session starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Current compliance in amperes; the instrument's setting is kept when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_limit: Option<f64>,
}

/// Static configuration for a source-meter session.
///
/// Located at `~/.config/keithley/config.toml` by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Link settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Ramp limits and polarity
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Initial source settings
    #[serde(default)]
    pub source: SourceConfig,
}

impl StaticConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file is
    /// an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            SmuError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SmuError::Config(e.to_string()))
    }

    /// Apply `KEITHLEY_RESOURCE` / `KEITHLEY_POLARITY` overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(resource) = std::env::var(RESOURCE_ENV) {
            self.connection.resource = resource;
        }

        if let Ok(polarity) = std::env::var(POLARITY_ENV) {
            self.safety.polarity = polarity.parse()?;
        }

        Ok(())
    }

    /// Check every value that would otherwise fail later, mid-session
    pub fn validate(&self) -> Result<()> {
        self.resource()?;
        self.ramp_parameters()?;

        if self.connection.timeout_ms == 0 {
            return Err(SmuError::Config(
                "connection.timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(limit) = self.source.current_limit {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(SmuError::Config(format!(
                    "source.current_limit must be a positive number of amperes, got {}",
                    limit
                )));
            }
        }

        Ok(())
    }

    /// Parsed connection string
    pub fn resource(&self) -> Result<Resource> {
        self.connection
            .resource
            .parse()
            .map_err(|e: SmuError| SmuError::Config(e.to_string()))
    }

    /// Typed ramp limits
    pub fn ramp_parameters(&self) -> Result<RampParameters> {
        RampParameters::new(self.safety.slew_rate, self.safety.volt_step)
            .map_err(|e| SmuError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_static_config() {
        let config = StaticConfig::default();
        assert_eq!(config.safety.polarity, Polarity::Negative);
        assert_eq!(config.safety.slew_rate, 10.0);
        assert_eq!(config.safety.volt_step, 2.5);
        assert_eq!(config.connection.timeout_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_config_serialization() {
        let config = StaticConfig::default();
        let toml_str = config.to_toml().unwrap();

        assert!(toml_str.contains("[connection]"));
        assert!(toml_str.contains("[safety]"));
        assert!(toml_str.contains("polarity = \"negative\""));
        // Unset optional values are omitted
        assert!(!toml_str.contains("baud_rate"));
        assert!(!toml_str.contains("current_limit"));
    }

    #[test]
    fn test_static_config_deserialization() {
        let toml_str = r#"
            [connection]
            resource = "TCPIP0::192.168.1.50::5025::SOCKET"
            timeout_ms = 5000

            [safety]
            polarity = "positive"
            slew_rate = 5.0
            volt_step = 1.0

            [source]
            current_limit = 1e-5
        "#;

        let config = StaticConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.connection.timeout_ms, 5000);
        assert_eq!(config.safety.polarity, Polarity::Positive);
        assert_eq!(config.source.current_limit, Some(1e-5));
        assert_eq!(
            config.resource().unwrap(),
            Resource::Socket {
                host: "192.168.1.50".to_string(),
                port: 5025
            }
        );
        let ramp = config.ramp_parameters().unwrap();
        assert_eq!(ramp.slew_rate(), 5.0);
        assert_eq!(ramp.volt_step(), 1.0);
    }

    #[test]
    fn test_static_config_partial_uses_defaults() {
        let toml_str = r#"
            [safety]
            polarity = "positive"
        "#;

        let config = StaticConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.safety.slew_rate, 10.0);
        assert_eq!(config.safety.volt_step, 2.5);
        assert_eq!(config.connection, ConnectionConfig::default());
    }

    #[test]
    fn test_static_config_rejects_unknown_polarity() {
        let toml_str = r#"
            [safety]
            polarity = "sideways"
        "#;

        let result = StaticConfig::from_toml(toml_str);
        assert!(matches!(result, Err(SmuError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_ramp() {
        let mut config = StaticConfig::default();
        config.safety.volt_step = 0.0;
        assert!(matches!(config.validate(), Err(SmuError::Config(_))));

        let mut config = StaticConfig::default();
        config.safety.slew_rate = -10.0;
        assert!(matches!(config.validate(), Err(SmuError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_current_limit() {
        let mut config = StaticConfig::default();
        config.source.current_limit = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_resource() {
        let mut config = StaticConfig::default();
        config.connection.resource = "GPIB0::24::INSTR".to_string();
        assert!(matches!(config.validate(), Err(SmuError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StaticConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, StaticConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[connection]\nresource = \"mock\"\ntimeout_ms = 100\n\n[safety]\npolarity = \"positive\"\nvolt_step = 5.0"
        )
        .unwrap();

        let config = StaticConfig::load(&path).unwrap();
        assert_eq!(config.resource().unwrap(), Resource::Simulated);
        assert_eq!(config.safety.volt_step, 5.0);
        assert_eq!(config.safety.slew_rate, 10.0);
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[connection\nresource = ").unwrap();

        assert!(matches!(
            StaticConfig::load(&path),
            Err(SmuError::Config(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = StaticConfig::default();
        config.connection.baud_rate = Some(57600);
        config.source.current_limit = Some(2.5e-6);

        let parsed = StaticConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(RESOURCE_ENV, "TCPIP0::192.168.1.20::5025::SOCKET");
        std::env::set_var(POLARITY_ENV, "positive");

        let mut config = StaticConfig::default();
        let result = config.apply_env_overrides();

        std::env::remove_var(RESOURCE_ENV);
        std::env::remove_var(POLARITY_ENV);

        result.unwrap();
        assert_eq!(
            config.resource().unwrap(),
            Resource::Socket {
                host: "192.168.1.20".to_string(),
                port: 5025
            }
        );
        assert_eq!(config.safety.polarity, Polarity::Positive);
    }

    #[test]
    #[serial]
    fn test_env_overrides_absent_keep_values() {
        std::env::remove_var(RESOURCE_ENV);
        std::env::remove_var(POLARITY_ENV);

        let mut config = StaticConfig::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config, StaticConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_invalid_polarity() {
        std::env::set_var(POLARITY_ENV, "sideways");

        let mut config = StaticConfig::default();
        let result = config.apply_env_overrides();

        std::env::remove_var(POLARITY_ENV);

        assert!(matches!(result, Err(SmuError::InvalidArgument(_))));
        assert_eq!(config.safety.polarity, Polarity::Negative);
    }
}
