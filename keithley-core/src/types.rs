//! Core types and data structures for source-meter control

use crate::{Result, SmuError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default ramp slew rate in volts per second
pub const DEFAULT_SLEW_RATE: f64 = 10.0;

/// Default largest single ramp step in volts
pub const DEFAULT_VOLT_STEP: f64 = 2.5;

/// Source output relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    /// Output relay closed, current can flow
    On,
    /// Output relay open
    Off,
}

impl OutputState {
    /// Argument of the `:OUTPUT` command
    pub fn as_scpi(&self) -> &'static str {
        match self {
            OutputState::On => "ON",
            OutputState::Off => "OFF",
        }
    }

    /// Decode the answer to `:OUTPUT:STATE?`
    ///
    /// The instrument answers `0` or `1`. Anything else, numeric or not, is a
    /// protocol error and is never coerced to a default.
    pub fn from_response(response: &str) -> Result<Self> {
        let trimmed = response.trim();
        let value = trimmed.parse::<i64>().map_err(|_| {
            SmuError::Protocol(format!(
                "Expected output state \"0\" or \"1\", received '{}'",
                trimmed
            ))
        })?;

        match value {
            0 => Ok(OutputState::Off),
            1 => Ok(OutputState::On),
            other => Err(SmuError::Protocol(format!(
                "Expected output state \"0\" or \"1\", received '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputState::On => write!(f, "on"),
            OutputState::Off => write!(f, "off"),
        }
    }
}

impl FromStr for OutputState {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "on" => Ok(OutputState::On),
            "off" => Ok(OutputState::Off),
            _ => Err(SmuError::InvalidArgument(format!(
                "Output state must be \"on\" or \"off\", received '{}'",
                s
            ))),
        }
    }
}

/// Fixed sign applied to every commanded voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Only non-negative voltages are ever commanded
    Positive,
    /// Only non-positive voltages are ever commanded
    Negative,
}

impl Polarity {
    /// `+1.0` or `-1.0`
    pub fn sign(&self) -> f64 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }

    /// Force `volts` to this polarity, ignoring the caller's sign
    ///
    /// ```
    /// use keithley_core::Polarity;
    ///
    /// assert_eq!(Polarity::Negative.coerce(150.0), -150.0);
    /// assert_eq!(Polarity::Negative.coerce(-150.0), -150.0);
    /// assert_eq!(Polarity::Positive.coerce(-3.0), 3.0);
    /// ```
    pub fn coerce(&self, volts: f64) -> f64 {
        if volts == 0.0 {
            // Never emit "-0" on the wire
            return 0.0;
        }
        self.sign() * volts.abs()
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "positive"),
            Polarity::Negative => write!(f, "negative"),
        }
    }
}

impl FromStr for Polarity {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "+" => Ok(Polarity::Positive),
            "negative" | "-" => Ok(Polarity::Negative),
            _ => Err(SmuError::InvalidArgument(format!(
                "Polarity must be \"positive\" or \"negative\", received '{}'",
                s
            ))),
        }
    }
}

/// Limits governing a voltage ramp
///
/// Immutable once built; both values are validated strictly positive and
/// finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampParameters {
    slew_rate: f64,
    volt_step: f64,
}

impl RampParameters {
    /// Create ramp parameters
    ///
    /// # Arguments
    /// * `slew_rate` - Maximum rate of change in volts per second
    /// * `volt_step` - Maximum change per ramp step in volts
    pub fn new(slew_rate: f64, volt_step: f64) -> Result<Self> {
        if !slew_rate.is_finite() || slew_rate <= 0.0 {
            return Err(SmuError::InvalidArgument(format!(
                "Slew rate must be a positive number of volts per second, got {}",
                slew_rate
            )));
        }
        if !volt_step.is_finite() || volt_step <= 0.0 {
            return Err(SmuError::InvalidArgument(format!(
                "Volt step must be a positive number of volts, got {}",
                volt_step
            )));
        }
        Ok(Self {
            slew_rate,
            volt_step,
        })
    }

    /// Volts per second
    pub fn slew_rate(&self) -> f64 {
        self.slew_rate
    }

    /// Volts per step
    pub fn volt_step(&self) -> f64 {
        self.volt_step
    }

    /// Pause between two consecutive ramp steps (`volt_step / slew_rate`)
    pub fn step_delay(&self) -> Duration {
        Duration::from_secs_f64(self.volt_step / self.slew_rate)
    }
}

impl Default for RampParameters {
    fn default() -> Self {
        Self {
            slew_rate: DEFAULT_SLEW_RATE,
            volt_step: DEFAULT_VOLT_STEP,
        }
    }
}

/// Answer to `*IDN?`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity(String);

impl Identity {
    /// Wrap a raw identification string, dropping line terminators
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    /// Raw identification string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn field(&self, index: usize) -> Option<&str> {
        self.0
            .split(',')
            .nth(index)
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// Manufacturer field, if present
    pub fn manufacturer(&self) -> Option<&str> {
        self.field(0)
    }

    /// Model field, if present
    pub fn model(&self) -> Option<&str> {
        self.field(1)
    }

    /// Serial number field, if present
    pub fn serial_number(&self) -> Option<&str> {
        self.field(2)
    }

    /// Firmware revision field, if present
    pub fn firmware(&self) -> Option<&str> {
        self.field(3)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One snapshot of the source settings and measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Readings {
    /// Output relay state
    pub output: OutputState,
    /// Programmed source voltage (V)
    pub source_voltage: f64,
    /// Measured voltage (V)
    pub measured_voltage: f64,
    /// Current compliance limit (A)
    pub current_limit: f64,
    /// Measured current (A)
    pub measured_current: f64,
}
