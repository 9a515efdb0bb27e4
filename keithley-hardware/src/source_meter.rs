//! Source Meter - typed interface to the instrument
//!
//! Translates typed operations into SCPI over a [`Channel`] and validates
//! every answer before handing it back. No ramping happens here; see
//! [`crate::safety`] for that.

use crate::transport::{Channel, Transport};
use keithley_core::{
    Identity, InstrumentModel, Keithley2470, OutputState, Readings, Result, SmuError,
};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, error, info};

/// Default beeper frequency in hertz
pub const DEFAULT_BEEP_HZ: f64 = 2222.0;

/// Default beeper duration in seconds
pub const DEFAULT_BEEP_SECONDS: f64 = 0.5;

/// SCPI commands understood by the source meter
///
/// `Display` renders the exact wire text, without terminator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `*IDN?`
    Identify,
    /// `:OUTPUT ON` / `:OUTPUT OFF`
    SetOutput(OutputState),
    /// `:OUTPUT:STATE?`
    QueryOutput,
    /// `:SOURCE:VOLT:LEV <v>`
    SetSourceVoltage(f64),
    /// `:SOUR:VOLT?`
    QuerySourceVoltage,
    /// `:SOURCE:VOLT:ILIM <a>`
    SetCurrentLimit(f64),
    /// `:SOUR:VOLT:ILIM?`
    QueryCurrentLimit,
    /// `:MEASURE:VOLT?`
    MeasureVoltage,
    /// `:MEASURE:CURRENT?`
    MeasureCurrent,
    /// `:SYSTEM:BEEPER <f>, <t>`
    Beep { frequency_hz: f64, duration_s: f64 },
}

impl Command {
    /// Whether the instrument answers this command
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::Identify
                | Command::QueryOutput
                | Command::QuerySourceVoltage
                | Command::QueryCurrentLimit
                | Command::MeasureVoltage
                | Command::MeasureCurrent
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Identify => f.write_str("*IDN?"),
            Command::SetOutput(state) => write!(f, ":OUTPUT {}", state.as_scpi()),
            Command::QueryOutput => f.write_str(":OUTPUT:STATE?"),
            Command::SetSourceVoltage(volts) => write!(f, ":SOURCE:VOLT:LEV {}", volts),
            Command::QuerySourceVoltage => f.write_str(":SOUR:VOLT?"),
            Command::SetCurrentLimit(amperes) => write!(f, ":SOURCE:VOLT:ILIM {}", amperes),
            Command::QueryCurrentLimit => f.write_str(":SOUR:VOLT:ILIM?"),
            Command::MeasureVoltage => f.write_str(":MEASURE:VOLT?"),
            Command::MeasureCurrent => f.write_str(":MEASURE:CURRENT?"),
            Command::Beep {
                frequency_hz,
                duration_s,
            } => write!(f, ":SYSTEM:BEEPER {}, {}", frequency_hz, duration_s),
        }
    }
}

/// Decode a numeric answer
fn parse_number(command: Command, response: &str) -> Result<f64> {
    let trimmed = response.trim();
    trimmed.parse::<f64>().map_err(|_| {
        error!("Non-numeric answer to {}: '{}'", command, trimmed);
        SmuError::Protocol(format!(
            "Expected a number in answer to '{}', received '{}'",
            command, trimmed
        ))
    })
}

fn require_finite(what: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SmuError::InvalidArgument(format!(
            "{} must be a finite number, got {}",
            what, value
        )))
    }
}

/// Typed proxy for one connected source meter
///
/// Every method issues exactly the commands its name suggests, with no
/// ramping or state caching. Methods take `&self` and may be called from any
/// number of tasks; the shared [`Channel`] keeps transactions whole.
pub struct SourceMeter<M: InstrumentModel = Keithley2470> {
    channel: Channel,
    identity: Identity,
    _model: PhantomData<M>,
}

impl<M: InstrumentModel> SourceMeter<M> {
    /// Connect over a transport and bring the instrument to a safe state
    ///
    /// In order: check `*IDN?` against the model, take one throwaway voltage
    /// measurement (the first reading after power-up is unreliable), program
    /// 0 V, and switch the output off. Any failure aborts the connection.
    pub async fn connect(transport: Box<dyn Transport>) -> Result<Self> {
        Self::with_channel(Channel::new(transport)).await
    }

    /// Same as [`SourceMeter::connect`] over an existing channel
    pub async fn with_channel(channel: Channel) -> Result<Self> {
        let raw = channel.query(&Command::Identify.to_string()).await?;
        let identity = Identity::new(raw);

        if !M::matches_identity(identity.as_str()) {
            error!(
                "Connected device is not a {}: '{}'",
                M::NAME,
                identity.as_str()
            );
            return Err(SmuError::IdentityMismatch {
                expected: M::expected_identity(),
                reported: identity.as_str().to_string(),
            });
        }
        info!("Connected to {}", identity);

        let meter = Self {
            channel,
            identity,
            _model: PhantomData,
        };

        meter.measure_voltage().await?;
        meter.set_source_voltage(0.0).await?;
        meter.set_output(OutputState::Off).await?;

        debug!("{} initialized: 0 V, output off", M::NAME);
        Ok(meter)
    }

    async fn write(&self, command: Command) -> Result<()> {
        debug!("Sending command: {}", command);
        self.channel.write(&command.to_string()).await
    }

    async fn query(&self, command: Command) -> Result<String> {
        let response = self.channel.query(&command.to_string()).await?;
        debug!("{} -> {}", command, response);
        Ok(response)
    }

    async fn query_number(&self, command: Command) -> Result<f64> {
        let response = self.query(command).await?;
        parse_number(command, &response)
    }

    /// Identity reported at connection time
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Channel shared with this proxy
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Switch the output relay, without any ramping
    pub async fn set_output(&self, state: OutputState) -> Result<()> {
        self.write(Command::SetOutput(state)).await
    }

    /// Output relay state
    pub async fn output(&self) -> Result<OutputState> {
        let response = self.query(Command::QueryOutput).await?;
        OutputState::from_response(&response)
    }

    /// Program the source voltage in one jump
    pub async fn set_source_voltage(&self, volts: f64) -> Result<()> {
        require_finite("Source voltage", volts)?;
        self.write(Command::SetSourceVoltage(volts)).await
    }

    /// Programmed source voltage
    pub async fn source_voltage(&self) -> Result<f64> {
        self.query_number(Command::QuerySourceVoltage).await
    }

    /// Program the current compliance limit
    pub async fn set_current_limit(&self, amperes: f64) -> Result<()> {
        require_finite("Current limit", amperes)?;
        self.write(Command::SetCurrentLimit(amperes)).await
    }

    /// Current compliance limit
    pub async fn current_limit(&self) -> Result<f64> {
        self.query_number(Command::QueryCurrentLimit).await
    }

    /// Measure the output voltage
    pub async fn measure_voltage(&self) -> Result<f64> {
        self.query_number(Command::MeasureVoltage).await
    }

    /// Measure the output current
    pub async fn measure_current(&self) -> Result<f64> {
        self.query_number(Command::MeasureCurrent).await
    }

    /// Sound the front-panel beeper
    ///
    /// Rejected before anything is sent unless the frequency lies in the
    /// model's beeper range and the duration is between 0 and its maximum.
    pub async fn beep(&self, frequency_hz: f64, duration_s: f64) -> Result<()> {
        if !frequency_hz.is_finite() || frequency_hz < M::BEEP_MIN_HZ || frequency_hz > M::BEEP_MAX_HZ
        {
            return Err(SmuError::InvalidArgument(format!(
                "Beep frequency must be between {} and {} Hz, got {}",
                M::BEEP_MIN_HZ,
                M::BEEP_MAX_HZ,
                frequency_hz
            )));
        }
        if !duration_s.is_finite() || duration_s < 0.0 || duration_s > M::BEEP_MAX_SECONDS {
            return Err(SmuError::InvalidArgument(format!(
                "Beep duration must be between 0 and {} s, got {}",
                M::BEEP_MAX_SECONDS,
                duration_s
            )));
        }

        self.write(Command::Beep {
            frequency_hz,
            duration_s,
        })
        .await
    }

    /// Source settings and measurements in one pass
    ///
    /// Each value is its own query; another task may act between them.
    pub async fn readings(&self) -> Result<Readings> {
        Ok(Readings {
            output: self.output().await?,
            source_voltage: self.source_voltage().await?,
            measured_voltage: self.measure_voltage().await?,
            current_limit: self.current_limit().await?,
            measured_current: self.measure_current().await?,
        })
    }

    /// Close the link; the proxy is unusable afterwards
    pub async fn close(&self) -> Result<()> {
        self.channel.close().await
    }
}
