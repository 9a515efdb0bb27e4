//! CLI command and subcommand definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keithley 2470 safe-control CLI
#[derive(Parser, Debug)]
#[command(name = "keithleyctl")]
#[command(version, about = "Slew-limited Keithley 2470 control", long_about = None)]
pub struct Cli {
    /// Config file path (default: ~/.config/keithley/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Instrument resource, e.g. /dev/ttyUSB0 or TCPIP0::10.0.0.5::5025::SOCKET
    /// (overrides config file and KEITHLEY_RESOURCE)
    #[arg(short, long, global = true)]
    pub resource: Option<String>,

    /// Use the simulated instrument instead of hardware
    #[arg(long, global = true)]
    pub mock: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty table output
    Table,
    /// JSON output
    Json,
}

impl From<&OutputFormat> for crate::format::OutputFormat {
    fn from(format: &OutputFormat) -> Self {
        match format {
            OutputFormat::Table => crate::format::OutputFormat::Table,
            OutputFormat::Json => crate::format::OutputFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show instrument identity and current readings
    Info,

    /// Sound the front-panel beeper
    Beep {
        /// Frequency in hertz (200-5000)
        #[arg(long, default_value_t = keithley_hardware::source_meter::DEFAULT_BEEP_HZ)]
        frequency: f64,

        /// Duration in seconds (at most 1)
        #[arg(long, default_value_t = keithley_hardware::source_meter::DEFAULT_BEEP_SECONDS)]
        duration: f64,
    },

    /// Turn the output on, ramp to a voltage, and hold it until interrupted
    Hold {
        /// Target voltage; the sign is set by the configured polarity
        #[arg(allow_negative_numbers = true)]
        voltage: f64,

        /// Seconds between two readings
        #[arg(long, default_value_t = 1.0)]
        interval: f64,

        /// Current compliance in amperes (overrides config file)
        #[arg(long)]
        current_limit: Option<f64>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration: Option<f64>,
    },

    /// List serial ports that could host an instrument
    Ports,

    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the merged configuration (file, environment, flags)
    Show,
    /// Print the configuration file path in use
    Path,
}
