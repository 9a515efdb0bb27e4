//! Output formatting utilities for the CLI
//!
//! Provides table and JSON formatting with colors.

use anyhow::Result;
use colored::*;
use keithley_core::{Identity, OutputState, Polarity, Readings, StaticConfig};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Everything `info` reports about a connected instrument
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub resource: String,
    pub identity: Identity,
    pub polarity: Polarity,
    pub slew_rate: f64,
    pub volt_step: f64,
    pub readings: Readings,
}

/// One `hold` poll result
#[derive(Debug, Clone, Serialize)]
pub struct HoldSample {
    /// Seconds since the hold started
    pub elapsed: f64,
    #[serde(flatten)]
    pub readings: Readings,
}

fn colored_output(state: OutputState) -> ColoredString {
    match state {
        OutputState::On => "ON".red().bold(),
        OutputState::Off => "OFF".green(),
    }
}

/// Format instrument info
pub fn format_info(report: &InfoReport, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            let identity = &report.identity;
            let mut output = String::new();
            output.push_str(&"Keithley Source Meter".bold().to_string());
            output.push('\n');
            output.push_str(&format!("Resource: {}", report.resource.cyan()));
            output.push('\n');
            output.push_str(&format!(
                "Model: {} {}",
                identity.manufacturer().unwrap_or("?").cyan(),
                identity.model().unwrap_or("?").cyan()
            ));

            if let Some(serial) = identity.serial_number() {
                output.push('\n');
                output.push_str(&format!("Serial: {}", serial.cyan()));
            }

            if let Some(firmware) = identity.firmware() {
                output.push('\n');
                output.push_str(&format!("Firmware: {}", firmware.cyan()));
            }

            output.push('\n');
            output.push_str(&format!(
                "Safety: {} polarity, {} V/s, {} V steps",
                report.polarity.to_string().yellow(),
                report.slew_rate,
                report.volt_step
            ));
            output.push('\n');
            output.push_str(&format_readings(&report.readings, format)?);

            Ok(output)
        }
    }
}

/// Format a readings snapshot
pub fn format_readings(readings: &Readings, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(readings)?),
        OutputFormat::Table => {
            #[derive(Tabled)]
            struct ReadingRow {
                #[tabled(rename = "Quantity")]
                quantity: &'static str,
                #[tabled(rename = "Value")]
                value: String,
            }

            let rows = vec![
                ReadingRow {
                    quantity: "Output",
                    value: colored_output(readings.output).to_string(),
                },
                ReadingRow {
                    quantity: "Source voltage",
                    value: format!("{:.3} V", readings.source_voltage),
                },
                ReadingRow {
                    quantity: "Measured voltage",
                    value: format!("{:.3} V", readings.measured_voltage),
                },
                ReadingRow {
                    quantity: "Current limit",
                    value: format!("{:.3e} A", readings.current_limit),
                },
                ReadingRow {
                    quantity: "Measured current",
                    value: format!("{:.3e} A", readings.measured_current),
                },
            ];

            let table = Table::new(rows).with(Style::rounded()).to_string();
            Ok(format!("{}\n{}", "Readings:".bold(), table))
        }
    }
}

/// Format one `hold` poll as a single line
pub fn format_hold_sample(
    elapsed: Duration,
    readings: &Readings,
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(&HoldSample {
            elapsed: elapsed.as_secs_f64(),
            readings: *readings,
        })?),
        OutputFormat::Table => Ok(format!(
            "[{:>8.1} s] output {}  {:>10.3} V  {:>11.3e} A",
            elapsed.as_secs_f64(),
            colored_output(readings.output),
            readings.measured_voltage,
            readings.measured_current
        )),
    }
}

/// Format the list of serial ports
pub fn format_ports(ports: &[String], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(ports)?),
        OutputFormat::Table => {
            if ports.is_empty() {
                return Ok("No serial ports found".dimmed().to_string());
            }

            #[derive(Tabled)]
            struct PortRow {
                #[tabled(rename = "Serial Port")]
                port: String,
            }

            let rows: Vec<PortRow> = ports.iter().map(|p| PortRow { port: p.clone() }).collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

/// Format the effective configuration
pub fn format_config(path: &Path, config: &StaticConfig, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&serde_json::json!({
            "path": path.display().to_string(),
            "config": config,
        }))?),
        OutputFormat::Table => {
            let source = if path.exists() {
                path.display().to_string().cyan()
            } else {
                format!("{} (not found, using defaults)", path.display()).dimmed()
            };
            Ok(format!(
                "{} {}\n\n{}",
                "Configuration:".bold(),
                source,
                config.to_toml()?
            ))
        }
    }
}

/// Format success message
pub fn format_success(message: &str) -> String {
    format!("{} {}", "✓".green().bold(), message)
}
