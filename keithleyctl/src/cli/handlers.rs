//! Command execution handlers
//!
//! Every handler that touches the instrument runs inside
//! [`SafetyController::run_guarded`], so the source is ramped to 0 V and
//! switched off however the command ends.

use anyhow::{Context, Result};
use keithley_core::{OutputState, SmuError, StaticConfig};
use keithley_hardware::{available_ports, connect, SafetyController};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::EffectiveConfig;
use crate::format::{
    format_config, format_hold_sample, format_info, format_ports, format_success, InfoReport,
};
use crate::shutdown::StopSignal;

use super::commands::*;

/// Parameters of a `hold` session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldOptions {
    /// Requested voltage; the sign is replaced by the configured polarity
    pub voltage: f64,
    /// Time between two readings
    pub interval: Duration,
    /// Stop on its own after this long
    pub duration: Option<Duration>,
}

impl HoldOptions {
    /// Validate command-line values
    pub fn new(voltage: f64, interval_s: f64, duration_s: Option<f64>) -> Result<Self> {
        if !voltage.is_finite() {
            anyhow::bail!("Voltage must be a finite number, got {}", voltage);
        }
        if !interval_s.is_finite() || interval_s <= 0.0 {
            anyhow::bail!("Interval must be a positive number of seconds, got {}", interval_s);
        }
        let duration = match duration_s {
            Some(d) if !d.is_finite() || d < 0.0 => {
                anyhow::bail!("Duration must be a non-negative number of seconds, got {}", d)
            }
            Some(d) => Some(Duration::from_secs_f64(d)),
            None => None,
        };

        Ok(Self {
            voltage,
            interval: Duration::from_secs_f64(interval_s),
            duration,
        })
    }
}

async fn open(config: &StaticConfig) -> Result<SafetyController> {
    connect(config).await.with_context(|| {
        format!(
            "Cannot connect to instrument at {}",
            config.connection.resource
        )
    })
}

/// Handle info command
pub async fn handle_info(config: &StaticConfig, format: &OutputFormat) -> Result<()> {
    let controller = open(config).await?;
    let resource = config.resource()?.to_string();

    let report = controller
        .run_guarded(|c| {
            Box::pin(async move {
                let ramp = c.ramp_parameters();
                Ok::<_, SmuError>(InfoReport {
                    resource,
                    identity: c.proxy().identity().clone(),
                    polarity: c.polarity(),
                    slew_rate: ramp.slew_rate(),
                    volt_step: ramp.volt_step(),
                    readings: c.proxy().readings().await?,
                })
            })
        })
        .await?;

    println!("{}", format_info(&report, &format.into())?);
    Ok(())
}

/// Handle beep command
pub async fn handle_beep(
    config: &StaticConfig,
    frequency: f64,
    duration: f64,
    format: &OutputFormat,
) -> Result<()> {
    let controller = open(config).await?;

    controller
        .run_guarded(|c| Box::pin(async move { c.proxy().beep(frequency, duration).await }))
        .await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "frequency_hz": frequency, "duration_s": duration })
            );
        }
        OutputFormat::Table => {
            println!(
                "{}",
                format_success(&format!("Beeped at {} Hz for {} s", frequency, duration))
            );
        }
    }

    Ok(())
}

/// Handle hold command
pub async fn handle_hold(
    config: &StaticConfig,
    options: HoldOptions,
    stop: Arc<StopSignal>,
    format: &OutputFormat,
) -> Result<()> {
    let controller = open(config).await?;
    let sample_format: crate::format::OutputFormat = format.into();

    controller
        .run_guarded(|c| Box::pin(hold_session(c, options, stop, sample_format)))
        .await?;

    if let OutputFormat::Table = format {
        println!("{}", format_success("Source at 0 V, output off"));
    }
    Ok(())
}

/// Switch on, ramp to the requested voltage, and poll until stopped
///
/// Readings are best-effort: a failed poll is logged and the hold goes on.
/// A stop request during the ramp abandons it; the caller's shutdown takes
/// over from the last written voltage.
pub async fn hold_session(
    controller: &SafetyController,
    options: HoldOptions,
    stop: Arc<StopSignal>,
    format: crate::format::OutputFormat,
) -> keithley_core::Result<()> {
    if stop.is_raised() {
        return Ok(());
    }

    controller.set_output(OutputState::On).await?;

    let target = controller.polarity().coerce(options.voltage);
    info!("Ramping to {} V", target);
    match controller
        .set_source_voltage_cancellable(options.voltage, stop.flag())
        .await
    {
        Err(SmuError::RampCancelled) => {
            warn!("Ramp to {} V interrupted", target);
            return Ok(());
        }
        other => other?,
    }
    info!("Holding {} V", target);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.wait() => break,
            _ = ticker.tick() => {}
        }

        match controller.proxy().readings().await {
            Ok(readings) => match format_hold_sample(started.elapsed(), &readings, &format) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to format readings: {}", e),
            },
            Err(e) => warn!("Failed to read measurements: {}", e),
        }

        if options.duration.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Hold duration reached");
            break;
        }
    }

    Ok(())
}

/// Handle ports command
pub fn handle_ports(format: &OutputFormat) -> Result<()> {
    let ports = available_ports()?;
    println!("{}", format_ports(&ports, &format.into())?);
    Ok(())
}

/// Handle config commands
pub fn handle_config(
    command: ConfigCommands,
    effective: &EffectiveConfig,
    format: &OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!(
                "{}",
                format_config(&effective.path, &effective.config, &format.into())?
            );
        }
        ConfigCommands::Path => {
            println!("{}", effective.path.display());
        }
    }

    Ok(())
}
