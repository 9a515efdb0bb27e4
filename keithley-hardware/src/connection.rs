//! Session setup from configuration
//!
//! Opens the link named by the configured resource, brings the instrument
//! to a safe state, and wraps it in a [`SafetyController`].

use crate::mock::SimulatedInstrument;
use crate::safety::SafetyController;
use crate::serial_driver::SerialDriver;
use crate::socket_driver::SocketDriver;
use crate::source_meter::SourceMeter;
use crate::transport::Transport;
use keithley_core::{DefaultInstrument, Resource, Result, StaticConfig};
use tracing::{info, warn};

/// Open the byte link for `resource`
pub async fn open_transport(
    resource: &Resource,
    timeout_ms: u64,
    baud_rate: Option<u32>,
) -> Result<Box<dyn Transport>> {
    info!("Opening {}", resource);

    let transport: Box<dyn Transport> = match resource {
        Resource::Serial { path } => Box::new(SerialDriver::<DefaultInstrument>::new(
            path, baud_rate, timeout_ms,
        )?),
        Resource::Socket { host, port } => {
            Box::new(SocketDriver::connect(host, *port, timeout_ms).await?)
        }
        Resource::Simulated => {
            warn!("Using simulated instrument, no hardware will be driven");
            Box::new(SimulatedInstrument::new())
        }
    };

    Ok(transport)
}

/// Connect to the configured instrument
///
/// Applies the configured current limit, if any, once the instrument is in
/// its safe initial state.
pub async fn connect(config: &StaticConfig) -> Result<SafetyController> {
    let resource = config.resource()?;
    let transport = open_transport(
        &resource,
        config.connection.timeout_ms,
        config.connection.baud_rate,
    )
    .await?;

    let meter = SourceMeter::<DefaultInstrument>::connect(transport).await?;

    if let Some(limit) = config.source.current_limit {
        info!("Setting current limit to {} A", limit);
        meter.set_current_limit(limit).await?;
    }

    Ok(SafetyController::new(
        meter,
        config.safety.polarity,
        config.ramp_parameters()?,
    ))
}
