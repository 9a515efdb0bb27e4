//! keithley-hardware
//!
//! Instrument I/O for the Keithley 2470: byte links (serial, raw socket,
//! simulated), the serialized command channel, the typed source-meter proxy,
//! and the ramping safety controller built on top of it.
//!
//! Public API:
//! - `transport::Channel`: single exclusion domain over one link
//! - `source_meter::SourceMeter`: typed SCPI proxy
//! - `safety::SafetyController`: polarity and slew-rate enforcement
//! - `connection::connect`: build a controller from `StaticConfig`

pub mod connection;
mod line_buffer;
pub mod mock;
pub mod safety;
pub mod serial_driver;
pub mod socket_driver;
pub mod source_meter;
pub mod transport;

pub use connection::{connect, open_transport};
pub use mock::{SimulatedInstrument, SimulatorHandle};
pub use safety::{SafetyController, SourceControl};
pub use serial_driver::{available_ports, SerialDriver};
pub use socket_driver::SocketDriver;
pub use source_meter::{Command, SourceMeter};
pub use transport::{Channel, Transport};
