//! Serial driver for RS-232 instrument links
//!
//! Provides async line-oriented serial I/O with the source meter.

use crate::line_buffer::LineBuffer;
use crate::transport::{link_closed, Transport};
use async_trait::async_trait;
use keithley_core::{DefaultInstrument, InstrumentModel, Result, SmuError};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, warn};

/// Serial driver for instrument communication
pub struct SerialDriver<M: InstrumentModel = DefaultInstrument> {
    port: Option<SerialStream>,
    port_path: String,
    terminator: String,
    timeout_duration: Duration,
    buffer: LineBuffer,
    _model: PhantomData<M>,
}

impl<M: InstrumentModel> SerialDriver<M> {
    /// Open a serial link
    ///
    /// # Arguments
    /// * `port_path` - Path to the serial device (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Line speed; `None` uses the instrument's default
    /// * `timeout_ms` - Timeout in milliseconds for read/write operations
    pub fn new(port_path: &str, baud_rate: Option<u32>, timeout_ms: u64) -> Result<Self> {
        let baud_rate = baud_rate.unwrap_or(M::BAUD_RATE);
        debug!("Opening serial port: {} at {} baud", port_path, baud_rate);

        let port = tokio_serial::new(port_path, baud_rate)
            .timeout(Duration::from_millis(timeout_ms))
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", port_path, e);
                SmuError::Link(format!("Failed to open serial port {}: {}", port_path, e))
            })?;

        // Drop anything a previous session left unread
        if let Err(e) = port.clear(tokio_serial::ClearBuffer::All) {
            warn!("Failed to clear serial buffers on {}: {}", port_path, e);
        }

        debug!("Serial port opened successfully");

        Ok(Self {
            port: Some(port),
            port_path: port_path.to_string(),
            terminator: "\n".to_string(),
            timeout_duration: Duration::from_millis(timeout_ms),
            buffer: LineBuffer::default(),
            _model: PhantomData,
        })
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream> {
        self.port.as_mut().ok_or_else(link_closed)
    }
}

#[async_trait]
impl<M: InstrumentModel> Transport for SerialDriver<M> {
    async fn send(&mut self, message: &str) -> Result<()> {
        let full_command = format!("{}{}", message, self.terminator);
        let timeout_duration = self.timeout_duration;
        let port = self.port_mut()?;

        timeout(timeout_duration, port.write_all(full_command.as_bytes()))
            .await
            .map_err(|_| {
                error!("Write timeout");
                SmuError::Timeout("Write operation timed out".to_string())
            })?
            .map_err(|e| {
                error!("Write failed: {}", e);
                SmuError::Link(format!("Write failed: {}", e))
            })?;

        // Flush to ensure data is sent
        timeout(timeout_duration, port.flush())
            .await
            .map_err(|_| SmuError::Timeout("Flush operation timed out".to_string()))?
            .map_err(|e| SmuError::Link(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String> {
        let port = self.port.as_mut().ok_or_else(link_closed)?;
        self.buffer.read_line(port, self.timeout_duration).await
    }

    async fn clear_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(link_closed)?;
        self.buffer.resync(port, self.timeout_duration).await?;

        port.clear(tokio_serial::ClearBuffer::Input).map_err(|e| {
            warn!("Failed to clear input buffer: {}", e);
            SmuError::Link(format!("Failed to clear buffer: {}", e))
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        if self.port.take().is_some() {
            debug!("Serial port {} closed", self.port_path);
        }
        Ok(())
    }

    fn resource(&self) -> Option<&str> {
        Some(&self.port_path)
    }
}

/// List serial ports that could host an instrument
pub fn available_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|e| {
        error!("Failed to enumerate serial ports: {}", e);
        SmuError::Link(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
