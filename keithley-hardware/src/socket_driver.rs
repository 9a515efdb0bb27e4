//! Raw SCPI socket driver
//!
//! The 2470's LAN interface accepts newline-terminated SCPI on TCP port 5025.

use crate::line_buffer::LineBuffer;
use crate::transport::{link_closed, Transport};
use async_trait::async_trait;
use keithley_core::{Result, SmuError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// TCP driver for instrument communication
pub struct SocketDriver {
    stream: Option<TcpStream>,
    address: String,
    timeout_duration: Duration,
    buffer: LineBuffer,
}

impl SocketDriver {
    /// Connect to `host:port`
    ///
    /// # Arguments
    /// * `host` - Instrument host name or IP address
    /// * `port` - SCPI socket port (5025 on the 2470)
    /// * `timeout_ms` - Timeout in milliseconds for connect/read/write
    pub async fn connect(host: &str, port: u16, timeout_ms: u64) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        let timeout_duration = Duration::from_millis(timeout_ms);
        debug!("Connecting to SCPI socket {}", address);

        let stream = timeout(timeout_duration, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                error!("Connect to {} timed out", address);
                SmuError::Timeout(format!("Connect to {} timed out", address))
            })?
            .map_err(|e| {
                error!("Failed to connect to {}: {}", address, e);
                SmuError::Link(format!("Failed to connect to {}: {}", address, e))
            })?;

        // Commands are tiny; do not wait to coalesce them
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", address, e);
        }

        debug!("SCPI socket connected");

        Ok(Self {
            stream: Some(stream),
            address,
            timeout_duration,
            buffer: LineBuffer::default(),
        })
    }
}

#[async_trait]
impl Transport for SocketDriver {
    async fn send(&mut self, message: &str) -> Result<()> {
        let line = format!("{}\n", message);
        let timeout_duration = self.timeout_duration;
        let stream = self.stream.as_mut().ok_or_else(link_closed)?;

        timeout(timeout_duration, stream.write_all(line.as_bytes()))
            .await
            .map_err(|_| SmuError::Timeout("Write operation timed out".to_string()))?
            .map_err(|e| {
                error!("Write failed: {}", e);
                SmuError::Link(format!("Write failed: {}", e))
            })
    }

    async fn receive(&mut self) -> Result<String> {
        let stream = self.stream.as_mut().ok_or_else(link_closed)?;
        self.buffer.read_line(stream, self.timeout_duration).await
    }

    async fn clear_input(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(link_closed)?;
        self.buffer.resync(stream, self.timeout_duration).await
    }

    async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Socket shutdown on {} failed: {}", self.address, e);
            }
            debug!("SCPI socket {} closed", self.address);
        }
        Ok(())
    }

    fn resource(&self) -> Option<&str> {
        Some(&self.address)
    }
}
