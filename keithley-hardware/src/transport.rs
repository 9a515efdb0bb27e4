//! Serialized command channel
//!
//! Every byte exchanged with the instrument goes through one [`Channel`].
//! The channel owns the link driver behind a single async mutex, so writes,
//! reads, and queries from any number of tasks share one exclusion domain: a
//! query's write and read can never be split by another caller.

use async_trait::async_trait;
use keithley_core::{Result, SmuError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Line-oriented command/response link
///
/// This trait lets the channel and everything above it run against real
/// hardware or against in-memory instruments in tests.
#[async_trait]
pub trait Transport: Send {
    /// Send one command line (the driver appends its terminator)
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Wait for one response line, terminator stripped
    async fn receive(&mut self) -> Result<String>;

    /// Discard input left over from earlier exchanges
    ///
    /// Called before every command the channel sends, so a reply that
    /// arrived after its query timed out is never read as the answer to a
    /// later query.
    async fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Tear the link down; later calls fail
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// The resource this link was opened with
    fn resource(&self) -> Option<&str> {
        None
    }
}

/// Shared handle to one instrument link
///
/// Cloning the channel clones the handle, not the link: all clones contend
/// for the same lock. Waiters are queued first-in first-out by
/// `tokio::sync::Mutex`.
pub struct Channel<T: Transport + ?Sized = dyn Transport> {
    link: Arc<Mutex<Box<T>>>,
}

impl<T: Transport + ?Sized> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
        }
    }
}

impl Channel {
    /// Create a channel over a type-erased transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            link: Arc::new(Mutex::new(transport)),
        }
    }
}

impl<T: Transport + ?Sized> Channel<T> {
    /// Create a channel over a concrete transport
    ///
    /// Useful in tests that need to reach the transport afterwards through
    /// [`Channel::with_transport`].
    pub fn from_transport(transport: Box<T>) -> Self {
        Self {
            link: Arc::new(Mutex::new(transport)),
        }
    }

    /// Send a command that produces no response
    pub async fn write(&self, command: &str) -> Result<()> {
        let mut link = self.link.lock().await;
        link.clear_input().await?;
        trace!("TX: {}", command);
        link.send(command).await
    }

    /// Read one pending response
    pub async fn read(&self) -> Result<String> {
        let mut link = self.link.lock().await;
        let response = link.receive().await?;
        trace!("RX: {}", response);
        Ok(response)
    }

    /// Send a command and read its response as one transaction
    pub async fn query(&self, command: &str) -> Result<String> {
        let mut link = self.link.lock().await;
        link.clear_input().await?;
        trace!("TX: {}", command);
        link.send(command).await?;
        let response = link.receive().await?;
        trace!("RX: {}", response);
        Ok(response)
    }

    /// Close the underlying link
    ///
    /// Waits for any in-flight transaction to finish first.
    pub async fn close(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        debug!(
            "Closing link {}",
            link.resource().unwrap_or("<unnamed>")
        );
        link.close().await
    }

    /// Run `f` with exclusive access to the transport
    pub async fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut link = self.link.lock().await;
        f(&mut **link)
    }
}

/// Error returned by drivers once [`Transport::close`] has run
pub(crate) fn link_closed() -> SmuError {
    SmuError::Link("Link is closed".to_string())
}
