//! Operator interrupt handling
//!
//! Ctrl+C and SIGTERM never kill a session outright. They raise a
//! [`StopSignal`]; the running session notices it, stops ramping or polling,
//! and the safe shutdown path brings the source back to 0 V.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};

/// One-shot stop request shared between the signal watcher and a session
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Create a signal that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; later calls have no further effect
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether a stop was requested
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Flag view, for ramps that check it between steps
    pub fn flag(&self) -> &AtomicBool {
        &self.raised
    }

    /// Wait until a stop is requested
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, ramping down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, ramping down...");
        },
    }
}

/// Raise `stop` when the process is interrupted
pub fn watch_signals(stop: Arc<StopSignal>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.raise();
    })
}
