//! Safety Controller - slew-rate-limited voltage control
//!
//! Wraps a source proxy and guarantees that, while the output is on, the
//! programmed voltage never jumps by more than one ramp step and never moves
//! faster than the configured slew rate. Output transitions go through 0 V.
//!
//! The ramp sleeps between steps without holding the link, so measurement
//! polling from other tasks keeps working during a ramp.

use crate::source_meter::SourceMeter;
use async_trait::async_trait;
use keithley_core::{InstrumentModel, OutputState, Polarity, RampParameters, Result, SmuError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Consecutive non-converging ramp iterations tolerated before giving up
pub const STALL_LIMIT: u32 = 3;

/// Raw source operations the controller builds its ramps from
///
/// Implemented by [`SourceMeter`]; tests substitute an in-memory proxy.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Output relay state
    async fn output(&self) -> Result<OutputState>;

    /// Switch the output relay immediately
    async fn set_output_raw(&self, state: OutputState) -> Result<()>;

    /// Programmed source voltage
    async fn source_voltage(&self) -> Result<f64>;

    /// Program the source voltage immediately
    async fn set_source_voltage_raw(&self, volts: f64) -> Result<()>;

    /// Release the underlying link
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<M: InstrumentModel> SourceControl for SourceMeter<M> {
    async fn output(&self) -> Result<OutputState> {
        SourceMeter::output(self).await
    }

    async fn set_output_raw(&self, state: OutputState) -> Result<()> {
        SourceMeter::set_output(self, state).await
    }

    async fn source_voltage(&self) -> Result<f64> {
        SourceMeter::source_voltage(self).await
    }

    async fn set_source_voltage_raw(&self, volts: f64) -> Result<()> {
        SourceMeter::set_source_voltage(self, volts).await
    }

    async fn close(&self) -> Result<()> {
        SourceMeter::close(self).await
    }
}

/// Ramping front end for a source proxy
///
/// Public mutators are serialized among themselves so two ramps never fight
/// over the setpoint; plain reads through [`SafetyController::proxy`] are not
/// affected.
pub struct SafetyController<P: SourceControl = SourceMeter> {
    proxy: P,
    polarity: Polarity,
    ramp: RampParameters,
    ramp_lock: Mutex<()>,
}

impl<P: SourceControl> SafetyController<P> {
    /// Wrap `proxy` with a fixed polarity and ramp limits
    pub fn new(proxy: P, polarity: Polarity, ramp: RampParameters) -> Self {
        info!(
            "Safety controller: {} polarity, {} V/s, {} V steps",
            polarity,
            ramp.slew_rate(),
            ramp.volt_step()
        );
        Self {
            proxy,
            polarity,
            ramp,
            ramp_lock: Mutex::new(()),
        }
    }

    /// Sign forced onto every commanded voltage
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Ramp limits
    pub fn ramp_parameters(&self) -> RampParameters {
        self.ramp
    }

    /// The wrapped proxy, for reads and settings outside the ramp path
    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    /// Move the source voltage to `requested`, respecting polarity and ramp limits
    ///
    /// The sign of `requested` is ignored. With the output off the voltage is
    /// programmed in one write; with the output on it is stepped.
    pub async fn set_source_voltage(&self, requested: f64) -> Result<()> {
        let _guard = self.ramp_lock.lock().await;
        self.apply_voltage(requested, None).await
    }

    /// [`SafetyController::set_source_voltage`], abandoned once `cancel` is set
    ///
    /// The flag is checked before every ramp step. On cancellation the device
    /// keeps the last voltage written and [`SmuError::RampCancelled`] is
    /// returned.
    pub async fn set_source_voltage_cancellable(
        &self,
        requested: f64,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let _guard = self.ramp_lock.lock().await;
        self.apply_voltage(requested, Some(cancel)).await
    }

    /// Switch the output, ramping through 0 V
    ///
    /// Requesting the current state sends nothing.
    pub async fn set_output(&self, requested: OutputState) -> Result<()> {
        let _guard = self.ramp_lock.lock().await;

        let current = self.proxy.output().await?;
        if current == requested {
            debug!("Output already {}", requested);
            return Ok(());
        }

        match requested {
            OutputState::Off => {
                info!("Ramping to 0 V before switching output off");
                self.ramp_to(0.0, None).await?;
                self.proxy.set_output_raw(OutputState::Off).await?;
                info!("Output off");
            }
            OutputState::On => {
                let restore = self.polarity.coerce(self.proxy.source_voltage().await?);
                self.proxy.set_source_voltage_raw(0.0).await?;
                self.proxy.set_output_raw(OutputState::On).await?;
                info!("Output on, ramping back to {} V", restore);
                self.ramp_to(restore, None).await?;
            }
        }

        Ok(())
    }

    /// Bring the source to 0 V, switch the output off, and close the link
    ///
    /// The link is closed even when the ramp fails; the first error is
    /// returned.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down source");

        let safe = async {
            self.set_source_voltage(0.0).await?;
            self.set_output(OutputState::Off).await
        }
        .await;

        if let Err(e) = &safe {
            error!("Safe shutdown failed, source left at last written value: {}", e);
        }

        let closed = self.proxy.close().await;
        if let Err(e) = &closed {
            warn!("Failed to close link: {}", e);
        }

        safe.and(closed)?;
        info!("Source at 0 V, output off, link closed");
        Ok(())
    }

    /// Run `session`, then [`SafetyController::shutdown`] on every exit path
    ///
    /// The session's own error takes precedence over a shutdown error.
    pub async fn run_guarded<F, T>(&self, session: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a Self) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let outcome = session(self).await;
        if let Err(e) = &outcome {
            warn!("Session ended with error: {}", e);
        }

        let shutdown = self.shutdown().await;
        match outcome {
            Ok(value) => shutdown.map(|()| value),
            Err(e) => Err(e),
        }
    }

    async fn apply_voltage(&self, requested: f64, cancel: Option<&AtomicBool>) -> Result<()> {
        if !requested.is_finite() {
            return Err(SmuError::InvalidArgument(format!(
                "Source voltage must be a finite number, got {}",
                requested
            )));
        }

        let target = self.polarity.coerce(requested);
        match self.proxy.output().await? {
            OutputState::Off => {
                debug!("Output off, programming {} V directly", target);
                self.proxy.set_source_voltage_raw(target).await
            }
            OutputState::On => self.ramp_to(target, cancel).await,
        }
    }

    /// Step toward `target`, re-reading the device before every step
    async fn ramp_to(&self, target: f64, cancel: Option<&AtomicBool>) -> Result<()> {
        let step = self.ramp.volt_step();
        let delay = self.ramp.step_delay();
        let mut previous_gap = f64::INFINITY;
        let mut stalled = 0;

        loop {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                warn!("Ramp to {} V cancelled", target);
                return Err(SmuError::RampCancelled);
            }

            let current = self.proxy.source_voltage().await?;
            let gap = (target - current).abs();

            if gap <= step {
                self.proxy.set_source_voltage_raw(target).await?;
                debug!("Ramp reached {} V", target);
                return Ok(());
            }

            if gap < previous_gap {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= STALL_LIMIT {
                    error!(
                        "Ramp stalled at {} V while moving to {} V",
                        current, target
                    );
                    return Err(SmuError::RampStalled {
                        target,
                        last: current,
                    });
                }
            }
            previous_gap = gap;

            let next = current + step.copysign(target - current);
            debug!("Ramp step {} V -> {} V (target {} V)", current, next, target);
            self.proxy.set_source_voltage_raw(next).await?;
            tokio::time::sleep(delay).await;
        }
    }
}
