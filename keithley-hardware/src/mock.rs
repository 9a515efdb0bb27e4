//! Simulated source meter
//!
//! An in-memory [`Transport`] that speaks the same SCPI subset as the
//! Keithley 2470 driver. Used by `keithleyctl --mock` and by tests that need
//! to check the exact command sequence sent to the instrument.
//!
//! The simulator is inspected and steered through a cloneable
//! [`SimulatorHandle`], which stays valid after the instrument itself has
//! been boxed into a channel.

use crate::transport::{link_closed, Transport};
use async_trait::async_trait;
use keithley_core::{OutputState, Result, SmuError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Identity the simulator reports by default
pub const SIMULATED_IDENTITY: &str = "KEITHLEY INSTRUMENTS,MODEL 2470,SIM00001,1.7.5b";

/// Load resistance used to derive the measured current
const DEFAULT_LOAD_OHMS: f64 = 1.0e9;

#[derive(Debug)]
struct SimState {
    identity: String,
    output: OutputState,
    source_voltage: f64,
    current_limit: f64,
    load_ohms: f64,
    voltage_clamp: Option<f64>,
    commands: Vec<String>,
    beeps: Vec<(f64, f64)>,
    writes_before_failure: Option<usize>,
    interleavings: usize,
    rejected: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            identity: SIMULATED_IDENTITY.to_string(),
            // Power-on state of a real unit is unknown to the driver; start "dirty"
            output: OutputState::On,
            source_voltage: -5.0,
            current_limit: 1.05e-4,
            load_ohms: DEFAULT_LOAD_OHMS,
            voltage_clamp: None,
            commands: Vec::new(),
            beeps: Vec::new(),
            writes_before_failure: None,
            interleavings: 0,
            rejected: 0,
        }
    }
}

impl SimState {
    fn measured_voltage(&self) -> f64 {
        match self.output {
            OutputState::On => self.source_voltage,
            OutputState::Off => 0.0,
        }
    }

    fn measured_current(&self) -> f64 {
        match self.output {
            OutputState::On => (self.source_voltage / self.load_ohms)
                .clamp(-self.current_limit, self.current_limit),
            OutputState::Off => 0.0,
        }
    }

    /// Apply one command; queries return their answer
    fn execute(&mut self, command: &str) -> Option<String> {
        let upper = command.trim().to_uppercase();

        match upper.as_str() {
            "*IDN?" => return Some(self.identity.clone()),
            ":OUTPUT:STATE?" => {
                let code = match self.output {
                    OutputState::On => "1",
                    OutputState::Off => "0",
                };
                return Some(code.to_string());
            }
            ":SOUR:VOLT?" => return Some(format_reading(self.source_voltage)),
            ":SOUR:VOLT:ILIM?" => return Some(format_reading(self.current_limit)),
            ":MEASURE:VOLT?" => return Some(format_reading(self.measured_voltage())),
            ":MEASURE:CURRENT?" => return Some(format_reading(self.measured_current())),
            ":OUTPUT ON" => {
                self.output = OutputState::On;
                return None;
            }
            ":OUTPUT OFF" => {
                self.output = OutputState::Off;
                return None;
            }
            _ => {}
        }

        if let Some(arg) = upper.strip_prefix(":SOURCE:VOLT:LEV ") {
            match arg.trim().parse::<f64>() {
                Ok(volts) => {
                    self.source_voltage = match self.voltage_clamp {
                        Some(limit) => volts.clamp(-limit, limit),
                        None => volts,
                    };
                }
                Err(_) => self.reject(command),
            }
        } else if let Some(arg) = upper.strip_prefix(":SOURCE:VOLT:ILIM ") {
            match arg.trim().parse::<f64>() {
                Ok(amperes) => self.current_limit = amperes,
                Err(_) => self.reject(command),
            }
        } else if let Some(args) = upper.strip_prefix(":SYSTEM:BEEPER ") {
            let parsed: Vec<std::result::Result<f64, _>> =
                args.split(',').map(|a| a.trim().parse::<f64>()).collect();
            match parsed.as_slice() {
                [Ok(frequency), Ok(duration)] => self.beeps.push((*frequency, *duration)),
                _ => self.reject(command),
            }
        } else {
            // A real unit pushes -113 "Undefined header" and sends nothing back
            self.reject(command);
        }

        None
    }

    fn reject(&mut self, command: &str) {
        warn!("Simulator rejected command: {}", command);
        self.rejected += 1;
    }
}

fn format_reading(value: f64) -> String {
    format!("{:.6E}", value)
}

/// Inspection and fault-injection handle for a [`SimulatedInstrument`]
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every command received, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Commands received that carry no response
    pub fn writes(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .filter(|c| !c.trim_end().ends_with('?'))
            .cloned()
            .collect()
    }

    /// Forget the command history
    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Programmed source voltage
    pub fn source_voltage(&self) -> f64 {
        self.state().source_voltage
    }

    /// Force the programmed source voltage, bypassing the command path
    pub fn set_source_voltage(&self, volts: f64) {
        self.state().source_voltage = volts;
    }

    /// Output relay state
    pub fn output(&self) -> OutputState {
        self.state().output
    }

    /// Force the output relay state, bypassing the command path
    pub fn set_output(&self, output: OutputState) {
        self.state().output = output;
    }

    /// Current compliance limit
    pub fn current_limit(&self) -> f64 {
        self.state().current_limit
    }

    /// Beeps played, as `(frequency_hz, duration_s)`
    pub fn beeps(&self) -> Vec<(f64, f64)> {
        self.state().beeps.clone()
    }

    /// Clamp every programmed voltage to `±limit`, like a front-panel source limit
    pub fn set_voltage_clamp(&self, limit: Option<f64>) {
        self.state().voltage_clamp = limit.map(f64::abs);
    }

    /// Let `count` more commands through, then fail every send with a link error
    pub fn fail_after(&self, count: usize) {
        self.state().writes_before_failure = Some(count);
    }

    /// Number of commands sent while a query answer was still unread
    pub fn interleavings(&self) -> usize {
        self.state().interleavings
    }

    /// Number of commands the simulator did not understand
    pub fn rejected(&self) -> usize {
        self.state().rejected
    }
}

/// In-memory Keithley 2470
#[derive(Debug)]
pub struct SimulatedInstrument {
    state: Arc<Mutex<SimState>>,
    pending: VecDeque<String>,
    closed: bool,
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedInstrument {
    /// Create a simulator reporting [`SIMULATED_IDENTITY`]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    /// Create a simulator reporting a different `*IDN?` answer
    pub fn with_identity(identity: impl Into<String>) -> Self {
        let sim = Self::new();
        sim.handle().state().identity = identity.into();
        sim
    }

    /// Inspection handle sharing this simulator's state
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for SimulatedInstrument {
    async fn send(&mut self, message: &str) -> Result<()> {
        if self.closed {
            return Err(link_closed());
        }

        let answer = {
            let mut state = self.state();

            if let Some(remaining) = state.writes_before_failure {
                if remaining == 0 {
                    return Err(SmuError::Link(format!(
                        "Simulated link failure on '{}'",
                        message
                    )));
                }
                state.writes_before_failure = Some(remaining - 1);
            }

            if !self.pending.is_empty() {
                state.interleavings += 1;
            }
            state.commands.push(message.to_string());
            state.execute(message)
        };

        debug!("SIM TX: {}", message);
        if let Some(answer) = answer {
            self.pending.push_back(answer);
        }

        // Give other tasks a chance to run between a query's write and read
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String> {
        if self.closed {
            return Err(link_closed());
        }
        tokio::task::yield_now().await;

        self.pending
            .pop_front()
            .ok_or_else(|| SmuError::Timeout("Simulator has no pending response".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }

    fn resource(&self) -> Option<&str> {
        Some("SIM::INSTR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn query(sim: &mut SimulatedInstrument, command: &str) -> String {
        sim.send(command).await.unwrap();
        sim.receive().await.unwrap()
    }

    #[tokio::test]
    async fn test_identity() {
        let mut sim = SimulatedInstrument::new();
        assert_eq!(query(&mut sim, "*IDN?").await, SIMULATED_IDENTITY);
    }

    #[tokio::test]
    async fn test_source_voltage_roundtrip() {
        let mut sim = SimulatedInstrument::new();
        sim.send(":SOURCE:VOLT:LEV -12.5").await.unwrap();

        let answer = query(&mut sim, ":SOUR:VOLT?").await;
        assert_eq!(answer.parse::<f64>().unwrap(), -12.5);
        assert_eq!(sim.handle().source_voltage(), -12.5);
    }

    #[tokio::test]
    async fn test_output_state_codes() {
        let mut sim = SimulatedInstrument::new();
        sim.send(":OUTPUT OFF").await.unwrap();
        assert_eq!(query(&mut sim, ":OUTPUT:STATE?").await, "0");
        sim.send(":OUTPUT ON").await.unwrap();
        assert_eq!(query(&mut sim, ":OUTPUT:STATE?").await, "1");
    }

    #[tokio::test]
    async fn test_measurements_follow_output() {
        let mut sim = SimulatedInstrument::new();
        sim.send(":SOURCE:VOLT:LEV 100").await.unwrap();
        sim.send(":OUTPUT OFF").await.unwrap();
        let volts: f64 = query(&mut sim, ":MEASURE:VOLT?").await.parse().unwrap();
        assert_eq!(volts, 0.0);

        sim.send(":OUTPUT ON").await.unwrap();
        let volts: f64 = query(&mut sim, ":MEASURE:VOLT?").await.parse().unwrap();
        let amps: f64 = query(&mut sim, ":MEASURE:CURRENT?").await.parse().unwrap();
        assert_eq!(volts, 100.0);
        assert!((amps - 1.0e-7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_beeper_is_recorded() {
        let mut sim = SimulatedInstrument::new();
        sim.send(":SYSTEM:BEEPER 2222, 0.5").await.unwrap();
        assert_eq!(sim.handle().beeps(), vec![(2222.0, 0.5)]);
    }

    #[tokio::test]
    async fn test_unknown_query_times_out() {
        let mut sim = SimulatedInstrument::new();
        sim.send(":SOUR:CURR?").await.unwrap();
        assert!(matches!(sim.receive().await, Err(SmuError::Timeout(_))));
        assert_eq!(sim.handle().rejected(), 1);
    }

    #[tokio::test]
    async fn test_voltage_clamp() {
        let mut sim = SimulatedInstrument::new();
        sim.handle().set_voltage_clamp(Some(20.0));
        sim.send(":SOURCE:VOLT:LEV -50").await.unwrap();
        assert_eq!(sim.handle().source_voltage(), -20.0);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let mut sim = SimulatedInstrument::new();
        sim.handle().fail_after(1);
        assert!(sim.send(":OUTPUT OFF").await.is_ok());
        assert!(matches!(
            sim.send(":OUTPUT ON").await,
            Err(SmuError::Link(_))
        ));
        // The failed command never reached the instrument
        assert_eq!(sim.handle().output(), OutputState::Off);
    }

    #[tokio::test]
    async fn test_unread_answer_counts_as_interleaving() {
        let mut sim = SimulatedInstrument::new();
        sim.send("*IDN?").await.unwrap();
        sim.send(":OUTPUT OFF").await.unwrap();
        assert_eq!(sim.handle().interleavings(), 1);
    }

    #[tokio::test]
    async fn test_closed_simulator_rejects_io() {
        let mut sim = SimulatedInstrument::new();
        sim.close().await.unwrap();
        assert!(matches!(sim.send("*IDN?").await, Err(SmuError::Link(_))));
    }

    #[tokio::test]
    async fn test_writes_filter() {
        let mut sim = SimulatedInstrument::new();
        sim.send(":OUTPUT OFF").await.unwrap();
        let _ = query(&mut sim, ":OUTPUT:STATE?").await;
        assert_eq!(sim.handle().writes(), vec![":OUTPUT OFF"]);
        assert_eq!(sim.handle().commands().len(), 2);
    }
}
