//! Keithley CLI Library
//!
//! Command definitions, configuration merging, output formatting, and
//! interrupt handling for the `keithleyctl` operator tool. The binary in
//! `main.rs` only wires these together.

// Internal CLI implementation - not part of public API
#[doc(hidden)]
pub mod cli;

/// Configuration merging (file, environment, flags).
pub mod config;

// Internal formatting functions - not part of public API
#[doc(hidden)]
pub mod format;

/// Ctrl+C / SIGTERM handling.
pub mod shutdown;
