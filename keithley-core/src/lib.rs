//! Keithley Core Library
//!
//! Shared types, errors, instrument descriptions, and configuration for safe
//! source-meter control. Used by the hardware crate and the operator CLI.

pub mod config;
pub mod error;
pub mod instrument;
pub mod resource;
pub mod types;

// Re-export commonly used types
pub use config::{default_config_path, resolve_config_path, StaticConfig};
pub use error::*;
pub use instrument::*;
pub use resource::*;
pub use types::*;
