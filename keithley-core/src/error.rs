//! Error types for safe source-meter control

use thiserror::Error;

/// Core error type for source-meter operations
#[derive(Error, Debug)]
pub enum SmuError {
    /// Transport-level failure (write rejected, link closed, framing)
    #[error("Link error: {0}")]
    Link(String),

    /// The link did not answer within the configured timeout
    #[error("Link timed out: {0}")]
    Timeout(String),

    /// Device disconnected (USB unplugged, socket reset, power cycle)
    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    /// A response arrived but did not decode into the expected type
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Caller-supplied value outside its documented domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The connected device is not the instrument this driver expects
    #[error("Identity mismatch: expected {expected}, device reported '{reported}'")]
    IdentityMismatch { expected: String, reported: String },

    /// The device stopped converging toward the ramp target
    #[error("Ramp stalled at {last} V while moving to {target} V")]
    RampStalled { target: f64, last: f64 },

    /// The ramp was cancelled by the caller between two steps
    #[error("Ramp cancelled")]
    RampCancelled,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for source-meter operations
pub type Result<T> = std::result::Result<T, SmuError>;

/// Coarse classification of [`SmuError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, disconnects, rejected writes
    Link,
    /// Undecodable responses
    Protocol,
    /// Rejected before reaching the link
    InvalidArgument,
    /// Wrong instrument on the other end of the link
    IdentityMismatch,
    /// Ramp aborted without a link failure
    Ramp,
    /// Bad configuration file or values
    Config,
}

impl SmuError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SmuError::Link(_)
            | SmuError::Timeout(_)
            | SmuError::DeviceDisconnected(_)
            | SmuError::Io(_) => ErrorKind::Link,
            SmuError::Protocol(_) => ErrorKind::Protocol,
            SmuError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SmuError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            SmuError::RampStalled { .. } | SmuError::RampCancelled => ErrorKind::Ramp,
            SmuError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this error came from the link rather than from decoding or validation
    pub fn is_link_error(&self) -> bool {
        self.kind() == ErrorKind::Link
    }
}

impl From<toml::de::Error> for SmuError {
    fn from(err: toml::de::Error) -> Self {
        SmuError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: SmuError = io_err.into();

        match err {
            SmuError::Io(ref e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe);
            }
            _ => panic!("Expected Io error"),
        }
        assert!(err.is_link_error());
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
        let err: SmuError = toml_err.into();

        assert!(matches!(err, SmuError::Config(_)));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(SmuError::Link("x".into()).kind(), ErrorKind::Link);
        assert_eq!(SmuError::Timeout("x".into()).kind(), ErrorKind::Link);
        assert_eq!(
            SmuError::DeviceDisconnected("x".into()).kind(),
            ErrorKind::Link
        );
        assert_eq!(SmuError::Protocol("x".into()).kind(), ErrorKind::Protocol);
        assert_eq!(
            SmuError::InvalidArgument("x".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(SmuError::RampCancelled.kind(), ErrorKind::Ramp);
        assert!(!SmuError::Protocol("x".into()).is_link_error());
    }

    #[test]
    fn test_error_display() {
        let err = SmuError::Protocol("expected 0 or 1, got '2'".to_string());
        assert_eq!(
            format!("{}", err),
            "Protocol error: expected 0 or 1, got '2'"
        );

        let err = SmuError::IdentityMismatch {
            expected: "KEITHLEY MODEL 2470".to_string(),
            reported: "RIGOL DP832".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Identity mismatch: expected KEITHLEY MODEL 2470, device reported 'RIGOL DP832'"
        );

        let err = SmuError::RampStalled {
            target: -100.0,
            last: -42.5,
        };
        assert_eq!(
            format!("{}", err),
            "Ramp stalled at -42.5 V while moving to -100 V"
        );
    }
}
