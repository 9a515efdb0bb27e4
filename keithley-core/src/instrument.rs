//! Instrument model definitions
//!
//! Each supported source meter implements [`InstrumentModel`] with the
//! identity tokens it answers to `*IDN?` and its link defaults. Drivers and
//! proxies are generic over the model so mixing up instruments is a type
//! error rather than a runtime surprise.
//!
//! Note: actual I/O is in the `keithley-hardware` crate. This module only
//! carries specifications.

/// Compile-time instrument description
///
/// # Example
///
/// ```
/// use keithley_core::instrument::{InstrumentModel, Keithley2470};
///
/// const NAME: &str = Keithley2470::NAME;
/// assert!(Keithley2470::matches_identity(
///     "KEITHLEY INSTRUMENTS,MODEL 2470,04481179,1.7.5b"
/// ));
/// ```
pub trait InstrumentModel: Send + Sync + 'static {
    /// Human-readable instrument name
    const NAME: &'static str;

    /// Token the manufacturer field of `*IDN?` must contain
    const VENDOR_TOKEN: &'static str;

    /// Token the model field of `*IDN?` must contain
    const MODEL_TOKEN: &'static str;

    /// RS-232 baud rate the front panel ships with
    const BAUD_RATE: u32;

    /// Raw SCPI socket port on the LAN interface
    const SOCKET_PORT: u16;

    /// Default link timeout in milliseconds
    const DEFAULT_TIMEOUT_MS: u64;

    /// Lowest beeper frequency accepted, in hertz
    const BEEP_MIN_HZ: f64;

    /// Highest beeper frequency accepted, in hertz
    const BEEP_MAX_HZ: f64;

    /// Longest beep accepted, in seconds
    const BEEP_MAX_SECONDS: f64;

    /// Whether an `*IDN?` answer belongs to this model
    fn matches_identity(idn: &str) -> bool {
        idn.contains(Self::VENDOR_TOKEN) && idn.contains(Self::MODEL_TOKEN)
    }

    /// The identity signature reported in mismatch errors
    fn expected_identity() -> String {
        format!("{} {}", Self::VENDOR_TOKEN, Self::MODEL_TOKEN)
    }
}

/// Keithley 2470 high-voltage SourceMeter
///
/// - 1100 V / 1 A source range
/// - `*IDN?` answers `KEITHLEY INSTRUMENTS,MODEL 2470,<serial>,<firmware>`
/// - RS-232 at 9600 baud, raw SCPI socket on port 5025
/// - Beeper: 200-5000 Hz, at most 1 s per beep
pub struct Keithley2470;

impl InstrumentModel for Keithley2470 {
    const NAME: &'static str = "Keithley 2470";
    const VENDOR_TOKEN: &'static str = "KEITHLEY";
    const MODEL_TOKEN: &'static str = "MODEL 2470";
    const BAUD_RATE: u32 = 9600;
    const SOCKET_PORT: u16 = 5025;
    const DEFAULT_TIMEOUT_MS: u64 = 2000;
    const BEEP_MIN_HZ: f64 = 200.0;
    const BEEP_MAX_HZ: f64 = 5000.0;
    const BEEP_MAX_SECONDS: f64 = 1.0;
}

/// Default instrument used when no model is specified
pub type DefaultInstrument = Keithley2470;
