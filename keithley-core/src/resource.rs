//! Connection strings
//!
//! The same strings a VISA resource manager would accept for the links this
//! workspace drives, plus a couple of shorthand forms:
//!
//! | Input | Link |
//! |---|---|
//! | `ASRL/dev/ttyUSB0::INSTR`, `/dev/ttyUSB0`, `COM3` | RS-232 |
//! | `TCPIP0::10.0.0.7::5025::SOCKET`, `TCPIP::10.0.0.7::INSTR`, `tcp://10.0.0.7:5025` | raw SCPI socket |
//! | `mock`, `SIM::INSTR` | in-process simulated instrument |

use crate::{Result, SmuError};
use std::fmt;
use std::str::FromStr;

/// Raw SCPI socket port used when a resource does not name one
pub const DEFAULT_SOCKET_PORT: u16 = 5025;

/// A parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Serial port by device path
    Serial { path: String },
    /// Raw SCPI over TCP
    Socket { host: String, port: u16 },
    /// Simulated instrument, no hardware
    Simulated,
}

impl Resource {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Serial { .. } => "serial",
            Resource::Socket { .. } => "socket",
            Resource::Simulated => "simulated",
        }
    }
}

fn parse_port(s: &str, original: &str) -> Result<u16> {
    s.parse::<u16>().map_err(|_| {
        SmuError::InvalidArgument(format!(
            "Invalid port '{}' in resource '{}'",
            s, original
        ))
    })
}

fn parse_visa_tcpip(rest: &str, original: &str) -> Result<Resource> {
    // rest is everything after "TCPIP[n]::"
    let parts: Vec<&str> = rest.split("::").collect();
    match parts.as_slice() {
        [host, port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => Ok(Resource::Socket {
            host: host.to_string(),
            port: parse_port(port, original)?,
        }),
        [host, suffix] if suffix.eq_ignore_ascii_case("INSTR") => Ok(Resource::Socket {
            host: host.to_string(),
            port: DEFAULT_SOCKET_PORT,
        }),
        [host] if !host.is_empty() => Ok(Resource::Socket {
            host: host.to_string(),
            port: DEFAULT_SOCKET_PORT,
        }),
        _ => Err(SmuError::InvalidArgument(format!(
            "Unsupported TCPIP resource '{}'",
            original
        ))),
    }
}

fn parse_tcp_url(rest: &str, original: &str) -> Result<Resource> {
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(SmuError::InvalidArgument(format!(
            "Missing host in resource '{}'",
            original
        )));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok(Resource::Socket {
            host: host.to_string(),
            port: parse_port(port, original)?,
        }),
        Some(_) => Err(SmuError::InvalidArgument(format!(
            "Missing host in resource '{}'",
            original
        ))),
        None => Ok(Resource::Socket {
            host: rest.to_string(),
            port: DEFAULT_SOCKET_PORT,
        }),
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => s.get(prefix.len()..),
        _ => None,
    }
}

impl FromStr for Resource {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SmuError::InvalidArgument(
                "Resource string is empty".to_string(),
            ));
        }

        if trimmed.eq_ignore_ascii_case("mock") || trimmed.eq_ignore_ascii_case("SIM::INSTR") {
            return Ok(Resource::Simulated);
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "tcp://") {
            return parse_tcp_url(rest, trimmed);
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "TCPIP") {
            // Board index is optional: TCPIP::host or TCPIP0::host
            let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            if let Some(rest) = rest.strip_prefix("::") {
                return parse_visa_tcpip(rest, trimmed);
            }
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "ASRL") {
            let path = rest
                .strip_suffix("::INSTR")
                .or_else(|| rest.strip_suffix("::instr"))
                .unwrap_or(rest);
            if path.is_empty() {
                return Err(SmuError::InvalidArgument(format!(
                    "Missing serial port in resource '{}'",
                    trimmed
                )));
            }
            return Ok(Resource::Serial {
                path: path.to_string(),
            });
        }

        if trimmed.contains("::") {
            // USB0::..., GPIB0::... need a VISA library, which this workspace does not link
            return Err(SmuError::InvalidArgument(format!(
                "Unsupported resource '{}' (supported: serial path, ASRL<path>::INSTR, TCPIP::<host>::<port>::SOCKET, tcp://<host>:<port>, mock)",
                trimmed
            )));
        }

        Ok(Resource::Serial {
            path: trimmed.to_string(),
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Serial { path } => write!(f, "ASRL{}::INSTR", path),
            Resource::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Resource::Simulated => write!(f, "SIM::INSTR"),
        }
    }
}
