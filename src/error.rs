//! The crate-wide error taxonomy (see spec §7).
//!
//! Five kinds: transport faults and protocol faults are fatal to a session,
//! AT errors and validation errors are reported on the single call that
//! produced them, and the disconnect aggregate is delivered exactly once to
//! a session's disconnect callback.

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

/// Numeric code carried by a device `+ERR=<code>` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtErrorCode {
    InvalidCommandFormat,
    InvalidCommand,
    InvalidOperationSymbol,
    InvalidParameter,
    OperationNotPermitted,
    Unknown(i32),
}

impl AtErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::InvalidCommandFormat,
            -2 => Self::InvalidCommand,
            -3 => Self::InvalidOperationSymbol,
            -4 => Self::InvalidParameter,
            -5 => Self::OperationNotPermitted,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AtErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCommandFormat => write!(f, "invalid command format"),
            Self::InvalidCommand => write!(f, "invalid command"),
            Self::InvalidOperationSymbol => write!(f, "invalid operation symbol"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::OperationNotPermitted => write!(f, "operation not permitted"),
            Self::Unknown(code) => write!(f, "unknown AT error code {code}"),
        }
    }
}

/// The crate-wide error type. Every fallible operation in this crate returns
/// `Result<T, UfoError>` (aliased below as [`Result`]).
#[derive(Debug, Error)]
pub enum UfoError {
    /// Socket-level failure: bind, send, or a remote close that carried an
    /// OS error. Fatal to the session that observed it.
    #[error("transport fault: {0}")]
    Transport(#[source] std::io::Error),

    /// Wire-level inconsistency: bad header, bad checksum, an impossible
    /// power/mode byte, a hello from an unexpected host, or an unexpected
    /// reply to factory-reset. Fatal.
    #[error("protocol fault: {0}")]
    Protocol(String),

    /// `+ERR=<code>` returned by the device for a single AT exchange. Does
    /// not kill the session.
    #[error("AT error: {code} (command {command})")]
    At { command: String, code: AtErrorCode },

    /// Caller-supplied input was out of domain before anything touched the
    /// wire (bad IPv4, bad auth/encryption combination, oversize string).
    #[error("validation error: {0}")]
    Validation(String),

    /// Delivered exactly once to a session's disconnect callback once both
    /// engines have torn down.
    #[error("device session disconnected: {message}")]
    Disconnect {
        udp: Option<Box<UfoError>>,
        tcp: Option<Box<UfoError>>,
        message: String,
    },
}

impl UfoError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn at(command: impl Into<String>, code: i32) -> Self {
        Self::At {
            command: command.into(),
            code: AtErrorCode::from_code(code),
        }
    }

    pub fn disconnect(
        udp: Option<UfoError>,
        tcp: Option<UfoError>,
        message: impl Into<String>,
    ) -> Self {
        Self::Disconnect {
            udp: udp.map(Box::new),
            tcp: tcp.map(Box::new),
            message: message.into(),
        }
    }

    /// True for the two fault kinds that must tear a session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}

impl From<std::io::Error> for UfoError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e)
    }
}

pub(crate) fn bad_ip(field: &str, value: &str) -> UfoError {
    UfoError::validation(format!("{field}: {value:?} is not a valid IPv4 address"))
}

pub(crate) fn hello_from_unexpected_host(expected: IpAddr, got: IpAddr) -> UfoError {
    UfoError::protocol(format!(
        "hello from unexpected host: expected {expected} (or 0.0.0.0), got {got}"
    ))
}

/// Crate-wide `Result` alias over [`UfoError`].
pub type Result<T> = std::result::Result<T, UfoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn transport_fault_surfaces_the_underlying_io_error_unmodified() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset the connection");
        let message = io_err.to_string();
        let wrapped: UfoError = io_err.into();

        assert!(wrapped.to_string().contains(&message));
        let source = wrapped.source().expect("transport fault carries a source");
        assert_eq!(source.to_string(), message);
    }

    #[test]
    fn at_error_code_display_is_human_readable() {
        assert_eq!(AtErrorCode::from_code(-4).to_string(), "invalid parameter");
        assert_eq!(AtErrorCode::from_code(7).to_string(), "unknown AT error code 7");
    }

    #[test]
    fn disconnect_aggregate_carries_both_sides() {
        let err = UfoError::disconnect(
            Some(UfoError::protocol("udp side died")),
            None,
            "both engines torn down",
        );
        match err {
            UfoError::Disconnect { udp, tcp, .. } => {
                assert!(udp.is_some());
                assert!(tcp.is_none());
            }
            _ => panic!("expected Disconnect variant"),
        }
    }
}
