//! Gauge-level error taxonomy.
//!
//! `Parse` is the only recoverable kind: a malformed reply costs one reading
//! and the polling loop carries on. Everything else ends the device's loop
//! and is reported as a connection loss.

use crate::port::PortError;
use crate::pressure::ParseError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by gauge drivers, emulators and the device manager.
#[derive(Debug, Error)]
pub enum GaugeError {
    /// The reply arrived but could not be parsed as a pressure.
    #[error("could not parse gauge response: {0}")]
    Parse(#[from] ParseError),

    /// No prompt arrived before the exchange deadline.
    #[error("no response within {timeout:?} ({} bytes received)", .partial.len())]
    ProtocolTimeout { timeout: Duration, partial: Vec<u8> },

    /// The serial endpoint could not be opened.
    #[error("failed to open {port}: {source}")]
    PortOpen {
        port: String,
        #[source]
        source: PortError,
    },

    /// No candidate baud rate produced a valid reply.
    #[error("auto-baud failed on {port}, tried {attempted:?}")]
    AutoBaudFailed { port: String, attempted: Vec<u32> },

    /// I/O failure in the middle of an exchange.
    #[error("protocol error: {0}")]
    Protocol(#[source] PortError),

    /// A command or read was issued before `connect`.
    #[error("device is not connected")]
    NotConnected,
}

impl GaugeError {
    /// True for failures that only cost the current reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Bytes received before a timeout, for diagnostics.
    pub fn partial_response(&self) -> Option<&[u8]> {
        match self {
            Self::ProtocolTimeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Result type for gauge operations.
pub type GaugeResult<T> = Result<T, GaugeError>;
