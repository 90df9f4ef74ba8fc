//! Transport-level error types.
//!
//! Kept separate from [`crate::error::GaugeError`] so the byte-stream layer
//! knows nothing about gauges, readings or protocols.

use thiserror::Error;

/// Errors that can occur while opening or using a byte-stream transport.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Access to the port was refused (already in use, missing permissions).
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    /// The transport was closed underneath us (device unplugged, EOF).
    #[error("Port closed: {0}")]
    Closed(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Closed error from a port name.
    pub fn closed(port_name: impl Into<String>) -> Self {
        Self::Closed(port_name.into())
    }

    /// Map a `serialport` open failure onto our error kinds.
    pub fn from_open_error(port_name: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::not_found(port_name),
            serialport::ErrorKind::InvalidInput => Self::config(err.to_string()),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                Self::PermissionDenied(port_name.to_string())
            }
            _ => Self::Serial(err),
        }
    }
}
