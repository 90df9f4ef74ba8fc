//! Core traits for the byte-stream transport under a gauge driver.
//!
//! A [`PortOpener`] turns a port name plus [`PortConfiguration`] into a live
//! [`SerialTransport`]. Real hardware goes through `tokio-serial`; tests plug
//! in the mock opener and never touch a device node.

use super::error::PortError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration parameters for a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Read timeout for a full command/response exchange.
    pub timeout: Duration,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_secs(1),
        }
    }
}

impl PortConfiguration {
    /// Same framing, different baud rate and timeout. Used by the baud scan.
    pub fn with_baud(&self, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            baud_rate,
            timeout,
            ..self.clone()
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// An open, exclusively owned byte-stream to one instrument.
///
/// `read_bytes` must be cancel-safe: the driver races a pending read against
/// its exchange deadline and drops the read future when the deadline wins.
/// No bytes may be lost from the stream when that happens.
#[async_trait]
pub trait SerialTransport: Send + std::fmt::Debug {
    /// Write bytes to the port. Returns the number of bytes written.
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Wait for at least one byte and copy what is available into `buffer`.
    ///
    /// Returns `Ok(0)` only when the stream has reached end-of-file.
    async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Discard unread input and unsent output.
    fn clear_buffers(&mut self) -> Result<(), PortError>;

    /// Change the timeout applied to the open handle.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError>;

    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Baud rate the handle was opened with.
    fn baud_rate(&self) -> u32;
}

/// Opens transports by name. One opener is shared by every driver.
pub trait PortOpener: Send + Sync + std::fmt::Debug {
    /// Open `port_name` with `config`.
    fn open(
        &self,
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialTransport>, PortError>;
}
