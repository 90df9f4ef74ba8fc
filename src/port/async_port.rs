//! Async serial port implementation using tokio-serial.
//!
//! `TokioSerialPort` is the production [`SerialTransport`]; its reads are
//! registered with the Tokio reactor, so dropping a pending read does not
//! lose bytes and does not block a worker thread.

use super::error::PortError;
use super::traits::{PortConfiguration, PortOpener, SerialTransport};
use async_trait::async_trait;
use serialport::SerialPort;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Native async serial port backed by `tokio_serial::SerialStream`.
pub struct TokioSerialPort {
    inner: tokio_serial::SerialStream,
    config: PortConfiguration,
    name: String,
}

impl TokioSerialPort {
    /// Open a serial port with async I/O support.
    ///
    /// # Example
    /// ```no_run
    /// use gauge_logger::port::{TokioSerialPort, PortConfiguration};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = PortConfiguration::default();
    /// let port = TokioSerialPort::open("/dev/ttyUSB0", &config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(port_name: &str, config: &PortConfiguration) -> Result<Self, PortError> {
        let builder = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.timeout);

        let inner = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| PortError::from_open_error(port_name, e))?;

        debug!(port = port_name, baud = config.baud_rate, "serial port opened");

        Ok(Self {
            inner,
            config: config.clone(),
            name: port_name.to_string(),
        })
    }

    /// Configuration the port was opened with.
    pub fn config(&self) -> &PortConfiguration {
        &self.config
    }
}

#[async_trait]
impl SerialTransport for TokioSerialPort {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(data.len())
    }

    async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        self.inner.read(buffer).await.map_err(PortError::Io)
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        self.inner
            .clear(serialport::ClearBuffer::All)
            .map_err(PortError::Serial)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.config.timeout = timeout;
        SerialPort::set_timeout(&mut self.inner, timeout).map_err(PortError::Serial)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }
}

impl std::fmt::Debug for TokioSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSerialPort")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Opens real serial devices through tokio-serial.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(
        &self,
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialTransport>, PortError> {
        Ok(Box::new(TokioSerialPort::open(port_name, config)?))
    }
}

/// Names of the serial ports currently visible to the OS.
pub fn list_ports() -> Result<Vec<String>, PortError> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
