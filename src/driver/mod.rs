//! Serial protocol driver for `P` / `>` vacuum gauges.
//!
//! A [`GaugeDriver`] owns at most one open transport. Every use of that
//! transport (connect, exchange, disconnect) goes through one async mutex,
//! so a manual probe can never interleave bytes with the polling loop, and a
//! reconnect always tears the old handle down before opening a new one.

pub mod auto_baud;
pub mod exchange;

pub use auto_baud::{
    accept_response, looks_like_text, printable_ratio, AutoBaudOptions, DEFAULT_CANDIDATE_BAUDS,
    PRINTABLE_THRESHOLD,
};
pub use exchange::{exchange, Framing};

use crate::device::{DeviceEvents, DeviceType, GaugeDevice};
use crate::error::{GaugeError, GaugeResult};
use crate::port::{PortConfiguration, PortOpener, SerialTransport, SystemPortOpener};
use crate::pressure;
use crate::reading::{GaugeReading, ReadingStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connection lifecycle of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything a driver needs to talk to one gauge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Framing, baud rate and the normal exchange timeout.
    pub port: PortConfiguration,
    /// Request sent by `read_once`.
    pub command: String,
    /// Byte appended to every command.
    pub terminator: u8,
    /// Byte that ends every reply.
    pub prompt: u8,
    /// Scan for the baud rate on `connect` instead of using `port.baud_rate`.
    pub auto_baud: Option<AutoBaudOptions>,
    /// Valid measuring range in Torr, used to flag under/over-range readings.
    pub measurement_range: Option<(f64, f64)>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            port: PortConfiguration::default(),
            command: "P".to_string(),
            terminator: b'\r',
            prompt: b'>',
            auto_baud: Some(AutoBaudOptions::default()),
            measurement_range: None,
        }
    }
}

type TransportSlot = Option<Box<dyn SerialTransport>>;

/// Driver for one gauge on one serial port.
pub struct GaugeDriver {
    device_id: String,
    display_name: Mutex<String>,
    port_name: Mutex<String>,
    settings: DriverSettings,
    opener: Arc<dyn PortOpener>,
    transport: tokio::sync::Mutex<TransportSlot>,
    state: Mutex<ConnectionState>,
    current_baud: AtomicU32,
    events: DeviceEvents,
}

impl GaugeDriver {
    /// Driver that opens ports through `opener`.
    pub fn new(
        device_id: impl Into<String>,
        port_name: impl Into<String>,
        settings: DriverSettings,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        let device_id = device_id.into();
        Self {
            display_name: Mutex::new(device_id.clone()),
            device_id,
            port_name: Mutex::new(port_name.into()),
            settings,
            opener,
            transport: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            current_baud: AtomicU32::new(0),
            events: DeviceEvents::new(),
        }
    }

    /// Driver for a real serial device.
    pub fn serial(
        device_id: impl Into<String>,
        port_name: impl Into<String>,
        settings: DriverSettings,
    ) -> Self {
        Self::new(device_id, port_name, settings, Arc::new(SystemPortOpener))
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Baud rate of the open handle, `None` while disconnected.
    pub fn current_baud(&self) -> Option<u32> {
        match self.state() {
            ConnectionState::Connected => Some(self.current_baud.load(Ordering::Acquire)),
            _ => None,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn framing(&self) -> Framing<'_> {
        Framing {
            command: self.settings.command.as_bytes(),
            terminator: self.settings.terminator,
            prompt: self.settings.prompt,
        }
    }

    /// Drop whatever handle is in the slot. Teardown errors are ignored.
    fn release(&self, slot: &mut TransportSlot) {
        if let Some(mut transport) = slot.take() {
            if let Err(e) = transport.clear_buffers() {
                debug!(device = %self.device_id, error = %e, "ignoring clear failure during teardown");
            }
            debug!(device = %self.device_id, port = transport.name(), "transport released");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Open `port_name` with `config`, replacing any handle already held.
    pub async fn connect_with(&self, port_name: &str, config: &PortConfiguration) -> GaugeResult<()> {
        let mut slot = self.transport.lock().await;
        self.release(&mut slot);
        self.set_state(ConnectionState::Connecting);
        *self.port_name.lock() = port_name.to_string();

        match self.opener.open(port_name, config) {
            Ok(transport) => {
                *slot = Some(transport);
                self.current_baud.store(config.baud_rate, Ordering::Release);
                self.set_state(ConnectionState::Connected);
                info!(device = %self.device_id, port = port_name, baud = config.baud_rate, "connected");
                Ok(())
            }
            Err(source) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(device = %self.device_id, port = port_name, error = %source, "open failed");
                Err(GaugeError::PortOpen {
                    port: port_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Find the baud rate the gauge answers at and stay connected at it.
    ///
    /// Each candidate is tried up to `per_baud_retries` times: open at the
    /// scan timeout, let the adapter settle, run one exchange. The first
    /// plausible reply wins and its handle is kept open with the normal
    /// timeout applied. Returns the detected baud rate.
    pub async fn auto_baud_connect(
        &self,
        port_name: &str,
        options: &AutoBaudOptions,
    ) -> GaugeResult<u32> {
        let mut slot = self.transport.lock().await;
        self.release(&mut slot);
        self.set_state(ConnectionState::Connecting);
        *self.port_name.lock() = port_name.to_string();

        let mut attempted = Vec::with_capacity(options.candidate_bauds.len());
        for &baud in &options.candidate_bauds {
            attempted.push(baud);
            let scan_config = self.settings.port.with_baud(baud, options.scan_timeout);

            for attempt in 1..=options.per_baud_retries {
                debug!(device = %self.device_id, port = port_name, baud, attempt, "probing baud rate");

                match self.opener.open(port_name, &scan_config) {
                    Ok(mut transport) => {
                        tokio::time::sleep(options.settle_delay).await;
                        let probe =
                            exchange(transport.as_mut(), self.framing(), options.scan_timeout).await;
                        match probe {
                            Ok(reply) if accept_response(&reply, options.strict) => {
                                if let Err(e) = transport.set_timeout(self.settings.port.timeout) {
                                    warn!(device = %self.device_id, error = %e, "could not apply read timeout");
                                }
                                *slot = Some(transport);
                                self.current_baud.store(baud, Ordering::Release);
                                self.set_state(ConnectionState::Connected);
                                info!(
                                    device = %self.device_id,
                                    port = port_name,
                                    baud,
                                    attempt,
                                    "baud rate detected"
                                );
                                return Ok(baud);
                            }
                            Ok(reply) => {
                                debug!(
                                    device = %self.device_id,
                                    baud,
                                    printable = printable_ratio(&reply),
                                    "reply rejected"
                                );
                            }
                            Err(e) => {
                                debug!(device = %self.device_id, baud, error = %e, "probe failed");
                            }
                        }
                        drop(transport);
                    }
                    Err(e) => {
                        debug!(device = %self.device_id, baud, error = %e, "open failed during scan");
                    }
                }

                tokio::time::sleep(options.inter_attempt_delay).await;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        warn!(device = %self.device_id, port = port_name, ?attempted, "no baud rate produced a valid reply");
        Err(GaugeError::AutoBaudFailed {
            port: port_name.to_string(),
            attempted,
        })
    }

    /// Send `command` and return the raw reply, prompt included.
    ///
    /// An I/O failure drops the handle and publishes a connection-lost
    /// event. A timeout leaves the connection in place.
    pub async fn send_command(&self, command: &str) -> GaugeResult<String> {
        let mut slot = self.transport.lock().await;
        let transport = slot.as_mut().ok_or(GaugeError::NotConnected)?;

        let framing = Framing {
            command: command.as_bytes(),
            ..self.framing()
        };
        let result = exchange(transport.as_mut(), framing, self.settings.port.timeout).await;
        match result {
            Ok(reply) => Ok(String::from_utf8_lossy(&reply).into_owned()),
            Err(GaugeError::Protocol(e)) => {
                warn!(device = %self.device_id, error = %e, "connection lost");
                self.release(&mut slot);
                self.events
                    .publish_connection_lost(&self.device_id, e.to_string());
                Err(GaugeError::Protocol(e))
            }
            Err(GaugeError::ProtocolTimeout { timeout, partial }) => {
                warn!(
                    device = %self.device_id,
                    partial = %String::from_utf8_lossy(&partial),
                    "no prompt within {:?}",
                    timeout
                );
                Err(GaugeError::ProtocolTimeout { timeout, partial })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GaugeDevice for GaugeDriver {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::SerialGauge
    }

    fn display_name(&self) -> String {
        self.display_name.lock().clone()
    }

    fn set_display_name(&self, name: String) {
        *self.display_name.lock() = name;
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn port_name(&self) -> Option<String> {
        Some(self.port_name.lock().clone())
    }

    async fn connect(&self) -> GaugeResult<()> {
        let port_name = self.port_name.lock().clone();
        match &self.settings.auto_baud {
            Some(options) => self.auto_baud_connect(&port_name, options).await.map(|_| ()),
            None => self.connect_with(&port_name, &self.settings.port).await,
        }
    }

    async fn disconnect(&self) {
        let mut slot = self.transport.lock().await;
        if slot.is_some() {
            info!(device = %self.device_id, "disconnecting");
        }
        self.release(&mut slot);
    }

    async fn read_once(&self) -> GaugeResult<GaugeReading> {
        let reply = self.send_command(&self.settings.command).await?;
        let pressure = pressure::parse(&reply)?;
        let status = ReadingStatus::classify(pressure.pressure_torr, self.settings.measurement_range);
        let reading = GaugeReading::now(self.device_id.clone(), pressure, status);
        self.events.publish_reading(&reading);
        Ok(reading)
    }

    fn events(&self) -> &DeviceEvents {
        &self.events
    }
}

impl std::fmt::Debug for GaugeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeDriver")
            .field("device_id", &self.device_id)
            .field("port_name", &*self.port_name.lock())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPortOpener;
    use std::time::Duration;

    fn fixed_baud() -> DriverSettings {
        DriverSettings {
            auto_baud: None,
            ..Default::default()
        }
    }

    fn fast_scan(bauds: &[u32]) -> AutoBaudOptions {
        AutoBaudOptions {
            candidate_bauds: bauds.to_vec(),
            scan_timeout: Duration::from_millis(100),
            settle_delay: Duration::from_millis(10),
            per_baud_retries: 2,
            inter_attempt_delay: Duration::from_millis(5),
            strict: false,
        }
    }

    #[tokio::test]
    async fn test_read_once_before_connect() {
        let opener = MockPortOpener::gauge("1.0 Torr>");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener));

        let result = driver.read_once().await;
        assert!(matches!(result, Err(GaugeError::NotConnected)));
        assert_eq!(driver.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_and_read() {
        let opener = MockPortOpener::gauge("7.0E+02 mbar >");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener.clone()));
        let mut readings = driver.events().subscribe_readings();

        driver.connect().await.unwrap();
        assert!(driver.is_connected());
        assert_eq!(driver.current_baud(), Some(9600));

        let reading = driver.read_once().await.unwrap();
        assert_eq!(reading.device_id, "g1");
        assert!((reading.pressure_torr() - 525.0434).abs() < 0.001);
        assert!(reading.status.is_ok());
        assert_eq!(readings.recv().await.unwrap(), reading);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_handle() {
        let opener = MockPortOpener::gauge("1.0 Torr>");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener.clone()));

        driver.connect().await.unwrap();
        let first = opener.last_port().unwrap();
        driver
            .connect_with("MOCK1", &PortConfiguration::default())
            .await
            .unwrap();

        assert_eq!(opener.open_count(), 2);
        assert_eq!(first.clear_count(), 1, "first handle torn down");
        assert_eq!(driver.port_name().as_deref(), Some("MOCK1"));
    }

    #[tokio::test]
    async fn test_open_failure_is_port_open_error() {
        let opener = MockPortOpener::gauge("1.0 Torr>");
        opener.set_open_failure(Some(std::io::ErrorKind::PermissionDenied));
        let driver = GaugeDriver::new("g1", "COM9", fixed_baud(), Arc::new(opener));

        let result = driver.connect().await;
        assert!(matches!(result, Err(GaugeError::PortOpen { ref port, .. }) if port == "COM9"));
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_io_failure_drops_connection() {
        let opener = MockPortOpener::gauge("1.0 Torr>");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener.clone()));
        let mut lost = driver.events().subscribe_connection_lost();
        driver.connect().await.unwrap();

        opener
            .last_port()
            .unwrap()
            .fail_next_write(std::io::ErrorKind::BrokenPipe);
        let result = driver.read_once().await;

        assert!(matches!(result, Err(GaugeError::Protocol(_))));
        assert_eq!(driver.state(), ConnectionState::Disconnected);
        assert_eq!(lost.recv().await.unwrap().device_id, "g1");
        assert!(matches!(driver.read_once().await, Err(GaugeError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_connection() {
        let opener = MockPortOpener::silent();
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener));
        driver.connect().await.unwrap();

        let result = driver.read_once().await;
        assert!(matches!(result, Err(GaugeError::ProtocolTimeout { .. })));
        assert!(driver.is_connected());
    }

    #[tokio::test]
    async fn test_parse_failure_surfaces_as_parse_error() {
        let opener = MockPortOpener::gauge("ERR>");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener));
        driver.connect().await.unwrap();

        let result = driver.read_once().await;
        assert!(matches!(result, Err(ref e) if e.is_recoverable()));
        assert!(driver.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let opener = MockPortOpener::gauge("1.0 Torr>");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener));
        driver.connect().await.unwrap();

        driver.disconnect().await;
        driver.disconnect().await;
        assert!(!driver.is_connected());
        assert_eq!(driver.current_baud(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_baud_keeps_winning_handle_open() {
        let opener = MockPortOpener::gauge_at_baud(38400, "2.5E-02 Torr>");
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener.clone()));

        let baud = driver
            .auto_baud_connect("MOCK0", &fast_scan(&[9600, 19200, 38400, 57600]))
            .await
            .unwrap();

        assert_eq!(baud, 38400);
        assert_eq!(opener.attempted_bauds(), vec![9600, 9600, 19200, 19200, 38400]);
        assert!(driver.is_connected());
        assert_eq!(driver.current_baud(), Some(38400));

        let kept = opener.last_port().unwrap();
        assert_eq!(kept.timeout(), driver.settings().port.timeout);

        let reading = driver.read_once().await.unwrap();
        assert_eq!(reading.pressure_torr(), 0.025);
        assert_eq!(opener.open_count(), 5, "no reopen after detection");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_baud_exhaustion() {
        let opener = MockPortOpener::silent();
        let driver = GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener.clone()));

        let result = driver
            .auto_baud_connect("MOCK0", &fast_scan(&[9600, 19200]))
            .await;

        match result {
            Err(GaugeError::AutoBaudFailed { port, attempted }) => {
                assert_eq!(port, "MOCK0");
                assert_eq!(attempted, vec![9600, 19200]);
            }
            other => panic!("expected auto-baud failure, got {other:?}"),
        }
        assert_eq!(opener.attempted_bauds().len(), 4);
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_range_classification() {
        let opener = MockPortOpener::gauge("2000 Torr>");
        let settings = DriverSettings {
            measurement_range: Some((1e-4, 1000.0)),
            ..fixed_baud()
        };
        let driver = GaugeDriver::new("g1", "MOCK0", settings, Arc::new(opener));
        driver.connect().await.unwrap();

        let reading = driver.read_once().await.unwrap();
        assert_eq!(reading.status, ReadingStatus::OVER_RANGE);
    }

    #[tokio::test]
    async fn test_manual_command_shares_the_port() {
        let opener = MockPortOpener::gauge("1.0 Torr>");
        let driver = Arc::new(GaugeDriver::new("g1", "MOCK0", fixed_baud(), Arc::new(opener.clone())));
        driver.connect().await.unwrap();

        let poller = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.read_once().await })
        };
        let manual = driver.send_command("P").await.unwrap();
        assert_eq!(manual, "1.0 Torr>");
        assert!(poller.await.unwrap().is_ok());

        let writes = opener.last_port().unwrap().get_write_log();
        assert_eq!(writes, vec![b"P\r".to_vec(), b"P\r".to_vec()]);
    }
}
