//! Mock serial transport for testing.
//!
//! `MockSerialPort` simulates an instrument on the other end of a serial
//! line without requiring hardware. A [`Responder`] closure decides what the
//! "instrument" answers to each write, which lets tests model a gauge that
//! only talks sense at one baud rate, splits its reply into chunks, or goes
//! silent.

use super::error::PortError;
use super::traits::{PortConfiguration, PortOpener, SerialTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Decides the instrument's reply: `(baud_rate, bytes_written) -> reply`.
pub type Responder = Arc<dyn Fn(u32, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Bytes a gauge produces when the host talks to it at the wrong baud rate.
pub const LINE_NOISE: &[u8] = &[0xF0, 0x00, 0x9E, 0x81, 0xFF, 0x1B, 0xC3, b'>'];

/// Inner state of the mock port, shared between clones.
#[derive(Debug, Default)]
struct MockPortState {
    /// Bytes waiting to be returned by reads.
    read_queue: VecDeque<u8>,
    /// Every write, in order.
    write_log: Vec<Vec<u8>>,
    /// Error kind to return from the next read.
    fail_next_read: Option<std::io::ErrorKind>,
    /// Error kind to return from the next write.
    fail_next_write: Option<std::io::ErrorKind>,
    /// Largest number of bytes handed out per read; 0 means unlimited.
    chunk_size: usize,
    /// Number of `clear_buffers` calls.
    clear_count: usize,
    /// Timeout most recently applied to the handle.
    timeout: Duration,
    /// Number of reads that returned data.
    completed_reads: usize,
}

/// Mock serial port implementation for testing.
///
/// # Example
/// ```
/// use gauge_logger::port::{MockSerialPort, SerialTransport};
///
/// # tokio_test::block_on(async {
/// let mut port = MockSerialPort::new("MOCK0");
/// port.enqueue_read(b"7.6E+02 Torr>");
///
/// let mut buffer = [0u8; 32];
/// let n = port.read_bytes(&mut buffer).await.unwrap();
/// assert_eq!(&buffer[..n], b"7.6E+02 Torr>");
///
/// port.write_bytes(b"P\r").await.unwrap();
/// assert_eq!(port.get_write_log(), vec![b"P\r".to_vec()]);
/// # });
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    baud_rate: u32,
    state: Arc<Mutex<MockPortState>>,
    responder: Option<Responder>,
}

impl MockSerialPort {
    /// Create a new mock serial port with the given name at 9600 baud.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            baud_rate: 9600,
            state: Arc::new(Mutex::new(MockPortState {
                timeout: Duration::from_secs(1),
                ..Default::default()
            })),
            responder: None,
        }
    }

    /// Set the baud rate the port reports (and passes to the responder).
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Answer every write through `responder`.
    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Hand out at most `chunk_size` bytes per read.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.state.lock().chunk_size = chunk_size;
        self
    }

    /// Enqueue bytes to be returned by subsequent read operations.
    pub fn enqueue_read(&mut self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Make the next read fail with an I/O error of the given kind.
    pub fn fail_next_read(&self, kind: std::io::ErrorKind) {
        self.state.lock().fail_next_read = Some(kind);
    }

    /// Make the next write fail with an I/O error of the given kind.
    pub fn fail_next_write(&self, kind: std::io::ErrorKind) {
        self.state.lock().fail_next_write = Some(kind);
    }

    /// Number of times the buffers were cleared.
    pub fn clear_count(&self) -> usize {
        self.state.lock().clear_count
    }

    /// Timeout currently applied to the handle.
    pub fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    /// Number of reads that returned data.
    pub fn completed_reads(&self) -> usize {
        self.state.lock().completed_reads
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }
}

#[async_trait]
impl SerialTransport for MockSerialPort {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let reply = {
            let mut state = self.state.lock();
            if let Some(kind) = state.fail_next_write.take() {
                return Err(PortError::Io(std::io::Error::new(kind, "mock write failure")));
            }
            state.write_log.push(data.to_vec());
            self.responder
                .as_ref()
                .and_then(|responder| responder(self.baud_rate, data))
        };

        if let Some(reply) = reply {
            self.state.lock().read_queue.extend(reply);
        }
        Ok(data.len())
    }

    async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        // A real line blocks until bytes arrive; poll the queue so that a
        // dropped read leaves the queue untouched.
        loop {
            {
                let mut state = self.state.lock();
                if let Some(kind) = state.fail_next_read.take() {
                    return Err(PortError::Io(std::io::Error::new(kind, "mock read failure")));
                }
                if !state.read_queue.is_empty() {
                    let limit = match state.chunk_size {
                        0 => buffer.len(),
                        n => n.min(buffer.len()),
                    };
                    let mut count = 0;
                    while count < limit {
                        match state.read_queue.pop_front() {
                            Some(byte) => {
                                buffer[count] = byte;
                                count += 1;
                            }
                            None => break,
                        }
                    }
                    state.completed_reads += 1;
                    return Ok(count);
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        let mut state = self.state.lock();
        state.read_queue.clear();
        state.clear_count += 1;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.state.lock().timeout = timeout;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

#[derive(Debug, Default)]
struct OpenerState {
    /// `(port_name, baud_rate)` for every open attempt, failed ones included.
    attempts: Vec<(String, u32)>,
    /// Handles to every port that was successfully opened.
    opened: Vec<MockSerialPort>,
    /// Error kind returned by every open while set.
    open_failure: Option<std::io::ErrorKind>,
}

/// [`PortOpener`] that hands out [`MockSerialPort`]s sharing one responder.
#[derive(Clone)]
pub struct MockPortOpener {
    responder: Responder,
    chunk_size: usize,
    state: Arc<Mutex<OpenerState>>,
}

impl MockPortOpener {
    /// Opener whose ports answer through `responder`.
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            chunk_size: 0,
            state: Arc::new(Mutex::new(OpenerState::default())),
        }
    }

    /// A gauge that answers every `P` command with `reply` at any baud rate.
    pub fn gauge(reply: &str) -> Self {
        let reply = reply.as_bytes().to_vec();
        Self::new(Arc::new(move |_baud: u32, written: &[u8]| {
            written.starts_with(b"P").then(|| reply.clone())
        }))
    }

    /// A gauge that only answers sensibly at `baud_rate`; everywhere else it
    /// produces [`LINE_NOISE`].
    pub fn gauge_at_baud(baud_rate: u32, reply: &str) -> Self {
        let reply = reply.as_bytes().to_vec();
        Self::new(Arc::new(move |baud: u32, written: &[u8]| {
            if !written.starts_with(b"P") {
                return None;
            }
            if baud == baud_rate {
                Some(reply.clone())
            } else {
                Some(LINE_NOISE.to_vec())
            }
        }))
    }

    /// A line with nothing attached: writes succeed, nothing ever comes back.
    pub fn silent() -> Self {
        Self::new(Arc::new(|_baud: u32, _written: &[u8]| -> Option<Vec<u8>> { None }))
    }

    /// Deliver replies in chunks of at most `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Make every subsequent open fail with `kind` (`None` to clear).
    pub fn set_open_failure(&self, kind: Option<std::io::ErrorKind>) {
        self.state.lock().open_failure = kind;
    }

    /// Every open attempt as `(port_name, baud_rate)`.
    pub fn attempts(&self) -> Vec<(String, u32)> {
        self.state.lock().attempts.clone()
    }

    /// Baud rates of every open attempt, in order.
    pub fn attempted_bauds(&self) -> Vec<u32> {
        self.state.lock().attempts.iter().map(|(_, b)| *b).collect()
    }

    /// Handle to the most recently opened port.
    pub fn last_port(&self) -> Option<MockSerialPort> {
        self.state.lock().opened.last().cloned()
    }

    /// Number of ports successfully opened so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().opened.len()
    }
}

impl PortOpener for MockPortOpener {
    fn open(
        &self,
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialTransport>, PortError> {
        let mut state = self.state.lock();
        state
            .attempts
            .push((port_name.to_string(), config.baud_rate));

        match state.open_failure {
            Some(std::io::ErrorKind::PermissionDenied) => {
                return Err(PortError::PermissionDenied(port_name.to_string()))
            }
            Some(std::io::ErrorKind::NotFound) => return Err(PortError::not_found(port_name)),
            Some(kind) => {
                return Err(PortError::Io(std::io::Error::new(kind, "mock open failure")))
            }
            None => {}
        }

        let mut port = MockSerialPort::new(port_name)
            .with_baud_rate(config.baud_rate)
            .with_responder(Arc::clone(&self.responder))
            .with_chunk_size(self.chunk_size);
        port.set_timeout(config.timeout)?;
        state.opened.push(port.clone());
        Ok(Box::new(port))
    }
}

impl std::fmt::Debug for MockPortOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPortOpener")
            .field("chunk_size", &self.chunk_size)
            .field("open_count", &self.open_count())
            .finish()
    }
}
