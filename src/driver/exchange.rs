//! One command/response exchange on an open transport.

use crate::error::{GaugeError, GaugeResult};
use crate::port::{PortError, SerialTransport};
use std::time::Duration;
use tracing::trace;

const READ_CHUNK: usize = 256;

/// Bytes that make up one exchange on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Framing<'a> {
    /// Request bytes, without the terminator.
    pub command: &'a [u8],
    /// Appended once after the command.
    pub terminator: u8,
    /// Its presence in the reply completes the read.
    pub prompt: u8,
}

/// Send `framing.command` and collect the reply up to and including the
/// prompt byte.
///
/// A single deadline covers the whole read phase. Each iteration races one
/// pending read against that deadline; a completed read is appended and the
/// next read is started straight away. On timeout the bytes gathered so far
/// are returned inside [`GaugeError::ProtocolTimeout`]. The deadline is
/// polled before the read, so a line that never goes quiet still times out.
pub async fn exchange(
    transport: &mut dyn SerialTransport,
    framing: Framing<'_>,
    timeout: Duration,
) -> GaugeResult<Vec<u8>> {
    transport.clear_buffers().map_err(GaugeError::Protocol)?;

    let mut request = Vec::with_capacity(framing.command.len() + 1);
    request.extend_from_slice(framing.command);
    request.push(framing.terminator);
    transport
        .write_bytes(&request)
        .await
        .map_err(GaugeError::Protocol)?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut response = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                return Err(GaugeError::ProtocolTimeout {
                    timeout,
                    partial: response,
                });
            }
            read = transport.read_bytes(&mut chunk) => match read {
                Ok(0) => {
                    return Err(GaugeError::Protocol(PortError::closed(transport.name())));
                }
                Ok(n) => {
                    let received = &chunk[..n];
                    response.extend_from_slice(received);
                    if memchr::memchr(framing.prompt, received).is_some() {
                        trace!(port = transport.name(), bytes = response.len(), "prompt received");
                        return Ok(response);
                    }
                }
                Err(e) => return Err(GaugeError::Protocol(e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MockPortOpener, MockSerialPort, PortConfiguration, PortOpener};

    const GAUGE: Framing<'static> = Framing {
        command: b"P",
        terminator: b'\r',
        prompt: b'>',
    };

    #[tokio::test]
    async fn test_reads_until_prompt() {
        let opener = MockPortOpener::gauge(" 7.6E+02 Torr >");
        let mut port = opener.open("MOCK0", &PortConfiguration::default()).unwrap();

        let reply = exchange(port.as_mut(), GAUGE, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b" 7.6E+02 Torr >");

        let mock = opener.last_port().unwrap();
        assert_eq!(mock.get_write_log(), vec![b"P\r".to_vec()]);
        assert_eq!(mock.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_accumulates_chunks() {
        let opener = MockPortOpener::gauge("1.25E-03 mbar>").with_chunk_size(2);
        let mut port = opener.open("MOCK0", &PortConfiguration::default()).unwrap();

        let reply = exchange(port.as_mut(), GAUGE, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"1.25E-03 mbar>");
        assert_eq!(opener.last_port().unwrap().completed_reads(), 7);
    }

    #[tokio::test]
    async fn test_stale_input_is_discarded() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"9.9 Torr>");

        let result = exchange(&mut port, GAUGE, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(GaugeError::ProtocolTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_bytes() {
        let opener = MockPortOpener::gauge("1.0E+00 Tor");
        let mut port = opener.open("MOCK0", &PortConfiguration::default()).unwrap();

        let result = exchange(port.as_mut(), GAUGE, Duration::from_millis(250)).await;
        match result {
            Err(GaugeError::ProtocolTimeout { timeout, partial }) => {
                assert_eq!(timeout, Duration::from_millis(250));
                assert_eq!(partial, b"1.0E+00 Tor");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    /// A line that always has another byte ready and never sends the prompt.
    #[derive(Debug, Default)]
    struct BabblingLine {
        reads: usize,
    }

    #[async_trait::async_trait]
    impl SerialTransport for BabblingLine {
        async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
            Ok(data.len())
        }

        async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
            // Gives up after a while so a missed deadline ends as a closed port.
            if self.reads == 1_000 {
                return Ok(0);
            }
            self.reads += 1;
            std::thread::sleep(Duration::from_millis(1));
            buffer[0] = b'~';
            Ok(1)
        }

        fn clear_buffers(&mut self) -> Result<(), PortError> {
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<(), PortError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "BABBLE"
        }

        fn baud_rate(&self) -> u32 {
            9600
        }
    }

    #[tokio::test]
    async fn test_deadline_wins_over_a_busy_line() {
        let mut line = BabblingLine::default();
        let result = exchange(&mut line, GAUGE, Duration::from_millis(20)).await;
        match result {
            Err(GaugeError::ProtocolTimeout { partial, .. }) => {
                assert!(!partial.is_empty());
                assert!(partial.len() < 1_000);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_io_error_is_protocol_error() {
        let opener = MockPortOpener::silent();
        let mut port = opener.open("MOCK0", &PortConfiguration::default()).unwrap();
        opener
            .last_port()
            .unwrap()
            .fail_next_read(std::io::ErrorKind::BrokenPipe);

        let result = exchange(port.as_mut(), GAUGE, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GaugeError::Protocol(PortError::Io(_)))));
    }

    #[tokio::test]
    async fn test_write_error_is_protocol_error() {
        let mut port = MockSerialPort::new("MOCK0");
        port.fail_next_write(std::io::ErrorKind::TimedOut);

        let result = exchange(&mut port, GAUGE, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GaugeError::Protocol(_))));
    }
}
