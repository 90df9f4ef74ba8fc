//! Baud rate detection.
//!
//! The scan itself lives on [`super::GaugeDriver::auto_baud_connect`] because
//! it has to hand the winning handle straight to the driver. This module
//! holds the options and the reply plausibility checks.

use crate::pressure;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Baud rates tried when none are configured, most likely first.
pub const DEFAULT_CANDIDATE_BAUDS: &[u32] = &[9600, 19200, 38400, 57600, 115200];

/// Share of printable bytes a reply needs to be taken as real data.
pub const PRINTABLE_THRESHOLD: f64 = 0.8;

/// Parameters of an auto-baud scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoBaudOptions {
    /// Tried in order; the first valid one wins.
    pub candidate_bauds: Vec<u32>,
    /// Exchange timeout used while scanning.
    pub scan_timeout: Duration,
    /// Wait after opening before the probe is sent.
    pub settle_delay: Duration,
    /// Attempts per candidate baud.
    pub per_baud_retries: u32,
    /// Pause between failed attempts.
    pub inter_attempt_delay: Duration,
    /// Also require the reply to parse as a pressure.
    pub strict: bool,
}

impl Default for AutoBaudOptions {
    fn default() -> Self {
        Self {
            candidate_bauds: DEFAULT_CANDIDATE_BAUDS.to_vec(),
            scan_timeout: Duration::from_millis(300),
            settle_delay: Duration::from_millis(200),
            per_baud_retries: 2,
            inter_attempt_delay: Duration::from_millis(50),
            strict: false,
        }
    }
}

fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\r' | b'\n')
}

/// Fraction of bytes that are printable ASCII, CR or LF. Zero for an empty
/// reply.
pub fn printable_ratio(response: &[u8]) -> f64 {
    if response.is_empty() {
        return 0.0;
    }
    let printable = response.iter().filter(|&&b| is_printable(b)).count();
    printable as f64 / response.len() as f64
}

/// The compatibility heuristic: non-empty and at least 80 % printable.
pub fn looks_like_text(response: &[u8]) -> bool {
    let printable = response.iter().filter(|&&b| is_printable(b)).count();
    !response.is_empty() && printable * 5 >= response.len() * 4
}

/// Decide whether a scan reply came from a gauge talking at the right baud.
///
/// Noise at a wrong baud can pass the printable check by accident; `strict`
/// closes that hole by also requiring a parseable pressure.
pub fn accept_response(response: &[u8], strict: bool) -> bool {
    if !looks_like_text(response) {
        return false;
    }
    !strict || pressure::parse(&String::from_utf8_lossy(response)).is_ok()
}
