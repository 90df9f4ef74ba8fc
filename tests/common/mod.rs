//! Shared test utilities for gauge-logger integration tests.
//!
//! - Mock-backed gauge drivers that are already connected
//! - A sink that counts readings per device
//! - Reading builders

#![allow(dead_code)]

use gauge_logger::driver::{AutoBaudOptions, DriverSettings, GaugeDriver};
use gauge_logger::port::MockPortOpener;
use gauge_logger::{
    ConnectionLost, GaugeDevice, GaugeReading, PressureReading, ReadingSink, ReadingStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Typical reply of a gauge at atmosphere.
pub const ATMOSPHERE_REPLY: &str = " 7.60E+02 Torr\r\n>";

/// Settings with auto-baud off and a short exchange timeout.
pub fn fixed_baud_settings() -> DriverSettings {
    let mut settings = DriverSettings {
        auto_baud: None,
        ..DriverSettings::default()
    };
    settings.port.timeout = Duration::from_millis(200);
    settings
}

/// Scan options short enough for paused-time tests.
pub fn fast_scan(bauds: &[u32]) -> AutoBaudOptions {
    AutoBaudOptions {
        candidate_bauds: bauds.to_vec(),
        scan_timeout: Duration::from_millis(100),
        settle_delay: Duration::from_millis(10),
        per_baud_retries: 2,
        inter_attempt_delay: Duration::from_millis(5),
        strict: false,
    }
}

/// A connected driver talking to `opener` at a fixed baud rate.
pub async fn connected_gauge(device_id: &str, opener: &MockPortOpener) -> Arc<GaugeDriver> {
    let driver = Arc::new(GaugeDriver::new(
        device_id,
        format!("MOCK-{device_id}"),
        fixed_baud_settings(),
        Arc::new(opener.clone()),
    ));
    driver.connect().await.expect("mock connect");
    driver
}

pub fn reading(device_id: &str, torr: f64) -> GaugeReading {
    GaugeReading::now(
        device_id,
        PressureReading {
            pressure_torr: torr,
            unit_raw: Some("Torr".to_string()),
            raw_line: format!("{torr} Torr>"),
            was_converted: false,
        },
        ReadingStatus::OK,
    )
}

/// Counts readings and connection losses per device.
#[derive(Default)]
pub struct CountingSink {
    readings: Mutex<HashMap<String, usize>>,
    lost: Mutex<Vec<ConnectionLost>>,
}

impl CountingSink {
    pub fn count(&self, device_id: &str) -> usize {
        self.readings.lock().get(device_id).copied().unwrap_or(0)
    }

    pub fn lost(&self) -> Vec<ConnectionLost> {
        self.lost.lock().clone()
    }
}

impl ReadingSink for CountingSink {
    fn on_reading(&self, reading: &GaugeReading) {
        *self
            .readings
            .lock()
            .entry(reading.device_id.clone())
            .or_insert(0) += 1;
    }

    fn on_connection_lost(&self, event: &ConnectionLost) {
        self.lost.lock().push(event.clone());
    }
}
