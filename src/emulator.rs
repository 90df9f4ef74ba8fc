//! Synthetic gauge for running without hardware.
//!
//! Produces `base + amplitude * sin(2π t / period + phase)` where `t` is the
//! time since `connect` and `phase` depends on the emulator's creation
//! ordinal, so several emulators draw visibly different traces.

use crate::device::{DeviceEvents, DeviceType, GaugeDevice};
use crate::error::{GaugeError, GaugeResult};
use crate::pressure::PressureReading;
use crate::reading::{GaugeReading, ReadingStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

static NEXT_ORDINAL: AtomicUsize = AtomicUsize::new(0);

/// Phase step between consecutive emulators: the golden angle, so no two
/// ordinals land on the same point of the sine.
const PHASE_STEP: f64 = 2.399_963_229_728_653;

/// Shape of the emulated pressure trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorSettings {
    pub base_torr: f64,
    pub amplitude_torr: f64,
    pub period: Duration,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            base_torr: 760.0,
            amplitude_torr: 50.0,
            period: Duration::from_secs(30),
        }
    }
}

/// A [`GaugeDevice`] that needs no port.
pub struct GaugeEmulator {
    device_id: String,
    display_name: Mutex<String>,
    settings: EmulatorSettings,
    ordinal: usize,
    connected_at: Mutex<Option<Instant>>,
    events: DeviceEvents,
}

impl GaugeEmulator {
    pub fn new(device_id: impl Into<String>, settings: EmulatorSettings) -> Self {
        let device_id = device_id.into();
        let ordinal = NEXT_ORDINAL.fetch_add(1, Ordering::Relaxed);
        Self {
            display_name: Mutex::new(format!("Emulator {}", ordinal + 1)),
            device_id,
            settings,
            ordinal,
            connected_at: Mutex::new(None),
            events: DeviceEvents::new(),
        }
    }

    /// Creation ordinal, unique per process.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Phase offset in radians.
    pub fn phase(&self) -> f64 {
        (self.ordinal as f64 * PHASE_STEP) % TAU
    }

    /// Trace value `elapsed` after connect.
    pub fn pressure_at(&self, elapsed: Duration) -> f64 {
        let period = self.settings.period.as_secs_f64();
        let angle = if period > 0.0 {
            TAU * elapsed.as_secs_f64() / period + self.phase()
        } else {
            self.phase()
        };
        self.settings.base_torr + self.settings.amplitude_torr * angle.sin()
    }
}

#[async_trait]
impl GaugeDevice for GaugeEmulator {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Emulator
    }

    fn display_name(&self) -> String {
        self.display_name.lock().clone()
    }

    fn set_display_name(&self, name: String) {
        *self.display_name.lock() = name;
    }

    fn is_connected(&self) -> bool {
        self.connected_at.lock().is_some()
    }

    fn port_name(&self) -> Option<String> {
        None
    }

    async fn connect(&self) -> GaugeResult<()> {
        *self.connected_at.lock() = Some(Instant::now());
        info!(device = %self.device_id, ordinal = self.ordinal, "emulator connected");
        Ok(())
    }

    async fn disconnect(&self) {
        *self.connected_at.lock() = None;
    }

    async fn read_once(&self) -> GaugeResult<GaugeReading> {
        let connected_at = (*self.connected_at.lock()).ok_or(GaugeError::NotConnected)?;
        let pressure_torr = self.pressure_at(connected_at.elapsed());
        let pressure = PressureReading {
            pressure_torr,
            unit_raw: Some("Torr".to_string()),
            raw_line: format!("{pressure_torr:.4E} Torr>"),
            was_converted: false,
        };
        let reading = GaugeReading::now(
            self.device_id.clone(),
            pressure,
            ReadingStatus::classify(pressure_torr, None),
        );
        self.events.publish_reading(&reading);
        Ok(reading)
    }

    fn events(&self) -> &DeviceEvents {
        &self.events
    }
}

impl std::fmt::Debug for GaugeEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeEmulator")
            .field("device_id", &self.device_id)
            .field("ordinal", &self.ordinal)
            .field("settings", &self.settings)
            .finish()
    }
}
