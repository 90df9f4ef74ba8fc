//! The gauge device capability.
//!
//! Everything downstream (the device manager, the binary) is written against
//! [`GaugeDevice`], which both the serial [`crate::driver::GaugeDriver`] and
//! the [`crate::emulator::GaugeEmulator`] implement.

use crate::error::GaugeResult;
use crate::reading::GaugeReading;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of each per-device event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kind of device behind a [`GaugeDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// A gauge on a serial line speaking the `P` / `>` protocol.
    SerialGauge,
    /// Synthetic sine-wave source, no hardware.
    Emulator,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerialGauge => write!(f, "serial gauge"),
            Self::Emulator => write!(f, "emulator"),
        }
    }
}

/// Notification that a device stopped answering.
#[derive(Debug, Clone)]
pub struct ConnectionLost {
    pub device_id: String,
    /// Human-readable cause.
    pub reason: String,
}

/// Per-device fan-out of readings and connection-loss notifications.
///
/// Sending never fails: with no subscribers the event is dropped.
#[derive(Debug, Clone)]
pub struct DeviceEvents {
    readings: broadcast::Sender<GaugeReading>,
    connection_lost: broadcast::Sender<ConnectionLost>,
}

impl DeviceEvents {
    pub fn new() -> Self {
        let (readings, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connection_lost, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            readings,
            connection_lost,
        }
    }

    pub fn publish_reading(&self, reading: &GaugeReading) {
        let _ = self.readings.send(reading.clone());
    }

    pub fn publish_connection_lost(&self, device_id: &str, reason: impl Into<String>) {
        let _ = self.connection_lost.send(ConnectionLost {
            device_id: device_id.to_string(),
            reason: reason.into(),
        });
    }

    pub fn subscribe_readings(&self) -> broadcast::Receiver<GaugeReading> {
        self.readings.subscribe()
    }

    pub fn subscribe_connection_lost(&self) -> broadcast::Receiver<ConnectionLost> {
        self.connection_lost.subscribe()
    }
}

impl Default for DeviceEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability set shared by every gauge source.
///
/// Methods take `&self`: a device is shared between its polling task and
/// any caller that wants to probe it, and implementations serialise access
/// to their underlying resource internally.
#[async_trait]
pub trait GaugeDevice: Send + Sync + std::fmt::Debug {
    /// Stable identifier, unique within a manager.
    fn device_id(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    fn display_name(&self) -> String;

    fn set_display_name(&self, name: String);

    fn is_connected(&self) -> bool;

    /// Port the device is (or was last) attached to, if any.
    fn port_name(&self) -> Option<String>;

    /// Establish the connection using the device's configured settings.
    async fn connect(&self) -> GaugeResult<()>;

    /// Release the connection. Idempotent, never fails.
    async fn disconnect(&self);

    /// Take one reading. Successful readings are also published on
    /// [`GaugeDevice::events`].
    async fn read_once(&self) -> GaugeResult<GaugeReading>;

    /// The device's own event channels.
    fn events(&self) -> &DeviceEvents;
}

/// Shared handle to any gauge device.
pub type SharedDevice = Arc<dyn GaugeDevice>;
