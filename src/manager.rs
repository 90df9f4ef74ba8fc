//! Multi-device polling.
//!
//! The [`DeviceManager`] runs one polling task per device, all at the same
//! interval, with no lock shared between devices on the hot path. Readings
//! and connection losses from every task are fanned into one broadcast
//! channel each, and handed synchronously to every registered
//! [`ReadingSink`].
//!
//! ```text
//! device A task ─┐                ┌─> broadcast (UI, CLI echo)
//! device B task ─┼──> ManagerHub ─┤
//! device C task ─┘                └─> ReadingSink (study sessions)
//! ```

use crate::device::{ConnectionLost, SharedDevice};
use crate::error::GaugeError;
use crate::reading::GaugeReading;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// Synchronous consumer of the manager's combined stream.
///
/// Called on the polling task of the device that produced the event, so
/// implementations must be cheap and must not block for long. Calls for
/// different devices may arrive concurrently.
pub trait ReadingSink: Send + Sync {
    fn on_reading(&self, reading: &GaugeReading);

    fn on_connection_lost(&self, _event: &ConnectionLost) {}
}

/// Handle returned by [`DeviceManager::add_sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

struct ManagerHub {
    readings: broadcast::Sender<GaugeReading>,
    connection_lost: broadcast::Sender<ConnectionLost>,
    sinks: RwLock<Vec<(SinkId, Arc<dyn ReadingSink>)>>,
}

impl ManagerHub {
    fn sinks(&self) -> Vec<Arc<dyn ReadingSink>> {
        self.sinks.read().iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    fn publish_reading(&self, reading: &GaugeReading) {
        let _ = self.readings.send(reading.clone());
        for sink in self.sinks() {
            sink.on_reading(reading);
        }
    }

    fn publish_connection_lost(&self, device_id: &str, error: &GaugeError) {
        let event = ConnectionLost {
            device_id: device_id.to_string(),
            reason: error.to_string(),
        };
        let _ = self.connection_lost.send(event.clone());
        for sink in self.sinks() {
            sink.on_connection_lost(&event);
        }
    }
}

struct ManagedDevice {
    device: SharedDevice,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns a set of gauge devices and polls each on its own task.
pub struct DeviceManager {
    poll_interval: Duration,
    devices: Mutex<HashMap<String, ManagedDevice>>,
    hub: Arc<ManagerHub>,
    next_sink: AtomicU64,
}

impl DeviceManager {
    pub fn new(poll_interval: Duration) -> Self {
        let (readings, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (connection_lost, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            poll_interval,
            devices: Mutex::new(HashMap::new()),
            hub: Arc::new(ManagerHub {
                readings,
                connection_lost,
                sinks: RwLock::new(Vec::new()),
            }),
            next_sink: AtomicU64::new(0),
        }
    }

    /// Interval shared by every polling task.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start polling `device`. Returns `false` (and does nothing) when a
    /// device with the same id is already managed.
    ///
    /// The device should already be connected; the manager only polls.
    /// Must be called from within a Tokio runtime.
    pub fn add_device(&self, device: SharedDevice) -> bool {
        let device_id = device.device_id().to_string();
        let mut devices = self.devices.lock();
        if devices.contains_key(&device_id) {
            debug!(device = %device_id, "already managed");
            return false;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&device),
            Arc::clone(&self.hub),
            self.poll_interval,
            shutdown_rx,
        ));
        devices.insert(
            device_id.clone(),
            ManagedDevice {
                device,
                shutdown,
                task,
            },
        );
        info!(device = %device_id, interval = ?self.poll_interval, "device added");
        true
    }

    /// Stop polling `device_id` and forget it. Returns `false` if unknown.
    ///
    /// Waits for the polling task to finish, which includes disconnecting
    /// the device.
    pub async fn remove_device(&self, device_id: &str) -> bool {
        let Some(managed) = self.devices.lock().remove(device_id) else {
            return false;
        };
        stop(managed).await;
        info!(device = %device_id, "device removed");
        true
    }

    /// Stop every polling task, disconnect every device and drop all sinks.
    pub async fn shutdown(&self) {
        let managed: Vec<ManagedDevice> = self.devices.lock().drain().map(|(_, m)| m).collect();
        let count = managed.len();
        futures::future::join_all(managed.into_iter().map(stop)).await;
        self.hub.sinks.write().clear();
        info!(devices = count, "device manager shut down");
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.lock().contains_key(device_id)
    }

    pub fn device(&self, device_id: &str) -> Option<SharedDevice> {
        self.devices
            .lock()
            .get(device_id)
            .map(|m| Arc::clone(&m.device))
    }

    /// Ids of every managed device, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// True while the device's polling task is still running.
    pub fn is_polling(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .get(device_id)
            .is_some_and(|m| !m.task.is_finished())
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Combined reading stream of every device.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<GaugeReading> {
        self.hub.readings.subscribe()
    }

    /// Combined connection-loss stream of every device.
    pub fn subscribe_connection_lost(&self) -> broadcast::Receiver<ConnectionLost> {
        self.hub.connection_lost.subscribe()
    }

    /// Register a synchronous consumer.
    pub fn add_sink(&self, sink: Arc<dyn ReadingSink>) -> SinkId {
        let id = SinkId(self.next_sink.fetch_add(1, Ordering::Relaxed));
        self.hub.sinks.write().push((id, sink));
        id
    }

    /// Unregister a consumer. Returns `false` if it was not registered.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        let mut sinks = self.hub.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        // Dropping the shutdown senders ends every loop at its next
        // suspension point; each loop disconnects its own device.
        self.devices.lock().clear();
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("poll_interval", &self.poll_interval)
            .field("devices", &self.device_ids())
            .finish()
    }
}

async fn stop(managed: ManagedDevice) {
    let _ = managed.shutdown.send(());
    if let Err(e) = managed.task.await {
        warn!(device = %managed.device.device_id(), error = %e, "polling task ended abnormally");
    }
    // The loop disconnects on exit; repeat in case it had already ended.
    managed.device.disconnect().await;
}

async fn poll_loop(
    device: SharedDevice,
    hub: Arc<ManagerHub>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let device_id = device.device_id().to_string();
    debug!(device = %device_id, "polling started");

    loop {
        let result = tokio::select! {
            _ = &mut shutdown => break,
            result = device.read_once() => result,
        };

        match result {
            Ok(reading) => hub.publish_reading(&reading),
            Err(e) if e.is_recoverable() => {
                warn!(device = %device_id, error = %e, "skipping unreadable response");
            }
            Err(e) => {
                warn!(device = %device_id, error = %e, "polling stopped, connection lost");
                hub.publish_connection_lost(&device_id, &e);
                break;
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    device.disconnect().await;
    debug!(device = %device_id, "polling finished");
}
