//! Vacuum gauge acquisition library.
//!
//! Polls any number of serial vacuum gauges (or emulated ones) at a shared
//! cadence and records their readings into per-study CSV files.
//!
//! # Modules
//!
//! - `pressure`: parsing of gauge replies into Torr
//! - `reading`: timestamped readings and status flags
//! - `port`: serial transport abstraction, real and mock
//! - `driver`: command/response protocol and baud rate detection
//! - `device`: the gauge device capability shared by drivers and emulators
//! - `emulator`: synthetic gauge
//! - `manager`: one polling task per device, combined event stream
//! - `study`: study records and down-sampled CSV recording
//! - `backoff`: reconnect delay policy
//! - `config`: TOML configuration with environment overrides
//! - `logging`: tracing subscriber set-up
//! - `error`: device-level error taxonomy

pub mod backoff;
pub mod config;
pub mod device;
pub mod driver;
pub mod emulator;
pub mod error;
pub mod logging;
pub mod manager;
pub mod port;
pub mod pressure;
pub mod reading;
pub mod study;

pub use backoff::ExponentialBackoff;
pub use config::{Config, ConfigError, ConfigLoader};
pub use device::{ConnectionLost, DeviceType, GaugeDevice, SharedDevice};
pub use driver::{AutoBaudOptions, ConnectionState, DriverSettings, GaugeDriver};
pub use emulator::{EmulatorSettings, GaugeEmulator};
pub use error::{GaugeError, GaugeResult};
pub use manager::{DeviceManager, ReadingSink, SinkId};
pub use port::{PortConfiguration, PortError, PortOpener, SerialTransport};
pub use pressure::{ParseError, PressureReading, PressureUnit};
pub use reading::{GaugeReading, ReadingStatus};
pub use study::{SessionStatus, Study, StudyError, StudyId, StudySession, StudyState};
