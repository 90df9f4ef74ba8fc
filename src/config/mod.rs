//! Configuration for gauge-logger.
//!
//! TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `GAUGE_LOGGER_CONFIG` environment variable (explicit path)
//! 2. `./gauge-logger.toml` (current directory)
//! 3. `gauge-logger.toml` in the platform config directory
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `GAUGE_LOGGER_<SECTION>_<KEY>`, for example:
//! - `GAUGE_LOGGER_POLLING_INTERVAL_MS=250`
//! - `GAUGE_LOGGER_SERIAL_CANDIDATE_BAUDS=9600,19200`
//! - `GAUGE_LOGGER_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```toml
//! [serial]
//! auto_baud = true
//! candidate_bauds = [9600, 19200, 38400]
//!
//! [polling]
//! interval_ms = 500
//!
//! [recording]
//! log_directory = "/var/lib/gauge-logger"
//! log_interval_ms = 5000
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{
    Config, EmulatorConfig, LogFormat, LoggingConfig, MeasurementRange, PollingConfig,
    ReconnectConfig, RecordingConfig, SerialConfig,
};
