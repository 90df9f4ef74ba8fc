//! Configuration file layout.
//!
//! Every section has defaults, so an empty file (or none at all) is a valid
//! configuration.

use super::error::{ConfigError, ConfigResult};
use crate::backoff::ExponentialBackoff;
use crate::driver::{AutoBaudOptions, DriverSettings, DEFAULT_CANDIDATE_BAUDS};
use crate::emulator::EmulatorSettings;
use crate::port::{DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub polling: PollingConfig,
    pub recording: RecordingConfig,
    pub emulator: EmulatorConfig,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values that would stall polling or make auto-baud impossible.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::invalid(
                "polling.interval_ms",
                "must be greater than zero",
            ));
        }
        if self.serial.candidate_bauds.is_empty() {
            return Err(ConfigError::invalid(
                "serial.candidate_bauds",
                "at least one baud rate is required",
            ));
        }
        if let Some(baud) = self
            .serial
            .candidate_bauds
            .iter()
            .chain(std::iter::once(&self.serial.baud_rate))
            .find(|&&b| b == 0)
        {
            return Err(ConfigError::invalid(
                "serial.baud_rate",
                format!("invalid baud rate {baud}"),
            ));
        }
        if self.serial.per_baud_retries == 0 {
            return Err(ConfigError::invalid(
                "serial.per_baud_retries",
                "must be at least 1",
            ));
        }
        if self.serial.command.is_empty() {
            return Err(ConfigError::invalid("serial.command", "must not be empty"));
        }
        self.serial.terminator_byte()?;
        self.serial.prompt_byte()?;
        if let Some(range) = &self.serial.measurement_range {
            if !(range.min_torr < range.max_torr) {
                return Err(ConfigError::invalid(
                    "serial.measurement_range",
                    "min_torr must be below max_torr",
                ));
            }
        }
        if !(self.emulator.period_secs > 0.0) || !self.emulator.period_secs.is_finite() {
            return Err(ConfigError::invalid(
                "emulator.period_secs",
                "must be a positive number of seconds",
            ));
        }
        if self.recording.flush_every == 0 {
            return Err(ConfigError::invalid(
                "recording.flush_every",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Serial line and gauge protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used when auto-baud is off.
    pub baud_rate: u32,
    pub candidate_bauds: Vec<u32>,
    pub auto_baud: bool,
    /// Normal exchange timeout.
    pub read_timeout_ms: u64,
    /// Exchange timeout while scanning baud rates.
    pub scan_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub per_baud_retries: u32,
    pub inter_attempt_delay_ms: u64,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub command: String,
    /// Single character appended to every command.
    pub terminator: String,
    /// Single character that ends every reply.
    pub prompt: String,
    /// Require auto-baud replies to parse as a pressure.
    pub strict_baud_validation: bool,
    pub measurement_range: Option<MeasurementRange>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            candidate_bauds: DEFAULT_CANDIDATE_BAUDS.to_vec(),
            auto_baud: true,
            read_timeout_ms: 1000,
            scan_timeout_ms: 300,
            settle_delay_ms: 200,
            per_baud_retries: 2,
            inter_attempt_delay_ms: 50,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            command: "P".to_string(),
            terminator: "\r".to_string(),
            prompt: ">".to_string(),
            strict_baud_validation: false,
            measurement_range: None,
        }
    }
}

/// Valid measuring range of the connected gauges, in Torr.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRange {
    pub min_torr: f64,
    pub max_torr: f64,
}

fn single_byte(key: &str, value: &str) -> ConfigResult<u8> {
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(ConfigError::invalid(
            key,
            format!("expected a single ASCII character, got {value:?}"),
        )),
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn terminator_byte(&self) -> ConfigResult<u8> {
        single_byte("serial.terminator", &self.terminator)
    }

    pub fn prompt_byte(&self) -> ConfigResult<u8> {
        single_byte("serial.prompt", &self.prompt)
    }

    pub fn port_configuration(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            flow_control: self.flow_control,
            parity: self.parity,
            stop_bits: self.stop_bits,
            timeout: self.read_timeout(),
        }
    }

    pub fn auto_baud_options(&self) -> AutoBaudOptions {
        AutoBaudOptions {
            candidate_bauds: self.candidate_bauds.clone(),
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            per_baud_retries: self.per_baud_retries,
            inter_attempt_delay: Duration::from_millis(self.inter_attempt_delay_ms),
            strict: self.strict_baud_validation,
        }
    }

    pub fn driver_settings(&self) -> ConfigResult<DriverSettings> {
        Ok(DriverSettings {
            port: self.port_configuration(),
            command: self.command.clone(),
            terminator: self.terminator_byte()?,
            prompt: self.prompt_byte()?,
            auto_baud: self.auto_baud.then(|| self.auto_baud_options()),
            measurement_range: self
                .measurement_range
                .map(|range| (range.min_torr, range.max_torr)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Study recording section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub log_directory: PathBuf,
    /// Desired spacing of CSV rows per device.
    pub log_interval_ms: u64,
    /// Rows written between flushes.
    pub flush_every: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_interval_ms: 5000,
            flush_every: crate::study::DEFAULT_FLUSH_EVERY,
        }
    }
}

impl RecordingConfig {
    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }
}

fn default_log_directory() -> PathBuf {
    directories::ProjectDirs::from("", "", super::loader::APP_NAME)
        .map(|dirs| dirs.data_dir().join("studies"))
        .unwrap_or_else(|| PathBuf::from("studies"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub base_torr: f64,
    pub amplitude_torr: f64,
    pub period_secs: f64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            base_torr: 760.0,
            amplitude_torr: 50.0,
            period_secs: 30.0,
        }
    }
}

impl EmulatorConfig {
    pub fn settings(&self) -> EmulatorSettings {
        EmulatorSettings {
            base_torr: self.base_torr,
            amplitude_torr: self.amplitude_torr,
            period: Duration::try_from_secs_f64(self.period_secs).unwrap_or_default(),
        }
    }
}

/// Reconnect policy for devices whose polling loop ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `gauge_logger=debug`. `RUST_LOG`
    /// takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.recording.log_interval_ms, 5000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [serial]
            auto_baud = false
            baud_rate = 19200
            parity = "even"

            [polling]
            interval_ms = 250
        "#,
        )
        .unwrap();

        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.polling.interval(), Duration::from_millis(250));
        assert_eq!(config.serial.command, "P");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_driver_settings_conversion() {
        let mut serial = SerialConfig {
            auto_baud: false,
            measurement_range: Some(MeasurementRange {
                min_torr: 1e-4,
                max_torr: 1000.0,
            }),
            ..SerialConfig::default()
        };
        let settings = serial.driver_settings().unwrap();
        assert_eq!(settings.terminator, b'\r');
        assert_eq!(settings.prompt, b'>');
        assert!(settings.auto_baud.is_none());
        assert_eq!(settings.measurement_range, Some((1e-4, 1000.0)));

        serial.auto_baud = true;
        serial.strict_baud_validation = true;
        let options = serial.driver_settings().unwrap().auto_baud.unwrap();
        assert!(options.strict);
        assert_eq!(options.scan_timeout, Duration::from_millis(300));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.polling.interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key, .. }) if key == "polling.interval_ms"));

        let mut config = Config::default();
        config.serial.candidate_bauds.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.serial.per_baud_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.emulator.period_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.serial.prompt = ">>".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
