//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Directory name under the platform config and data directories.
pub(crate) const APP_NAME: &str = "gauge-logger";

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "GAUGE_LOGGER";

const CONFIG_FILE_NAME: &str = "gauge-logger.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "GAUGE_LOGGER_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using the standard resolution order:
    ///
    /// 1. `GAUGE_LOGGER_CONFIG` (explicit path)
    /// 2. `./gauge-logger.toml`
    /// 3. `gauge-logger.toml` in the platform config directory
    /// 4. Built-in defaults
    ///
    /// Environment overrides are applied on top and the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        debug!(path = ?config_path, "configuration loaded");
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path. The file must exist.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides, no file.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write the current configuration as TOML, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    default_config_path().filter(|path| path.exists())
}

/// Platform config file location, whether or not it exists.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse `GAUGE_LOGGER_<key>` into `target` if it is set.
fn env_override<T>(key: &str, target: &mut T) -> ConfigResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(val) = std::env::var(&var) {
        *target = val
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::env_parse(&var, e.to_string()))?;
    }
    Ok(())
}

fn env_override_bool(key: &str, target: &mut bool) -> ConfigResult<()> {
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(val) = std::env::var(&var) {
        *target = match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::env_parse(var, "expected true or false")),
        };
    }
    Ok(())
}

/// Apply `GAUGE_LOGGER_<SECTION>_<KEY>` overrides, e.g.
/// `GAUGE_LOGGER_POLLING_INTERVAL_MS=250`.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    let serial = &mut config.serial;
    env_override("SERIAL_BAUD_RATE", &mut serial.baud_rate)?;
    env_override_bool("SERIAL_AUTO_BAUD", &mut serial.auto_baud)?;
    env_override("SERIAL_READ_TIMEOUT_MS", &mut serial.read_timeout_ms)?;
    env_override("SERIAL_SCAN_TIMEOUT_MS", &mut serial.scan_timeout_ms)?;
    env_override("SERIAL_SETTLE_DELAY_MS", &mut serial.settle_delay_ms)?;
    env_override("SERIAL_PER_BAUD_RETRIES", &mut serial.per_baud_retries)?;
    env_override("SERIAL_COMMAND", &mut serial.command)?;
    env_override_bool(
        "SERIAL_STRICT_BAUD_VALIDATION",
        &mut serial.strict_baud_validation,
    )?;
    let var = format!("{ENV_PREFIX}_SERIAL_CANDIDATE_BAUDS");
    if let Ok(val) = std::env::var(&var) {
        serial.candidate_bauds = val
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigError::env_parse(&var, e.to_string()))?;
    }

    env_override("POLLING_INTERVAL_MS", &mut config.polling.interval_ms)?;

    let recording = &mut config.recording;
    env_override("RECORDING_LOG_DIRECTORY", &mut recording.log_directory)?;
    env_override("RECORDING_LOG_INTERVAL_MS", &mut recording.log_interval_ms)?;
    env_override("RECORDING_FLUSH_EVERY", &mut recording.flush_every)?;

    env_override("EMULATOR_BASE_TORR", &mut config.emulator.base_torr)?;
    env_override("EMULATOR_AMPLITUDE_TORR", &mut config.emulator.amplitude_torr)?;
    env_override("EMULATOR_PERIOD_SECS", &mut config.emulator.period_secs)?;

    env_override_bool("RECONNECT_ENABLED", &mut config.reconnect.enabled)?;
    env_override("RECONNECT_INITIAL_DELAY_MS", &mut config.reconnect.initial_delay_ms)?;
    env_override("RECONNECT_MAX_DELAY_MS", &mut config.reconnect.max_delay_ms)?;

    env_override("LOGGING_LEVEL", &mut config.logging.level)?;
    env_override::<LogFormat>("LOGGING_FORMAT", &mut config.logging.format)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert!(loader.config_path.is_none());
        assert_eq!(loader.config().polling.interval_ms, 500);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("GAUGE_LOGGER_POLLING_INTERVAL_MS", "250");
        env::set_var("GAUGE_LOGGER_SERIAL_AUTO_BAUD", "off");
        env::set_var("GAUGE_LOGGER_SERIAL_CANDIDATE_BAUDS", "19200, 9600");
        env::set_var("GAUGE_LOGGER_LOGGING_FORMAT", "json");

        let loader = ConfigLoader::with_defaults();

        env::remove_var("GAUGE_LOGGER_POLLING_INTERVAL_MS");
        env::remove_var("GAUGE_LOGGER_SERIAL_AUTO_BAUD");
        env::remove_var("GAUGE_LOGGER_SERIAL_CANDIDATE_BAUDS");
        env::remove_var("GAUGE_LOGGER_LOGGING_FORMAT");

        let config = loader.unwrap().into_config();
        assert_eq!(config.polling.interval_ms, 250);
        assert!(!config.serial.auto_baud);
        assert_eq!(config.serial.candidate_bauds, vec![19200, 9600]);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_reported() {
        env::set_var("GAUGE_LOGGER_SERIAL_BAUD_RATE", "fast");
        let result = ConfigLoader::with_defaults();
        env::remove_var("GAUGE_LOGGER_SERIAL_BAUD_RATE");

        match result {
            Err(ConfigError::EnvParse { var, .. }) => {
                assert_eq!(var, "GAUGE_LOGGER_SERIAL_BAUD_RATE")
            }
            other => panic!("expected env parse error, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_env_can_invalidate_config() {
        env::set_var("GAUGE_LOGGER_POLLING_INTERVAL_MS", "0");
        let result = ConfigLoader::with_defaults();
        env::remove_var("GAUGE_LOGGER_POLLING_INTERVAL_MS");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    #[serial]
    fn test_load_from_file_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauge-logger.toml");
        std::fs::write(
            &path,
            "[recording]\nlog_interval_ms = 1000\n\n[emulator]\nperiod_secs = 10.0\n",
        )
        .unwrap();

        let loader = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(loader.config().recording.log_interval_ms, 1000);
        assert_eq!(loader.config().emulator.period_secs, 10.0);

        let copy = dir.path().join("nested").join("copy.toml");
        loader.save_to(&copy).unwrap();
        let reloaded = ConfigLoader::load_from(&copy).unwrap();
        assert_eq!(reloaded.config(), loader.config());
    }

    #[test]
    #[serial]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConfigLoader::load_from(dir.path().join("absent.toml")),
            Err(ConfigError::NotFound(_))
        ));

        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[polling\ninterval_ms = ").unwrap();
        assert!(matches!(
            ConfigLoader::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_explicit_path_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[polling]\ninterval_ms = 750\n").unwrap();

        env::set_var(CONFIG_PATH_ENV, &path);
        let resolved = resolve_config_path();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(resolved, Some(path));
    }
}
