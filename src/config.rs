//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/tc200.toml` (or an explicit path)
//! 2. Environment variables prefixed with `TC200_`; nested keys use `__`
//!    (e.g. `TC200_STABILITY__TOLERANCE_C=0.1`)
//!
//! # Example
//! ```no_run
//! use tc200::config::Tc200Config;
//!
//! let config = Tc200Config::load()?;
//! config.validate()?;
//! println!("Port: {}", config.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! sensor = "NTC10K"
//! tmax_c = 50.0
//! timeout = "2s"
//! log_format = "compact"
//!
//! [stability]
//! tolerance_c = 0.2
//! poll_interval = "2s"
//! target = "60s"
//! ```

use crate::error::{AppResult, Tc200Error};
use crate::hardware::protocol::Sensor;
use crate::hardware::serial::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use crate::hardware::tc200::{DriverOptions, EXPECTED_IDENTITY, TMAX_RANGE_C};
use crate::stability::StabilitySettings;
use crate::tracing_setup::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/tc200.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tc200Config {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM19")
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Sensor attached to the controller
    #[serde(default = "default_sensor")]
    pub sensor: Sensor,
    /// Max allowable temperature (C)
    #[serde(default = "default_tmax")]
    pub tmax_c: f64,
    /// Identity string the controller must report
    #[serde(default = "default_identity")]
    pub expected_identity: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
    /// Stability detection
    #[serde(default)]
    pub stability: StabilitySettings,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_sensor() -> Sensor {
    Sensor::Ntc10k
}

fn default_tmax() -> f64 {
    50.0
}

fn default_identity() -> String {
    EXPECTED_IDENTITY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Tc200Config {
    /// Configuration for `port` with every other field at its default.
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
            sensor: default_sensor(),
            tmax_c: default_tmax(),
            expected_identity: default_identity(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
            stability: StabilitySettings::default(),
        }
    }

    /// Load from [`DEFAULT_CONFIG_PATH`] and environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack, exposed so callers can merge extra sources (e.g. CLI flags).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TC200_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if self.port.trim().is_empty() {
            return Err(Tc200Error::Configuration("port must not be empty".into()));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Tc200Error::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if !TMAX_RANGE_C.contains(&self.tmax_c) {
            return Err(Tc200Error::Configuration(format!(
                "Invalid tmax_c {}. Must be {:.1}-{:.1}",
                self.tmax_c,
                TMAX_RANGE_C.start(),
                TMAX_RANGE_C.end()
            )));
        }

        if self.timeout.is_zero() {
            return Err(Tc200Error::Configuration(
                "timeout must be greater than zero".into(),
            ));
        }

        self.stability
            .validate()
            .map_err(|e| Tc200Error::Configuration(e.to_string()))
    }

    /// Options applied when the driver synchronizes with the controller.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            sensor: self.sensor,
            tmax_c: self.tmax_c,
            expected_identity: self.expected_identity.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let file = write_config(r#"port = "/dev/ttyUSB0""#);
        let config = Tc200Config::load_from(file.path()).unwrap();

        assert_eq!(config, Tc200Config::for_port("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.sensor, Sensor::Ntc10k);
        assert_eq!(config.stability.target, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_file_is_parsed() {
        let file = write_config(
            r#"
            port = "COM19"
            sensor = "PTC1000"
            tmax_c = 80.5
            timeout = "500ms"
            log_level = "debug"
            log_format = "json"

            [stability]
            tolerance_c = 0.1
            poll_interval = "1s"
            target = "5m"
            "#,
        );
        let config = Tc200Config::load_from(file.path()).unwrap();

        assert_eq!(config.port, "COM19");
        assert_eq!(config.sensor, Sensor::Ptc1000);
        assert_eq!(config.tmax_c, 80.5);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.log_format, OutputFormat::Json);
        assert_eq!(config.stability.tolerance_c, 0.1);
        assert_eq!(config.stability.poll_interval, Duration::from_secs(1));
        assert_eq!(config.stability.target, Duration::from_secs(300));

        let options = config.driver_options();
        assert_eq!(options.sensor, Sensor::Ptc1000);
        assert_eq!(options.tmax_c, 80.5);
    }

    #[test]
    fn lowercase_sensor_names_are_accepted() {
        let file = write_config(
            r#"
            port = "/dev/ttyUSB0"
            sensor = "ptc100"
            "#,
        );
        let config = Tc200Config::load_from(file.path()).unwrap();
        assert_eq!(config.sensor, Sensor::Ptc100);
    }

    #[test]
    fn unknown_log_format_fails_to_load() {
        let file = write_config(
            r#"
            port = "/dev/ttyUSB0"
            log_format = "xml"
            "#,
        );
        assert!(Tc200Config::load_from(file.path()).is_err());
    }

    #[test]
    fn missing_port_fails_to_load() {
        let file = write_config("tmax_c = 50.0");
        assert!(Tc200Config::load_from(file.path()).is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = Tc200Config::for_port("/dev/ttyUSB0");
        config.tmax_c = 250.0;
        assert!(config.validate().is_err());

        let mut config = Tc200Config::for_port("/dev/ttyUSB0");
        config.log_level = "verbose".into();
        assert!(config.validate().is_err());

        let mut config = Tc200Config::for_port(" ");
        config.log_level = "info".into();
        assert!(config.validate().is_err());

        let mut config = Tc200Config::for_port("/dev/ttyUSB0");
        config.stability.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(Tc200Error::Configuration(_))
        ));
    }
}
