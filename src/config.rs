//! Configuration loading using Figment
//!
//! Configuration is resolved from, in increasing priority:
//! 1. built-in defaults (every section is optional),
//! 2. a TOML file (`config/default.toml` unless another path is given),
//! 3. environment variables prefixed with `SENSOR_LOGGER_`, nested keys separated
//!    by a double underscore.
//!
//! # Example
//! ```no_run
//! use sensor_logger::config::LoggerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // SENSOR_LOGGER_PIPELINE__MAX_QUEUE_SIZE=1000 overrides the file value
//! let config = LoggerConfig::load()?;
//! config.validate()?;
//! println!("Reading from {}", config.device.path.display());
//! # Ok(())
//! # }
//! ```

use crate::error::{LoggerError, LoggerResult};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SENSOR_LOGGER_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device stream settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Kind naming (instance and category prefixes)
    #[serde(default)]
    pub naming: NamingConfig,
    /// Queue and loop tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Device sensor name -> canonical name
    #[serde(default = "default_sensors")]
    pub sensors: BTreeMap<String, String>,
    /// Where delivered readings are written
    #[serde(default)]
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Device stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path of the device node or file carrying `name: value` lines
    #[serde(default = "default_device_path")]
    pub path: PathBuf,
    /// Baud rate; when set the port is opened as a serial port
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Serial read timeout
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Wait before reopening a failed stream
    #[serde(default = "default_reader_backoff", with = "humantime_serde")]
    pub reader_backoff: Duration,
}

/// Naming of queue kinds.
///
/// A kind is `instance_prefix + category prefix + name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Identifies this logger instance
    #[serde(default)]
    pub instance_prefix: String,
    /// Category prefix for sensor readings
    #[serde(default = "default_reading_prefix")]
    pub reading_prefix: String,
    /// Category prefix for connection quality metrics
    #[serde(default = "default_connection_prefix")]
    pub connection_prefix: String,
}

/// Queue capacity and loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Approximate in-memory queue limit; cycles are dropped at or above it
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Period of the scraper loop
    #[serde(default = "default_scrape_interval", with = "humantime_serde")]
    pub scrape_interval: Duration,
    /// Period of the statistics emission task
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
    /// Sleep after a failed scrape cycle
    #[serde(default = "default_scrape_cooldown", with = "humantime_serde")]
    pub scrape_cooldown: Duration,
    /// Sleep after a failed statistics cycle
    #[serde(default = "default_stats_cooldown", with = "humantime_serde")]
    pub stats_cooldown: Duration,
    /// Number of delivery workers draining the queue
    #[serde(default = "default_consumers")]
    pub consumers: usize,
}

/// Delivery output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON-lines file; stdout when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// Default value functions
fn default_name() -> String {
    "sensor-logger".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/ttyUSB0")
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reader_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_reading_prefix() -> String {
    "reading:".to_string()
}

fn default_connection_prefix() -> String {
    "connection:".to_string()
}

fn default_max_queue_size() -> usize {
    256 * 1024
}

fn default_scrape_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_scrape_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_stats_cooldown() -> Duration {
    Duration::from_secs(120)
}

fn default_consumers() -> usize {
    1
}

/// Sensors reported by the weather station firmware.
pub fn default_sensors() -> BTreeMap<String, String> {
    [
        ("Humidity", "humidity"),
        ("Temperature", "temperature"),
        ("Water level", "water_level"),
        ("Pressure", "pressure"),
        ("PM 1.0 standard", "pm_10_std"),
        ("PM 2.5 standard", "pm_25_std"),
        ("PM 10.0 standard", "pm_100_std"),
        ("PM 1.0 environmental", "pm_10_env"),
        ("PM 2.5 environmental", "pm_25_env"),
        ("PM 10.0 environmental", "pm_100_env"),
        ("Particles > 0.3um / 0.1L air", "particles_03"),
        ("Particles > 0.5um / 0.1L air", "particles_05"),
        ("Particles > 1.0um / 0.1L air", "particles_10"),
        ("Particles > 2.5um / 0.1L air", "particles_25"),
        ("Particles > 5.0um / 0.1L air", "particles_50"),
        ("Particles > 10.0 um / 0.1L air", "particles_100"),
    ]
    .into_iter()
    .map(|(device, canonical)| (device.to_string(), canonical.to_string()))
    .collect()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            device: DeviceConfig::default(),
            naming: NamingConfig::default(),
            pipeline: PipelineConfig::default(),
            sensors: default_sensors(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device_path(),
            baud_rate: None,
            read_timeout: default_read_timeout(),
            reader_backoff: default_reader_backoff(),
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            instance_prefix: String::new(),
            reading_prefix: default_reading_prefix(),
            connection_prefix: default_connection_prefix(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            scrape_interval: default_scrape_interval(),
            stats_interval: default_stats_interval(),
            scrape_cooldown: default_scrape_cooldown(),
            stats_cooldown: default_stats_cooldown(),
            consumers: default_consumers(),
        }
    }
}

impl NamingConfig {
    /// Kind under which a sensor reading is stored.
    pub fn reading_kind(&self, canonical_name: &str) -> String {
        format!(
            "{}{}{}",
            self.instance_prefix, self.reading_prefix, canonical_name
        )
    }

    /// Kind under which a connection quality metric is stored.
    pub fn connection_kind(&self, metric_name: &str) -> String {
        format!(
            "{}{}{}",
            self.instance_prefix, self.connection_prefix, metric_name
        )
    }
}

impl LoggerConfig {
    /// Load configuration from `config/default.toml` and environment variables
    pub fn load() -> LoggerResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> LoggerResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> LoggerResult<()> {
        crate::logging::parse_log_level(&self.application.log_level)
            .map_err(LoggerError::Configuration)?;

        if self.device.path.as_os_str().is_empty() {
            return Err(LoggerError::Configuration(
                "device.path must not be empty".to_string(),
            ));
        }

        #[cfg(not(feature = "instrument_serial"))]
        if self.device.baud_rate.is_some() {
            return Err(LoggerError::SerialFeatureDisabled);
        }

        if self.pipeline.max_queue_size == 0 {
            return Err(LoggerError::Configuration(
                "pipeline.max_queue_size must be at least 1".to_string(),
            ));
        }

        let intervals = [
            ("pipeline.scrape_interval", self.pipeline.scrape_interval),
            ("pipeline.stats_interval", self.pipeline.stats_interval),
            ("pipeline.scrape_cooldown", self.pipeline.scrape_cooldown),
            ("pipeline.stats_cooldown", self.pipeline.stats_cooldown),
            ("device.reader_backoff", self.device.reader_backoff),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(LoggerError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.pipeline.consumers == 0 {
            return Err(LoggerError::Configuration(
                "pipeline.consumers must be at least 1".to_string(),
            ));
        }

        if self.sensors.is_empty() {
            return Err(LoggerError::Configuration(
                "at least one sensor mapping is required".to_string(),
            ));
        }
        for (device_name, canonical) in &self.sensors {
            if canonical.trim().is_empty() {
                return Err(LoggerError::Configuration(format!(
                    "sensor '{}' maps to an empty name",
                    device_name
                )));
            }
        }

        Ok(())
    }

    /// Render the resolved configuration as TOML.
    pub fn to_toml(&self) -> LoggerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LoggerError::Configuration(format!("cannot render config: {}", e)))
    }
}
