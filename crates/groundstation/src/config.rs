//! Configuration management for groundstation.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "groundstation";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "telemetry.db";

/// Default flight log directory name.
const FLIGHT_LOG_DIR_NAME: &str = "flight_logs";

/// Longest retention accepted for `storage.max_age_days`.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GROUNDSTATION_`, sections split by `__`)
/// 2. TOML config file at `~/.config/groundstation/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Sampling loop configuration.
    pub sampler: SamplerConfig,
    /// Environmental sensor configuration.
    pub sensor: SensorConfig,
    /// UPS battery configuration.
    pub battery: BatteryConfig,
    /// Flight log configuration.
    pub recorder: RecorderConfig,
    /// Sample archive configuration.
    pub storage: StorageConfig,
    /// Host statistics configuration.
    pub system: SystemConfig,
    /// `camera-streamer` configuration.
    pub camera: CameraConfig,
    /// systemd unit configuration.
    pub service: ServiceConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind. `0.0.0.0` makes the page reachable from the LAN.
    pub bind_address: String,
    /// TCP port.
    pub port: u16,
}

/// Sampling loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Interval between samples in milliseconds.
    pub interval_ms: u64,
    /// Store every sample in the SQLite archive.
    pub archive: bool,
}

/// Which sensor implementations to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    /// Real hardware: BME680 over IIO, LiFePO4wered UPS, host sysfs.
    #[default]
    Hardware,
    /// Synthetic readings, for bench testing away from the drone.
    Simulated,
}

/// Environmental sensor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor implementation.
    pub backend: SensorBackend,
    /// IIO device directory of the BME680. Discovered under `iio_root` if unset.
    pub iio_device: Option<PathBuf>,
    /// Root of the IIO device tree.
    pub iio_root: PathBuf,
    /// Sea-level pressure used for the altitude estimate, in hPa.
    pub sea_level_pressure_hpa: f64,
}

/// UPS battery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// UPS utility plus any leading arguments.
    pub command: Vec<String>,
    /// Battery voltage reported as 0%, in mV.
    pub min_mv: i64,
    /// Battery voltage reported as 100%, in mV.
    pub max_mv: i64,
    /// Take the 0% point from the UPS `VBAT_MIN` register instead of `min_mv`.
    pub use_device_min: bool,
    /// Charge at or below which the battery is reported low, in percent.
    pub low_percent: u8,
    /// Timeout for each utility invocation in milliseconds.
    pub command_timeout_ms: u64,
}

/// Flight log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory for CSV flight logs.
    /// Defaults to `~/.local/share/groundstation/flight_logs`
    pub log_dir: Option<PathBuf>,
    /// Base name used when a log is started without one.
    pub default_name: String,
}

/// Sample archive configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/groundstation/telemetry.db`
    pub database_path: Option<PathBuf>,
    /// Maximum number of samples to retain.
    /// Set to 0 for unlimited.
    pub max_samples: usize,
    /// Maximum age of samples to retain in days.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
    /// Prune interval in hours.
    pub prune_interval_hours: u32,
}

/// Host statistics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Thermal zone holding the CPU temperature in millidegrees.
    pub thermal_zone: PathBuf,
    /// Path whose filesystem is reported as disk usage. Defaults to the log directory.
    pub disk_path: Option<PathBuf>,
}

/// `camera-streamer` configuration, rendered into its systemd unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Path to the `camera-streamer` binary.
    pub binary: PathBuf,
    /// libcamera device path, e.g. `/base/soc/i2c0mux/i2c@1/imx708@1a`.
    pub camera_path: Option<String>,
    /// Camera backend (`libcamera` or `v4l2`).
    pub camera_type: String,
    /// Capture pixel format.
    pub format: String,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Capture frame rate.
    pub fps: u32,
    /// Number of capture buffers.
    pub nbufs: Option<u32>,
    /// Extra `--camera-options` values such as `AfMode=2`.
    pub options: Vec<String>,
    /// Address the streamer's HTTP server listens on.
    pub http_listen: String,
    /// Port of the streamer's HTTP server.
    pub http_port: u16,
    /// Enable the RTSP server.
    pub rtsp: bool,
    /// Additional raw arguments appended to the command line.
    pub extra_args: Vec<String>,
    /// Host name browsers use to reach the drone.
    pub public_host: String,
    /// Path of the embedded stream page.
    pub stream_path: String,
}

/// systemd unit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory units are installed into.
    pub unit_dir: PathBuf,
    /// User the ground station runs as. The camera unit always uses `DynamicUser`.
    pub user: Option<String>,
    /// Unit name (without `.service`) for the camera.
    pub camera_unit: String,
    /// Unit name (without `.service`) for the ground station.
    pub station_unit: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            archive: true,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Hardware,
            iio_device: None,
            iio_root: PathBuf::from("/sys/bus/iio/devices"),
            sea_level_pressure_hpa: 1013.25,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            command: vec!["lifepo4wered-cli".to_string()],
            min_mv: 3200,
            max_mv: 3600,
            use_device_min: false,
            low_percent: 20,
            command_timeout_ms: 2000,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            default_name: "fire_mission".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            max_samples: 500_000,
            max_age_days: 30,
            prune_interval_hours: 24,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            disk_path: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/camera-streamer"),
            camera_path: None,
            camera_type: "libcamera".to_string(),
            format: "YUYV".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            nbufs: Some(2),
            options: Vec::new(),
            http_listen: "0.0.0.0".to_string(),
            http_port: 8080,
            rtsp: false,
            extra_args: Vec::new(),
            public_host: "drone.local".to_string(),
            stream_path: "/webrtc".to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
            user: None,
            camera_unit: "camera-streamer".to_string(),
            station_unit: "groundstation".to_string(),
        }
    }
}

impl CameraConfig {
    /// URL of the live stream page embedded by the telemetry page.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.public_host, self.http_port, self.stream_path
        )
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `GROUNDSTATION_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("GROUNDSTATION_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.battery.min_mv >= self.battery.max_mv {
            return Err(Error::ConfigValidation {
                message: format!(
                    "battery.min_mv ({}) must be less than battery.max_mv ({})",
                    self.battery.min_mv, self.battery.max_mv
                ),
            });
        }

        if self.sampler.interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "sampler.interval_ms must be greater than 0".to_string(),
            });
        }

        if self.battery.low_percent > 100 {
            return Err(Error::ConfigValidation {
                message: format!(
                    "battery.low_percent ({}) must be at most 100",
                    self.battery.low_percent
                ),
            });
        }

        if self.storage.max_age_days > MAX_RETENTION_DAYS {
            return Err(Error::ConfigValidation {
                message: format!(
                    "storage.max_age_days ({}) must be at most {MAX_RETENTION_DAYS}",
                    self.storage.max_age_days
                ),
            });
        }

        if self.server.port == 0 {
            return Err(Error::ConfigValidation {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        if self.sensor.sea_level_pressure_hpa <= 0.0 {
            return Err(Error::ConfigValidation {
                message: "sensor.sea_level_pressure_hpa must be positive".to_string(),
            });
        }

        if self.recorder.default_name.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "recorder.default_name cannot be empty".to_string(),
            });
        }

        if self.camera.width == 0 || self.camera.height == 0 || self.camera.fps == 0 {
            return Err(Error::ConfigValidation {
                message: "camera width, height and fps must be greater than 0".to_string(),
            });
        }

        if !self.camera.stream_path.starts_with('/') {
            return Err(Error::ConfigValidation {
                message: format!(
                    "camera.stream_path must start with '/': {}",
                    self.camera.stream_path
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the flight log directory, resolving defaults if not set.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.recorder
            .log_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(FLIGHT_LOG_DIR_NAME))
    }

    /// Get the path whose filesystem is reported in host statistics.
    #[must_use]
    pub fn disk_path(&self) -> PathBuf {
        self.system.disk_path.clone().unwrap_or_else(|| self.log_dir())
    }

    /// Get the `address:port` the server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// Get the sample interval as a Duration.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sampler.interval_ms)
    }

    /// Get the UPS utility timeout as a Duration.
    #[must_use]
    pub fn battery_timeout(&self) -> Duration {
        Duration::from_millis(self.battery.command_timeout_ms)
    }

    /// Get the max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Get the prune interval as a Duration.
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.storage.prune_interval_hours) * 60 * 60)
    }
}
