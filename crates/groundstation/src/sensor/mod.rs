//! Platform-agnostic sensor abstraction.
//!
//! The station talks to three sources: the BME680 environmental sensor, the
//! UPS and the host itself. Each is a trait so the server can run against
//! real hardware on the Pi or against the simulated backend on a bench.

pub mod simulated;

#[cfg(target_os = "linux")]
pub mod linux;

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, SensorBackend};
use crate::error::{Error, Result};
use crate::telemetry::SystemStats;

/// Kind of sensor, used in log messages and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// The BME680 environmental sensor.
    Environment,
    /// The UPS battery monitor.
    Power,
    /// Host statistics.
    Host,
}

impl SensorKind {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Power => "power",
            Self::Host => "host",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw reading from the environmental sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Relative humidity in percent.
    pub humidity_pct: f64,
    /// Pressure in hPa.
    pub pressure_hpa: f64,
    /// Gas resistance in ohms; `None` while the heater is not stable.
    pub gas_ohms: Option<f64>,
}

/// One set of UPS register values. Registers that could not be read are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerReading {
    /// Battery voltage in mV.
    pub battery_mv: Option<i64>,
    /// Input voltage in mV.
    pub vin_mv: Option<i64>,
    /// Output voltage in mV.
    pub vout_mv: Option<i64>,
    /// Load current in mA.
    pub load_current_ma: Option<i64>,
}

impl PowerReading {
    /// True if no register produced a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.battery_mv.is_none()
            && self.vin_mv.is_none()
            && self.vout_mv.is_none()
            && self.load_current_ma.is_none()
    }
}

/// A source of temperature, humidity, pressure and gas readings.
#[async_trait::async_trait]
pub trait EnvironmentSensor: Send + Sync {
    /// Human-readable name of the device.
    fn name(&self) -> &str;

    /// Take one reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is missing or the read fails.
    async fn read(&self) -> Result<EnvironmentReading>;
}

/// A source of battery and supply readings.
#[async_trait::async_trait]
pub trait PowerMonitor: Send + Sync {
    /// Human-readable name of the device.
    fn name(&self) -> &str;

    /// Read all power registers.
    ///
    /// # Errors
    ///
    /// Returns an error if the UPS cannot be reached at all.
    async fn read(&self) -> Result<PowerReading>;

    /// The UPS's own battery cut-off voltage, if it reports one.
    ///
    /// # Errors
    ///
    /// Returns an error if the UPS cannot be reached.
    async fn minimum_voltage(&self) -> Result<Option<i64>> {
        Ok(None)
    }
}

/// A source of host health statistics.
#[async_trait::async_trait]
pub trait HostSensor: Send + Sync {
    /// Collect host statistics. Unavailable figures are left as `None`.
    async fn sample(&self) -> SystemStats;
}

/// The set of sensors a station reads from.
#[derive(Clone)]
pub struct SensorSuite {
    /// Environmental sensor.
    pub environment: Arc<dyn EnvironmentSensor>,
    /// UPS monitor.
    pub power: Arc<dyn PowerMonitor>,
    /// Host statistics.
    pub host: Arc<dyn HostSensor>,
}

impl std::fmt::Debug for SensorSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSuite")
            .field("environment", &self.environment.name())
            .field("power", &self.power.name())
            .finish_non_exhaustive()
    }
}

impl SensorSuite {
    /// Build the sensors selected by the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        match config.sensor.backend {
            SensorBackend::Simulated => {
                info!("Using simulated sensors");
                Self::simulated()
            }
            SensorBackend::Hardware => Self::hardware(config),
        }
    }

    /// Simulated sensors with plausible drifting values.
    #[must_use]
    pub fn simulated() -> Self {
        Self {
            environment: Arc::new(simulated::SimulatedEnvironment::new()),
            power: Arc::new(simulated::SimulatedPower::new()),
            host: Arc::new(simulated::SimulatedHost),
        }
    }

    #[cfg(target_os = "linux")]
    fn hardware(config: &Config) -> Self {
        if let Err(e) = groundstation_linux::init() {
            tracing::warn!("Hardware initialization reported: {}", e);
        }
        info!(
            "Using {} hardware sensors",
            groundstation_linux::platform_name()
        );
        Self {
            environment: Arc::new(linux::IioEnvironment::from_config(&config.sensor)),
            power: Arc::new(linux::UpsPower::new(
                config.battery.command.clone(),
                config.battery_timeout(),
            )),
            host: Arc::new(linux::LinuxHost::new(
                config.system.thermal_zone.clone(),
                config.disk_path(),
            )),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn hardware(_config: &Config) -> Self {
        tracing::warn!("Hardware sensors are only supported on Linux; readings will be null");
        Self {
            environment: Arc::new(Unavailable),
            power: Arc::new(Unavailable),
            host: Arc::new(Unavailable),
        }
    }
}

/// Stand-in for hardware that does not exist on this platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

#[async_trait::async_trait]
impl EnvironmentSensor for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn read(&self) -> Result<EnvironmentReading> {
        Err(Error::sensor(
            SensorKind::Environment.as_str(),
            "no environmental sensor on this platform",
        ))
    }
}

#[async_trait::async_trait]
impl PowerMonitor for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn read(&self) -> Result<PowerReading> {
        Err(Error::sensor(
            SensorKind::Power.as_str(),
            "no UPS on this platform",
        ))
    }
}

#[async_trait::async_trait]
impl HostSensor for Unavailable {
    async fn sample(&self) -> SystemStats {
        SystemStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_kind_display() {
        assert_eq!(SensorKind::Environment.to_string(), "environment");
        assert_eq!(SensorKind::Power.to_string(), "power");
        assert_eq!(SensorKind::Host.to_string(), "host");
    }

    #[test]
    fn test_power_reading_is_empty() {
        assert!(PowerReading::default().is_empty());
        let reading = PowerReading {
            vin_mv: Some(5000),
            ..PowerReading::default()
        };
        assert!(!reading.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_sensors() {
        let env = Unavailable;
        let err = EnvironmentSensor::read(&env).await.unwrap_err();
        assert!(err.is_sensor_error());

        let err = PowerMonitor::read(&Unavailable).await.unwrap_err();
        assert!(err.is_sensor_error());
        assert_eq!(
            PowerMonitor::minimum_voltage(&Unavailable).await.unwrap(),
            None
        );

        assert_eq!(HostSensor::sample(&Unavailable).await, SystemStats::default());
    }

    #[test]
    fn test_from_config_simulated() {
        let mut config = Config::default();
        config.sensor.backend = SensorBackend::Simulated;
        let suite = SensorSuite::from_config(&config);
        assert_eq!(suite.environment.name(), "simulated-bme680");
        assert_eq!(suite.power.name(), "simulated-ups");
    }
}
