//! Linux hardware backends built on `groundstation-linux`.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use groundstation_linux::{Bme680Iio, HardwareError, HostSampler, Lifepo4weredCli, Register};
use tracing::{debug, info, warn};

use crate::config::SensorConfig;
use crate::error::{Error, Result};
use crate::telemetry::SystemStats;

use super::{
    EnvironmentReading, EnvironmentSensor, HostSensor, PowerMonitor, PowerReading, SensorKind,
};

fn sensor_error(kind: SensorKind, err: &HardwareError) -> Error {
    Error::sensor(kind.as_str(), err.to_string())
}

/// BME680 read through the IIO driver.
///
/// Without a configured device directory the sensor is looked up on first use
/// and again after any failed read, so a late-probing driver is picked up.
#[derive(Debug)]
pub struct IioEnvironment {
    configured: Option<PathBuf>,
    root: PathBuf,
    device: Mutex<Option<Bme680Iio>>,
}

impl IioEnvironment {
    /// Create from the sensor configuration section.
    #[must_use]
    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(config.iio_device.clone(), config.iio_root.clone())
    }

    /// Create with an optional fixed device directory and the IIO root to search.
    #[must_use]
    pub fn new(configured: Option<PathBuf>, root: PathBuf) -> Self {
        let device = configured.as_ref().map(Bme680Iio::new);
        Self {
            configured,
            root,
            device: Mutex::new(device),
        }
    }

    fn cached(&self) -> Option<Bme680Iio> {
        match self.device.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store(&self, device: Option<Bme680Iio>) {
        match self.device.lock() {
            Ok(mut guard) => *guard = device,
            Err(poisoned) => *poisoned.into_inner() = device,
        }
    }

    async fn device(&self) -> Result<Bme680Iio> {
        if let Some(device) = self.cached() {
            return Ok(device);
        }

        let root = self.root.clone();
        let found = tokio::task::spawn_blocking(move || Bme680Iio::discover(root))
            .await
            .map_err(|e| Error::internal(format!("IIO discovery task failed: {e}")))?
            .map_err(|e| sensor_error(SensorKind::Environment, &e))?;

        info!("BME680 found at {}", found.device_dir().display());
        self.store(Some(found.clone()));
        Ok(found)
    }
}

#[async_trait::async_trait]
impl EnvironmentSensor for IioEnvironment {
    fn name(&self) -> &str {
        "bme680"
    }

    async fn read(&self) -> Result<EnvironmentReading> {
        let device = self.device().await?;
        match device.read().await {
            Ok(r) => Ok(EnvironmentReading {
                temperature_c: r.temperature_c,
                humidity_pct: r.humidity_pct,
                pressure_hpa: r.pressure_hpa,
                gas_ohms: r.gas_ohms,
            }),
            Err(e) => {
                if self.configured.is_none() {
                    self.store(None);
                }
                Err(sensor_error(SensorKind::Environment, &e))
            }
        }
    }
}

/// LiFePO4wered UPS read through `lifepo4wered-cli`.
#[derive(Debug, Clone)]
pub struct UpsPower {
    cli: Lifepo4weredCli,
}

impl UpsPower {
    /// Create a monitor running `command` (program plus leading arguments).
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            cli: Lifepo4weredCli::new(command, timeout),
        }
    }

    async fn register(
        &self,
        register: Register,
    ) -> std::result::Result<Option<i64>, HardwareError> {
        let value = self.cli.get(register).await;
        if let Ok(None) = value {
            debug!("{} printed no value for {}", self.cli.program(), register);
        }
        value
    }
}

#[async_trait::async_trait]
impl PowerMonitor for UpsPower {
    fn name(&self) -> &str {
        "lifepo4wered"
    }

    async fn read(&self) -> Result<PowerReading> {
        let (vbat, vin, vout, iout) = tokio::join!(
            self.register(Register::Vbat),
            self.register(Register::Vin),
            self.register(Register::Vout),
            self.register(Register::Iout),
        );

        let mut failures = Vec::new();
        let mut keep =
            |register: Register, value: std::result::Result<Option<i64>, HardwareError>| {
                value.unwrap_or_else(|e| {
                    failures.push(format!("{register}: {e}"));
                    None
                })
            };

        let reading = PowerReading {
            battery_mv: keep(Register::Vbat, vbat),
            vin_mv: keep(Register::Vin, vin),
            vout_mv: keep(Register::Vout, vout),
            load_current_ma: keep(Register::Iout, iout),
        };

        if reading.is_empty() {
            let message = if failures.is_empty() {
                format!("{} printed no values", self.cli.program())
            } else {
                failures.join("; ")
            };
            return Err(Error::sensor(SensorKind::Power.as_str(), message));
        }
        for failure in &failures {
            warn!("UPS register read failed: {}", failure);
        }
        Ok(reading)
    }

    async fn minimum_voltage(&self) -> Result<Option<i64>> {
        self.cli
            .get(Register::VbatMin)
            .await
            .map_err(|e| sensor_error(SensorKind::Power, &e))
    }
}

/// Host statistics from sysfs, `sysinfo` and `hostname -I`.
#[derive(Debug, Clone)]
pub struct LinuxHost {
    sampler: HostSampler,
}

impl LinuxHost {
    /// Create a host sensor for the given thermal zone and disk path.
    #[must_use]
    pub fn new(thermal_zone: PathBuf, disk_path: PathBuf) -> Self {
        Self {
            sampler: HostSampler::new(thermal_zone, disk_path),
        }
    }
}

#[async_trait::async_trait]
impl HostSensor for LinuxHost {
    async fn sample(&self) -> SystemStats {
        let stats = self.sampler.sample().await;
        SystemStats {
            cpu_temp_c: stats.cpu_temp_c,
            load_1m: stats.load_1m,
            mem_total_mb: stats.mem_total_mb,
            mem_used_mb: stats.mem_used_mb,
            disk_free_gb: stats.disk_free_gb,
            disk_used_pct: stats.disk_used_pct,
            ip_address: stats.ip_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_bme680(root: &Path, dir: &str) -> PathBuf {
        let device = root.join(dir);
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join("name"), "bme680\n").unwrap();
        std::fs::write(device.join("in_temp_input"), "21500\n").unwrap();
        std::fs::write(device.join("in_humidityrelative_input"), "38000\n").unwrap();
        std::fs::write(device.join("in_pressure_input"), "100.5\n").unwrap();
        std::fs::write(device.join("in_resistance_input"), "98000\n").unwrap();
        device
    }

    fn script_ups(script: &str) -> UpsPower {
        UpsPower::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
            ],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_iio_environment_discovers() {
        let root = tempfile::tempdir().unwrap();
        write_bme680(root.path(), "iio:device3");

        let sensor = IioEnvironment::new(None, root.path().to_path_buf());
        let reading = sensor.read().await.unwrap();
        assert!((reading.temperature_c - 21.5).abs() < 1e-9);
        assert!((reading.humidity_pct - 38.0).abs() < 1e-9);
        assert!((reading.pressure_hpa - 1005.0).abs() < 1e-9);
        assert_eq!(reading.gas_ohms, Some(98_000.0));
    }

    #[tokio::test]
    async fn test_iio_environment_configured_device() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_bme680(root.path(), "custom");

        let sensor = IioEnvironment::new(Some(dir), PathBuf::from("/nonexistent"));
        assert!(sensor.read().await.is_ok());
    }

    #[tokio::test]
    async fn test_iio_environment_missing_device() {
        let root = tempfile::tempdir().unwrap();
        let sensor = IioEnvironment::new(None, root.path().to_path_buf());

        let err = sensor.read().await.unwrap_err();
        assert!(err.is_sensor_error());

        // Appears later and is picked up on the next read
        write_bme680(root.path(), "iio:device0");
        assert!(sensor.read().await.is_ok());
    }

    #[tokio::test]
    async fn test_ups_reads_all_registers() {
        let ups = script_ups(
            r#"case "$2" in
                VBAT) echo "VBAT = 3412" ;;
                VIN) echo "VIN = 5021" ;;
                VOUT) echo "VOUT = 5105" ;;
                IOUT) echo "IOUT = 415" ;;
                VBAT_MIN) echo "VBAT_MIN = 2850" ;;
            esac"#,
        );

        let reading = ups.read().await.unwrap();
        assert_eq!(reading.battery_mv, Some(3412));
        assert_eq!(reading.vin_mv, Some(5021));
        assert_eq!(reading.vout_mv, Some(5105));
        assert_eq!(reading.load_current_ma, Some(415));
        assert_eq!(ups.minimum_voltage().await.unwrap(), Some(2850));
    }

    #[tokio::test]
    async fn test_ups_partial_failure() {
        let ups = script_ups(
            r#"case "$2" in
                VBAT) echo 3380 ;;
                *) exit 1 ;;
            esac"#,
        );

        let reading = ups.read().await.unwrap();
        assert_eq!(reading.battery_mv, Some(3380));
        assert_eq!(reading.vin_mv, None);
        assert_eq!(reading.load_current_ma, None);
    }

    #[tokio::test]
    async fn test_ups_silent_is_unavailable() {
        let ups = script_ups("true");
        let err = ups.read().await.unwrap_err();
        assert!(err.is_sensor_error());
        assert!(err.to_string().contains("printed no values"), "{err}");
    }

    #[tokio::test]
    async fn test_ups_total_failure() {
        let ups = UpsPower::new(
            vec!["/nonexistent/lifepo4wered-cli".to_string()],
            Duration::from_secs(1),
        );
        let err = ups.read().await.unwrap_err();
        assert!(err.is_sensor_error());
    }
}
