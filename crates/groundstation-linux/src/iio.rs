//! BME680 access through the Linux IIO subsystem.
//!
//! With `dtoverlay=i2c-sensor,bme680` the kernel driver exposes the sensor as
//! `/sys/bus/iio/devices/iio:deviceN`. Reading an `*_input` attribute triggers
//! a forced-mode measurement, so reads block for a few hundred milliseconds and
//! are pushed onto the blocking pool.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{HardwareError, Result};

/// Default location of IIO devices in sysfs.
pub const DEFAULT_IIO_ROOT: &str = "/sys/bus/iio/devices";

/// Name reported by the kernel's BME680 driver.
pub const BME680_NAME: &str = "bme680";

const TEMPERATURE_ATTR: &str = "in_temp_input";
const HUMIDITY_ATTR: &str = "in_humidityrelative_input";
const PRESSURE_ATTR: &str = "in_pressure_input";
const GAS_ATTR: &str = "in_resistance_input";

/// One environmental measurement, already converted to display units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Relative humidity in percent.
    pub humidity_pct: f64,
    /// Barometric pressure in hectopascal.
    pub pressure_hpa: f64,
    /// Gas sensor resistance in ohms. The heater is not always ready, in
    /// which case the driver refuses the read.
    pub gas_ohms: Option<f64>,
}

/// A BME680 bound to the IIO driver.
#[derive(Debug, Clone)]
pub struct Bme680Iio {
    device_dir: PathBuf,
}

impl Bme680Iio {
    /// Use a known device directory such as `/sys/bus/iio/devices/iio:device0`.
    #[must_use]
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    /// Find the first IIO device under `root` whose `name` is `bme680`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be listed or no device matches.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let entries = std::fs::read_dir(root).map_err(|source| HardwareError::Read {
            path: root.to_path_buf(),
            source,
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .collect();
        candidates.sort();

        for dir in candidates {
            let Ok(name) = std::fs::read_to_string(dir.join("name")) else {
                continue;
            };
            trace!("IIO device {} reports name '{}'", dir.display(), name.trim());
            if name.trim() == BME680_NAME {
                debug!("Found BME680 at {}", dir.display());
                return Ok(Self::new(dir));
            }
        }

        Err(HardwareError::DeviceNotFound {
            name: BME680_NAME.to_string(),
            root: root.to_path_buf(),
        })
    }

    /// The sysfs directory of this device.
    #[must_use]
    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    /// Take a measurement on the current thread.
    ///
    /// # Errors
    ///
    /// Returns an error if temperature, humidity or pressure cannot be read.
    pub fn read_blocking(&self) -> Result<EnvironmentReading> {
        // IIO reports millidegrees, milli-percent and kilopascal.
        let temperature_c = self.read_attr(TEMPERATURE_ATTR)? / 1000.0;
        let humidity_pct = self.read_attr(HUMIDITY_ATTR)? / 1000.0;
        let pressure_hpa = self.read_attr(PRESSURE_ATTR)? * 10.0;

        let gas_ohms = match self.read_attr(GAS_ATTR) {
            Ok(ohms) => Some(ohms),
            Err(e) => {
                debug!("Gas resistance unavailable: {}", e);
                None
            }
        };

        Ok(EnvironmentReading {
            temperature_c,
            humidity_pct,
            pressure_hpa,
            gas_ohms,
        })
    }

    /// Take a measurement on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the measurement fails or the blocking task dies.
    pub async fn read(&self) -> Result<EnvironmentReading> {
        let sensor = self.clone();
        tokio::task::spawn_blocking(move || sensor.read_blocking()).await?
    }

    fn read_attr(&self, attr: &str) -> Result<f64> {
        read_number(&self.device_dir.join(attr))
    }
}

/// Read a sysfs attribute holding a single decimal number.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse as a number.
pub fn read_number(path: &Path) -> Result<f64> {
    let raw = std::fs::read_to_string(path).map_err(|source| HardwareError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    raw.trim().parse::<f64>().map_err(|_| HardwareError::Parse {
        path: path.to_path_buf(),
        value: raw.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_device(root: &Path, dir: &str, name: &str, attrs: &[(&str, &str)]) -> PathBuf {
        let device = root.join(dir);
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join("name"), format!("{name}\n")).unwrap();
        for (attr, value) in attrs {
            std::fs::write(device.join(attr), format!("{value}\n")).unwrap();
        }
        device
    }

    fn full_attrs() -> Vec<(&'static str, &'static str)> {
        vec![
            (TEMPERATURE_ATTR, "23450"),
            (HUMIDITY_ATTR, "41250"),
            (PRESSURE_ATTR, "101.325000000"),
            (GAS_ATTR, "125000"),
        ]
    }

    #[test]
    fn test_discover_finds_bme680() {
        let root = tempfile::tempdir().unwrap();
        write_device(root.path(), "iio:device0", "ads1015", &[]);
        let expected = write_device(root.path(), "iio:device1", "bme680", &full_attrs());

        let sensor = Bme680Iio::discover(root.path()).unwrap();
        assert_eq!(sensor.device_dir(), expected);
    }

    #[test]
    fn test_discover_without_device() {
        let root = tempfile::tempdir().unwrap();
        write_device(root.path(), "iio:device0", "ads1015", &[]);

        let err = Bme680Iio::discover(root.path()).unwrap_err();
        assert!(matches!(err, HardwareError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_discover_missing_root() {
        let err = Bme680Iio::discover("/nonexistent/iio/root").unwrap_err();
        assert!(matches!(err, HardwareError::Read { .. }));
    }

    #[test]
    fn test_read_converts_units() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_device(root.path(), "iio:device0", "bme680", &full_attrs());

        let reading = Bme680Iio::new(dir).read_blocking().unwrap();
        assert!((reading.temperature_c - 23.45).abs() < 1e-9);
        assert!((reading.humidity_pct - 41.25).abs() < 1e-9);
        assert!((reading.pressure_hpa - 1013.25).abs() < 1e-9);
        assert_eq!(reading.gas_ohms, Some(125_000.0));
    }

    #[test]
    fn test_read_without_gas() {
        let root = tempfile::tempdir().unwrap();
        let attrs = &full_attrs()[..3];
        let dir = write_device(root.path(), "iio:device0", "bme680", attrs);

        let reading = Bme680Iio::new(dir).read_blocking().unwrap();
        assert!(reading.gas_ohms.is_none());
    }

    #[test]
    fn test_read_garbage_value() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_device(
            root.path(),
            "iio:device0",
            "bme680",
            &[(TEMPERATURE_ATTR, "not-a-number")],
        );

        let err = Bme680Iio::new(dir).read_blocking().unwrap_err();
        assert!(matches!(err, HardwareError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_async_read() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_device(root.path(), "iio:device0", "bme680", &full_attrs());

        let reading = Bme680Iio::new(dir).read().await.unwrap();
        assert!((reading.temperature_c - 23.45).abs() < 1e-9);
    }
}
