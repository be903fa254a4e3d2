//! Linux-specific hardware access for groundstation
//!
//! This crate reads the drone's sensors the way the Raspberry Pi exposes them:
//! the BME680 through the kernel IIO driver, the LiFePO4wered UPS through its
//! `lifepo4wered-cli` utility, and host statistics through sysfs and `sysinfo`.

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod error;
pub mod iio;
pub mod system;
pub mod ups;

pub use error::{HardwareError, Result};
pub use iio::{Bme680Iio, EnvironmentReading};
pub use system::{HostSampler, HostStats};
pub use ups::{Lifepo4weredCli, Register};

/// Initialize Linux-specific components
///
/// Reports which of the expected hardware interfaces are visible. Missing
/// interfaces are not an error: the station degrades to null readings.
///
/// # Errors
///
/// Returns an error if initialization fails
pub fn init() -> Result<()> {
    let iio_root = std::path::Path::new(iio::DEFAULT_IIO_ROOT);
    if iio_root.is_dir() {
        tracing::debug!("IIO bus present at {}", iio_root.display());
    } else {
        tracing::warn!(
            "IIO bus not found at {}; is the bme680 overlay enabled?",
            iio_root.display()
        );
    }
    Ok(())
}

/// Get platform name
#[must_use]
pub fn platform_name() -> &'static str {
    "Linux"
}
