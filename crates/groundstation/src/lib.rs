//! `groundstation` - Telemetry server for a drone ground station
//!
//! This library samples a BME680 environmental sensor, a LiFePO4wered UPS and
//! the host computer, derives dew point, altitude, fire risk and air quality
//! figures, and serves them next to a live camera stream. Samples can be
//! recorded into CSV flight logs and are archived in SQLite.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod battery;
pub mod cli;
pub mod config;
pub mod derived;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod sensor;
pub mod server;
pub mod service;
pub mod station;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use recorder::{LogStatus, Recorder};
pub use sensor::SensorSuite;
pub use station::{Sampler, Station};
pub use storage::{Storage, StorageStats};
pub use telemetry::Telemetry;

/// Name of the platform the hardware sensors run on.
#[must_use]
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        groundstation_linux::platform_name()
    }
    #[cfg(not(target_os = "linux"))]
    {
        "unsupported"
    }
}
