//! The telemetry record served to the browser and written to flight logs.
//!
//! The record is flat on the wire: environment, power and host fields sit
//! side by side with a fractional Unix `timestamp`. Any field whose source was
//! unavailable for this sample is `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derived::{AirQualityLevel, FireRiskLevel};

/// Environmental readings plus the figures derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentData {
    /// Temperature in degrees Celsius.
    pub temperature_c: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Barometric pressure in hPa.
    pub pressure_hpa: Option<f64>,
    /// Gas sensor resistance in ohms.
    pub gas_ohms: Option<f64>,
    /// Dew point in degrees Celsius.
    pub dew_point_c: Option<f64>,
    /// Altitude estimate in metres.
    pub altitude_m: Option<f64>,
    /// Fire risk score, 0 to 100.
    pub fire_risk_index: Option<f64>,
    /// Fire risk band.
    pub fire_risk_level: Option<FireRiskLevel>,
    /// Relative air quality index, 0 to 250.
    pub air_quality_index: Option<u32>,
    /// Air quality band.
    pub air_quality_level: Option<AirQualityLevel>,
}

/// UPS readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerData {
    /// Battery charge estimate in percent.
    pub battery_percent: Option<u8>,
    /// Battery voltage in mV.
    pub battery_mv: Option<i64>,
    /// Input voltage in mV.
    pub vin_mv: Option<i64>,
    /// 5V rail voltage in mV.
    pub vout_mv: Option<i64>,
    /// Load current in mA.
    pub load_current_ma: Option<i64>,
}

/// Health of the ground station computer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// SoC temperature in degrees Celsius.
    pub cpu_temp_c: Option<f64>,
    /// One-minute load average.
    pub load_1m: Option<f64>,
    /// Total memory in MiB.
    pub mem_total_mb: Option<f64>,
    /// Used memory in MiB.
    pub mem_used_mb: Option<f64>,
    /// Free space on the log filesystem in GiB.
    pub disk_free_gb: Option<f64>,
    /// Used space on the log filesystem in percent.
    pub disk_used_pct: Option<f64>,
    /// LAN address.
    pub ip_address: Option<String>,
}

/// One complete sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Environmental data.
    #[serde(flatten)]
    pub environment: EnvironmentData,
    /// Battery data.
    #[serde(flatten)]
    pub power: PowerData,
    /// Host data.
    #[serde(flatten)]
    pub system: SystemStats,
    /// When the sample was taken.
    #[serde(with = "unix_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl Telemetry {
    /// A sample with every reading missing.
    #[must_use]
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            environment: EnvironmentData::default(),
            power: PowerData::default(),
            system: SystemStats::default(),
            timestamp,
        }
    }

    /// The timestamp as fractional Unix seconds.
    #[must_use]
    pub fn unix_seconds(&self) -> f64 {
        unix_seconds::to_f64(&self.timestamp)
    }

    /// True when the battery is at or below `threshold` percent.
    #[must_use]
    pub fn battery_low(&self, threshold: u8) -> bool {
        self.power
            .battery_percent
            .is_some_and(|pct| pct <= threshold)
    }
}

/// Serde adapter storing a `DateTime<Utc>` as fractional Unix seconds.
pub mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    /// Convert to fractional seconds with microsecond precision.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(ts: &DateTime<Utc>) -> f64 {
        ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
    }

    /// Convert from fractional seconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.floor();
        let micros = ((secs - whole) * 1_000_000.0).round() as u32;
        let (whole, micros) = if micros >= 1_000_000 {
            (whole + 1.0, 0)
        } else {
            (whole, micros)
        };
        DateTime::from_timestamp(whole as i64, micros * 1000)
    }

    /// Serialize as a JSON number.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_f64(ts))
    }

    /// Deserialize from a JSON number.
    ///
    /// # Errors
    ///
    /// Fails if the number is not a representable timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        from_f64(secs).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {secs}")))
    }
}
