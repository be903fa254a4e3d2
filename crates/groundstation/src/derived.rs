//! Figures derived from the raw BME680 readings.
//!
//! None of these are calibrated measurements. They are field heuristics for a
//! fire-spotting drone: how dry the air is, how warm, and whether the gas
//! sensor sees more combustion products than when the flight started.

use serde::{Deserialize, Serialize};

/// Magnus coefficient `a` (dimensionless).
const MAGNUS_A: f64 = 17.62;
/// Magnus coefficient `b` in degrees Celsius.
const MAGNUS_B: f64 = 243.12;

/// Index reported for the gas baseline itself.
const AQI_BASELINE: f64 = 50.0;

/// Fire risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireRiskLevel {
    /// Score below 20.
    Low,
    /// Score below 40.
    Moderate,
    /// Score below 60.
    High,
    /// Score below 80.
    #[serde(rename = "Very High")]
    VeryHigh,
    /// Score of 80 or more.
    Extreme,
}

impl FireRiskLevel {
    /// Band for a 0–100 score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 20.0 {
            Self::Low
        } else if score < 40.0 {
            Self::Moderate
        } else if score < 60.0 {
            Self::High
        } else if score < 80.0 {
            Self::VeryHigh
        } else {
            Self::Extreme
        }
    }

    /// Display label, as used in JSON and flight logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
            Self::VeryHigh => "Very High",
            Self::Extreme => "Extreme",
        }
    }
}

impl std::fmt::Display for FireRiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Air quality band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AirQualityLevel {
    /// Index up to 50.
    Good,
    /// Index up to 100.
    Moderate,
    /// Index up to 150: unhealthy for sensitive groups.
    #[serde(rename = "Unhealthy-SG")]
    UnhealthySensitive,
    /// Index up to 200.
    Unhealthy,
    /// Index above 200.
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
}

impl AirQualityLevel {
    /// Band for an index value.
    #[must_use]
    pub fn from_index(index: u32) -> Self {
        match index {
            0..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthySensitive,
            151..=200 => Self::Unhealthy,
            _ => Self::VeryUnhealthy,
        }
    }

    /// Display label, as used in JSON and flight logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthySensitive => "Unhealthy-SG",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
        }
    }
}

impl std::fmt::Display for AirQualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Dew point by the Magnus approximation. `None` for non-positive humidity.
#[must_use]
pub fn dew_point_c(temperature_c: f64, humidity_pct: f64) -> Option<f64> {
    if humidity_pct <= 0.0 {
        return None;
    }
    let gamma =
        (humidity_pct / 100.0).ln() + (MAGNUS_A * temperature_c) / (MAGNUS_B + temperature_c);
    Some((MAGNUS_B * gamma) / (MAGNUS_A - gamma))
}

/// Altitude from pressure using the international barometric formula.
#[must_use]
pub fn altitude_m(pressure_hpa: f64, sea_level_hpa: f64) -> Option<f64> {
    if pressure_hpa <= 0.0 || sea_level_hpa <= 0.0 {
        return None;
    }
    Some(44_330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.1903)))
}

/// Fire risk score and band.
///
/// Weighted blend of dryness (50%), warmth (30%) and dew-point spread (20%).
/// Warmth is 0 at 5 °C and 1 at 35 °C; a 15 °C spread between temperature and
/// dew point counts as fully dry air.
#[must_use]
pub fn fire_risk(
    temperature_c: f64,
    humidity_pct: f64,
    dew_point_c: Option<f64>,
) -> (f64, FireRiskLevel) {
    let t_norm = ((temperature_c - 5.0) / (35.0 - 5.0)).clamp(0.0, 1.0);
    let rh_norm = 1.0 - (humidity_pct / 100.0).clamp(0.0, 1.0);
    let spread = dew_point_c.map_or(0.0, |dew| (temperature_c - dew).max(0.0));
    let dew_norm = (spread / 15.0).clamp(0.0, 1.0);

    let score = ((0.5 * rh_norm + 0.3 * t_norm + 0.2 * dew_norm) * 100.0).clamp(0.0, 100.0);
    (score, FireRiskLevel::from_score(score))
}

/// Relative air quality against the first gas reading seen.
///
/// Lower gas resistance means more volatile compounds, so readings below the
/// baseline push the index up. The baseline itself scores 50.
#[derive(Debug, Clone, Default)]
pub struct AirQualityTracker {
    baseline_ohms: Option<f64>,
}

impl AirQualityTracker {
    /// Create a tracker with no baseline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current baseline, if one has been taken.
    #[must_use]
    pub fn baseline(&self) -> Option<f64> {
        self.baseline_ohms
    }

    /// Score a gas reading. Non-positive readings are ignored.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn assess(&mut self, gas_ohms: f64) -> Option<(u32, AirQualityLevel)> {
        if !gas_ohms.is_finite() || gas_ohms <= 0.0 {
            return None;
        }

        let Some(baseline) = self.baseline_ohms else {
            self.baseline_ohms = Some(gas_ohms);
            return Some((AQI_BASELINE as u32, AirQualityLevel::Good));
        };

        let delta = (baseline / gas_ohms - 1.0).clamp(-1.0, 4.0);
        // delta is clamped, so the index stays within 0..=250
        let index = (AQI_BASELINE + delta * AQI_BASELINE).round() as u32;
        Some((index, AirQualityLevel::from_index(index)))
    }
}
