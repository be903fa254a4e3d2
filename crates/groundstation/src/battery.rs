//! Battery charge estimate for the LiFePO4 pack.
//!
//! LiFePO4 cells hold a very flat voltage through most of their discharge, so
//! a linear map over the usable window is as good as anything more elaborate.

use crate::config::BatteryConfig;

/// Voltage window mapped onto 0–100 %.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryRange {
    /// Voltage reported as empty.
    pub min_mv: i64,
    /// Voltage reported as full.
    pub max_mv: i64,
}

impl Default for BatteryRange {
    fn default() -> Self {
        Self {
            min_mv: 3200,
            max_mv: 3600,
        }
    }
}

impl From<&BatteryConfig> for BatteryRange {
    fn from(config: &BatteryConfig) -> Self {
        Self {
            min_mv: config.min_mv,
            max_mv: config.max_mv,
        }
    }
}

impl BatteryRange {
    /// Replace the lower bound with the UPS's own cut-off voltage.
    ///
    /// Ignored if it would leave an empty window.
    #[must_use]
    pub fn with_device_min(self, device_min_mv: i64) -> Self {
        if device_min_mv < self.max_mv {
            Self {
                min_mv: device_min_mv,
                ..self
            }
        } else {
            self
        }
    }

    /// Charge percentage for a battery voltage, rounded down and clamped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self, battery_mv: i64) -> u8 {
        let span = self.max_mv - self.min_mv;
        if span <= 0 {
            return if battery_mv >= self.max_mv { 100 } else { 0 };
        }
        let pct = ((battery_mv - self.min_mv) * 100).div_euclid(span);
        pct.clamp(0, 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_endpoints() {
        let range = BatteryRange::default();
        assert_eq!(range.percent(3200), 0);
        assert_eq!(range.percent(3600), 100);
        assert_eq!(range.percent(3400), 50);
    }

    #[test]
    fn test_percent_rounds_down() {
        let range = BatteryRange::default();
        // 219 * 100 / 400 = 54.75
        assert_eq!(range.percent(3419), 54);
        // just above empty is still 0
        assert_eq!(range.percent(3203), 0);
    }

    #[test]
    fn test_percent_clamps() {
        let range = BatteryRange::default();
        assert_eq!(range.percent(2900), 0);
        assert_eq!(range.percent(4100), 100);
        assert_eq!(range.percent(-1), 0);
    }

    #[test]
    fn test_with_device_min() {
        let range = BatteryRange::default().with_device_min(2850);
        assert_eq!(range.min_mv, 2850);
        assert_eq!(range.percent(3225), 50);
    }

    #[test]
    fn test_with_device_min_rejects_empty_window() {
        let range = BatteryRange::default().with_device_min(3700);
        assert_eq!(range, BatteryRange::default());
    }

    #[test]
    fn test_degenerate_range() {
        let range = BatteryRange {
            min_mv: 3400,
            max_mv: 3400,
        };
        assert_eq!(range.percent(3399), 0);
        assert_eq!(range.percent(3400), 100);
    }

    #[test]
    fn test_from_config() {
        let config = BatteryConfig {
            min_mv: 3000,
            max_mv: 3500,
            ..BatteryConfig::default()
        };
        let range = BatteryRange::from(&config);
        assert_eq!(range.min_mv, 3000);
        assert_eq!(range.max_mv, 3500);
    }
}
