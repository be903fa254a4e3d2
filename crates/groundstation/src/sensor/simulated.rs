//! Simulated sensors for bench testing without a drone attached.
//!
//! Values drift slowly on fixed periods so the page and flight logs show
//! something that moves. The sequence is deterministic per starting tick.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::telemetry::SystemStats;

use super::{EnvironmentReading, EnvironmentSensor, HostSensor, PowerMonitor, PowerReading};

/// Simulated BME680.
#[derive(Debug, Default)]
pub struct SimulatedEnvironment {
    tick: AtomicU64,
}

impl SimulatedEnvironment {
    /// Create a sensor starting at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sensor starting at the given tick.
    #[must_use]
    pub fn starting_at(tick: u64) -> Self {
        Self {
            tick: AtomicU64::new(tick),
        }
    }

    /// The reading produced at a given tick.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn reading_at(tick: u64) -> EnvironmentReading {
        let phase = tick as f64;
        let slow = (phase / 120.0).sin();
        let fast = (phase / 17.0).sin();

        EnvironmentReading {
            temperature_c: 24.0 + 4.0 * slow + 0.2 * fast,
            humidity_pct: 42.0 - 12.0 * slow + 0.5 * fast,
            pressure_hpa: 1009.0 + 0.8 * (phase / 300.0).cos(),
            gas_ohms: Some(110_000.0 - 25_000.0 * (phase / 45.0).sin().max(0.0)),
        }
    }
}

#[async_trait::async_trait]
impl EnvironmentSensor for SimulatedEnvironment {
    fn name(&self) -> &str {
        "simulated-bme680"
    }

    async fn read(&self) -> Result<EnvironmentReading> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        Ok(Self::reading_at(tick))
    }
}

/// Simulated LiFePO4wered UPS on a slowly draining battery.
#[derive(Debug, Default)]
pub struct SimulatedPower {
    tick: AtomicU64,
}

impl SimulatedPower {
    /// Create a UPS starting at a full battery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reading produced at a given tick.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn reading_at(tick: u64) -> PowerReading {
        // One millivolt every ten samples, wrapping back to full at 3200 mV.
        let drain = ((tick / 10) % 400) as i64;
        PowerReading {
            battery_mv: Some(3600 - drain),
            vin_mv: Some(0),
            vout_mv: Some(5020),
            load_current_ma: Some(640 + (tick % 7) as i64 * 5),
        }
    }
}

#[async_trait::async_trait]
impl PowerMonitor for SimulatedPower {
    fn name(&self) -> &str {
        "simulated-ups"
    }

    async fn read(&self) -> Result<PowerReading> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        Ok(Self::reading_at(tick))
    }

    async fn minimum_voltage(&self) -> Result<Option<i64>> {
        Ok(Some(2850))
    }
}

/// Simulated host statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedHost;

#[async_trait::async_trait]
impl HostSensor for SimulatedHost {
    async fn sample(&self) -> SystemStats {
        SystemStats {
            cpu_temp_c: Some(47.5),
            load_1m: Some(0.42),
            mem_total_mb: Some(3792.0),
            mem_used_mb: Some(612.0),
            disk_free_gb: Some(21.3),
            disk_used_pct: Some(28.4),
            ip_address: Some("127.0.0.1".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_environment_advances() {
        let sensor = SimulatedEnvironment::starting_at(100);
        let first = sensor.read().await.unwrap();
        let second = sensor.read().await.unwrap();
        assert_eq!(first, SimulatedEnvironment::reading_at(100));
        assert_eq!(second, SimulatedEnvironment::reading_at(101));
    }

    #[test]
    fn test_environment_values_plausible() {
        for tick in (0..2000).step_by(37) {
            let r = SimulatedEnvironment::reading_at(tick);
            assert!((15.0..35.0).contains(&r.temperature_c));
            assert!((0.0..100.0).contains(&r.humidity_pct));
            assert!((1000.0..1020.0).contains(&r.pressure_hpa));
            assert!(r.gas_ohms.unwrap() > 0.0);
        }
    }

    #[test]
    fn test_power_drains_and_wraps() {
        assert_eq!(SimulatedPower::reading_at(0).battery_mv, Some(3600));
        assert_eq!(SimulatedPower::reading_at(100).battery_mv, Some(3590));
        assert_eq!(SimulatedPower::reading_at(3990).battery_mv, Some(3201));
        assert_eq!(SimulatedPower::reading_at(4000).battery_mv, Some(3600));
    }

    #[tokio::test]
    async fn test_power_minimum_voltage() {
        let ups = SimulatedPower::new();
        assert_eq!(ups.minimum_voltage().await.unwrap(), Some(2850));
    }

    #[tokio::test]
    async fn test_host_has_address() {
        let stats = SimulatedHost.sample().await;
        assert_eq!(stats.ip_address.as_deref(), Some("127.0.0.1"));
        assert!(stats.cpu_temp_c.is_some());
    }
}
