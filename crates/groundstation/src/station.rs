//! Sample assembly and the background sampling loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, OnceCell};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::battery::BatteryRange;
use crate::config::Config;
use crate::derived::{self, AirQualityTracker};
use crate::error::Error;
use crate::recorder::{lock_archive, Recorder, SharedStorage};
use crate::sensor::{EnvironmentReading, PowerReading, SensorKind, SensorSuite};
use crate::telemetry::{EnvironmentData, PowerData, Telemetry};

/// Tracks whether a sensor is currently failing so each outage is logged once.
#[derive(Debug, Default)]
struct Health {
    failing: AtomicBool,
}

impl Health {
    fn failed(&self, kind: SensorKind, err: &Error) {
        if self.failing.swap(true, Ordering::Relaxed) {
            debug!("{} sensor still unavailable: {}", kind, err);
        } else if err.is_sensor_error() {
            warn!("{} sensor unavailable: {}", kind, err);
        } else {
            error!("{} sensor read failed: {}", kind, err);
        }
    }

    fn ok(&self, kind: SensorKind) {
        if self.failing.swap(false, Ordering::Relaxed) {
            info!("{} sensor recovered", kind);
        }
    }
}

/// Reads every sensor and turns the readings into a [`Telemetry`] record.
#[derive(Debug)]
pub struct Station {
    sensors: SensorSuite,
    battery: BatteryRange,
    use_device_min: bool,
    resolved_battery: OnceCell<BatteryRange>,
    sea_level_hpa: f64,
    air_quality: Mutex<AirQualityTracker>,
    environment_health: Health,
    power_health: Health,
}

impl Station {
    /// Create a station over the given sensors.
    #[must_use]
    pub fn new(sensors: SensorSuite, config: &Config) -> Self {
        Self {
            sensors,
            battery: BatteryRange::from(&config.battery),
            use_device_min: config.battery.use_device_min,
            resolved_battery: OnceCell::new(),
            sea_level_hpa: config.sensor.sea_level_pressure_hpa,
            air_quality: Mutex::new(AirQualityTracker::new()),
            environment_health: Health::default(),
            power_health: Health::default(),
        }
    }

    /// Create a station with the sensors selected by the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(SensorSuite::from_config(config), config)
    }

    /// Take one sample from all sensors concurrently.
    ///
    /// A failing sensor leaves its fields `None`; this never fails.
    pub async fn sample(&self) -> Telemetry {
        let (environment, power, system) = tokio::join!(
            self.sensors.environment.read(),
            self.sensors.power.read(),
            self.sensors.host.sample(),
        );

        let mut telemetry = Telemetry::empty(Utc::now());
        telemetry.system = system;

        match environment {
            Ok(reading) => {
                self.environment_health.ok(SensorKind::Environment);
                telemetry.environment = self.environment_data(&reading);
            }
            Err(e) => self.environment_health.failed(SensorKind::Environment, &e),
        }

        match power {
            Ok(reading) => {
                self.power_health.ok(SensorKind::Power);
                telemetry.power = self.power_data(&reading).await;
            }
            Err(e) => self.power_health.failed(SensorKind::Power, &e),
        }

        telemetry
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, AirQualityTracker> {
        match self.air_quality.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn environment_data(&self, reading: &EnvironmentReading) -> EnvironmentData {
        let dew_point_c = derived::dew_point_c(reading.temperature_c, reading.humidity_pct);
        let (fire_index, fire_level) =
            derived::fire_risk(reading.temperature_c, reading.humidity_pct, dew_point_c);
        let air_quality = reading.gas_ohms.and_then(|gas| self.assess_air_quality(gas));

        EnvironmentData {
            temperature_c: Some(reading.temperature_c),
            humidity: Some(reading.humidity_pct),
            pressure_hpa: Some(reading.pressure_hpa),
            gas_ohms: reading.gas_ohms,
            dew_point_c,
            altitude_m: derived::altitude_m(reading.pressure_hpa, self.sea_level_hpa),
            fire_risk_index: Some(fire_index),
            fire_risk_level: Some(fire_level),
            air_quality_index: air_quality.map(|(index, _)| index),
            air_quality_level: air_quality.map(|(_, level)| level),
        }
    }

    fn assess_air_quality(&self, gas_ohms: f64) -> Option<(u32, derived::AirQualityLevel)> {
        let mut tracker = self.tracker();
        let first = tracker.baseline().is_none();
        let assessed = tracker.assess(gas_ohms);
        if let (true, Some(baseline)) = (first, tracker.baseline()) {
            info!("Air quality baseline set at {:.0} ohms", baseline);
        }
        assessed
    }

    async fn power_data(&self, reading: &PowerReading) -> PowerData {
        let range = self.battery_range().await;
        PowerData {
            battery_percent: reading.battery_mv.map(|mv| range.percent(mv)),
            battery_mv: reading.battery_mv,
            vin_mv: reading.vin_mv,
            vout_mv: reading.vout_mv,
            load_current_ma: reading.load_current_ma,
        }
    }

    /// The battery range, asking the UPS for its cut-off once if configured to.
    async fn battery_range(&self) -> BatteryRange {
        if !self.use_device_min {
            return self.battery;
        }
        *self
            .resolved_battery
            .get_or_init(|| async {
                match self.sensors.power.minimum_voltage().await {
                    Ok(Some(min_mv)) => {
                        info!("Using UPS minimum battery voltage {} mV", min_mv);
                        self.battery.with_device_min(min_mv)
                    }
                    Ok(None) => self.battery,
                    Err(e) => {
                        warn!(
                            "Could not read UPS minimum voltage, using {} mV: {}",
                            self.battery.min_mv, e
                        );
                        self.battery
                    }
                }
            })
            .await
    }
}

/// Retention limits applied by the sampler.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    /// Oldest sample kept.
    pub max_age: Option<Duration>,
    /// Most samples kept; 0 for no limit.
    pub max_samples: usize,
    /// Time between prune passes.
    pub interval: Duration,
}

impl Retention {
    /// Retention from the storage configuration section.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_age: config.max_age(),
            max_samples: config.storage.max_samples,
            interval: config.prune_interval(),
        }
    }
}

/// Runs the station on a fixed interval and publishes each sample.
#[derive(Debug)]
pub struct Sampler {
    station: Arc<Station>,
    recorder: Arc<Recorder>,
    archive: Option<SharedStorage>,
    retention: Option<Retention>,
    interval: Duration,
    latest: watch::Sender<Option<Telemetry>>,
    low_battery_percent: Option<u8>,
    battery_low: AtomicBool,
}

impl Sampler {
    /// Create a sampler. Subscribe to the returned receiver for the latest sample.
    #[must_use]
    pub fn new(
        station: Arc<Station>,
        recorder: Arc<Recorder>,
        interval: Duration,
    ) -> (Self, watch::Receiver<Option<Telemetry>>) {
        let (latest, rx) = watch::channel(None);
        (
            Self {
                station,
                recorder,
                archive: None,
                retention: None,
                interval,
                latest,
                low_battery_percent: None,
                battery_low: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Archive every sample, pruning with the given retention.
    #[must_use]
    pub fn with_archive(mut self, archive: SharedStorage, retention: Retention) -> Self {
        self.archive = Some(archive);
        self.retention = Some(retention);
        self
    }

    /// Log when the battery falls to `percent` or below, and when it recovers.
    #[must_use]
    pub fn with_battery_alarm(mut self, percent: u8) -> Self {
        self.low_battery_percent = Some(percent);
        self
    }

    /// Take, publish, log and archive one sample.
    pub async fn tick(&self) -> Telemetry {
        let sample = self.station.sample().await;
        self.latest.send_replace(Some(sample.clone()));
        self.check_battery(&sample);

        if let Err(e) = self.recorder.append(&sample).await {
            error!("Failed to write flight log row: {}", e);
        }

        if let Some(archive) = &self.archive {
            if let Err(e) = lock_archive(archive).insert_sample(&sample) {
                warn!("Failed to archive sample: {}", e);
            }
        }

        sample
    }

    fn check_battery(&self, sample: &Telemetry) {
        let (Some(threshold), Some(percent)) =
            (self.low_battery_percent, sample.power.battery_percent)
        else {
            return;
        };
        let low = sample.battery_low(threshold);
        if low == self.battery_low.swap(low, Ordering::Relaxed) {
            return;
        }
        if low {
            warn!("Battery low: {}% (alarm at {}%)", percent, threshold);
        } else {
            info!("Battery back above {}%: {}%", threshold, percent);
        }
    }

    fn prune(&self) {
        let (Some(archive), Some(retention)) = (&self.archive, &self.retention) else {
            return;
        };
        match lock_archive(archive).prune(retention.max_age, retention.max_samples) {
            Ok(removed) => debug!("Prune pass removed {} samples", removed),
            Err(e) => warn!("Archive prune failed: {}", e),
        }
    }

    /// Sample until `shutdown` becomes true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Sampler started, interval {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let prune_every = self
            .retention
            .map_or(Duration::ZERO, |r| r.interval);
        let mut prune_ticker = tokio::time::interval(prune_every.max(Duration::from_secs(60)));
        prune_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let pruning = self.retention.is_some() && !prune_every.is_zero();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = prune_ticker.tick(), if pruning => {
                    self.prune();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match self.recorder.stop().await {
            Ok(Some(log)) => info!("Closed flight log {} on shutdown", log.logfile.display()),
            Ok(None) => {}
            Err(e) => error!("Failed to close flight log on shutdown: {}", e),
        }
        info!("Sampler stopped");
    }
}
