//! Host statistics for the ground station computer itself.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::debug;

use crate::error::Result;
use crate::iio::read_number;

/// Default CPU thermal zone on a Raspberry Pi.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A snapshot of host health. Every field is optional because any one of the
/// sources may be missing on a given board.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostStats {
    /// SoC temperature in degrees Celsius.
    pub cpu_temp_c: Option<f64>,
    /// One-minute load average.
    pub load_1m: Option<f64>,
    /// Total memory in MiB.
    pub mem_total_mb: Option<f64>,
    /// Memory in use (total minus available) in MiB.
    pub mem_used_mb: Option<f64>,
    /// Free space on the log filesystem in GiB.
    pub disk_free_gb: Option<f64>,
    /// Used space on the log filesystem in percent.
    pub disk_used_pct: Option<f64>,
    /// First LAN address of the host.
    pub ip_address: Option<String>,
}

/// Collects [`HostStats`].
#[derive(Debug, Clone)]
pub struct HostSampler {
    thermal_zone: PathBuf,
    disk_path: PathBuf,
    command_timeout: Duration,
    system: Arc<Mutex<System>>,
}

impl HostSampler {
    /// Create a sampler reading CPU temperature from `thermal_zone` and disk
    /// usage for the filesystem holding `disk_path`.
    #[must_use]
    pub fn new(thermal_zone: impl Into<PathBuf>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            disk_path: disk_path.into(),
            command_timeout: Duration::from_secs(2),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    /// Take a snapshot. Sources that fail are left as `None`.
    pub async fn sample(&self) -> HostStats {
        let sampler = self.clone();
        let mut stats = match tokio::task::spawn_blocking(move || sampler.sample_blocking()).await
        {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Host sampling task failed: {}", e);
                HostStats::default()
            }
        };
        stats.ip_address = self.ip_address().await;
        stats
    }

    fn sample_blocking(&self) -> HostStats {
        let cpu_temp_c = match read_cpu_temp(&self.thermal_zone) {
            Ok(t) => Some(t),
            Err(e) => {
                debug!("CPU temperature unavailable: {}", e);
                None
            }
        };

        let load_1m = Some(System::load_average().one);

        let (mem_total_mb, mem_used_mb) = {
            let mut system = match self.system.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            system.refresh_memory();
            memory_mb(system.total_memory(), system.available_memory())
        };

        let (disk_free_gb, disk_used_pct) = self.disk_usage();

        HostStats {
            cpu_temp_c,
            load_1m,
            mem_total_mb,
            mem_used_mb,
            disk_free_gb,
            disk_used_pct,
            ip_address: None,
        }
    }

    fn disk_usage(&self) -> (Option<f64>, Option<f64>) {
        let target = self
            .disk_path
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from("/"));
        let disks = Disks::new_with_refreshed_list();
        let mounts: Vec<(&Path, u64, u64)> = disks
            .list()
            .iter()
            .map(|d| (d.mount_point(), d.total_space(), d.available_space()))
            .collect();

        match best_mount(&target, &mounts) {
            Some((_, total, available)) => disk_figures(total, available),
            None => (None, None),
        }
    }

    async fn ip_address(&self) -> Option<String> {
        let mut cmd = Command::new("hostname");
        cmd.arg("-I").kill_on_drop(true);
        match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                first_address(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!("hostname -I exited with {}", output.status);
                None
            }
            Ok(Err(e)) => {
                debug!("hostname -I failed: {}", e);
                None
            }
            Err(_) => {
                debug!("hostname -I timed out");
                None
            }
        }
    }
}

/// Read a thermal zone (millidegrees) as degrees Celsius.
///
/// # Errors
///
/// Returns an error if the zone cannot be read or parsed.
pub fn read_cpu_temp(path: &Path) -> Result<f64> {
    Ok(read_number(path)? / 1000.0)
}

/// First whitespace-separated address from `hostname -I`.
#[must_use]
pub fn first_address(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

#[allow(clippy::cast_precision_loss)]
fn memory_mb(total_bytes: u64, available_bytes: u64) -> (Option<f64>, Option<f64>) {
    if total_bytes == 0 || available_bytes == 0 {
        return (None, None);
    }
    let total = total_bytes as f64 / BYTES_PER_MB;
    let used = total_bytes.saturating_sub(available_bytes) as f64 / BYTES_PER_MB;
    (Some(total), Some(used))
}

#[allow(clippy::cast_precision_loss)]
fn disk_figures(total: u64, available: u64) -> (Option<f64>, Option<f64>) {
    if total == 0 {
        return (None, None);
    }
    let free_gb = available as f64 / BYTES_PER_GB;
    let used_pct = total.saturating_sub(available) as f64 * 100.0 / total as f64;
    (Some(free_gb), Some(used_pct))
}

/// The mount whose mount point is the longest prefix of `target`.
fn best_mount<'a>(target: &Path, mounts: &[(&'a Path, u64, u64)]) -> Option<(&'a Path, u64, u64)> {
    mounts
        .iter()
        .filter(|(mount, _, _)| target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())
        .copied()
}
