//! CSV flight logs.
//!
//! A flight log is one CSV file per logging session, written a row per sample
//! and flushed after every row so a power cut loses at most one sample. When a
//! session stops, the file's BLAKE3 digest is recorded so a log copied off the
//! drone can be checked later.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex as StdMutex};

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::{FlightLogRecord, Storage};
use crate::telemetry::{unix_seconds, Telemetry};

/// Column names, in order.
pub const HEADER: [&str; 17] = [
    "timestamp_iso",
    "timestamp_unix",
    "temperature_c",
    "humidity",
    "pressure_hpa",
    "gas_ohms",
    "battery_percent",
    "battery_mv",
    "dew_point_c",
    "altitude_m",
    "input_voltage_mv",
    "output_voltage_mv",
    "load_current_ma",
    "fire_risk_index",
    "fire_risk_level",
    "air_quality_index",
    "air_quality_level",
];

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid file name regex"));

/// Archive handle shared between the sampler, the recorder and the server.
pub type SharedStorage = Arc<StdMutex<Storage>>;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "_").into_owned()
}

/// File name for a session started at `at`.
#[must_use]
pub fn log_file_name(name: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.csv", sanitize_name(name), at.format("%Y%m%d_%H%M%S"))
}

/// One CSV row for a sample. Missing values are empty cells.
#[must_use]
pub fn format_row(sample: &Telemetry) -> Vec<String> {
    fn fixed(value: Option<f64>, places: usize) -> String {
        value.map_or_else(String::new, |v| format!("{v:.places$}"))
    }
    fn int<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(String::new, |v| v.to_string())
    }

    let env = &sample.environment;
    let power = &sample.power;
    vec![
        sample
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string(),
        format!("{:.3}", sample.unix_seconds()),
        fixed(env.temperature_c, 2),
        fixed(env.humidity, 1),
        fixed(env.pressure_hpa, 2),
        fixed(env.gas_ohms, 0),
        int(power.battery_percent),
        int(power.battery_mv),
        fixed(env.dew_point_c, 2),
        fixed(env.altitude_m, 2),
        int(power.vin_mv),
        int(power.vout_mv),
        int(power.load_current_ma),
        fixed(env.fire_risk_index, 1),
        int(env.fire_risk_level),
        int(env.air_quality_index),
        int(env.air_quality_level),
    ]
}

/// BLAKE3 digest of a file, as lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Check a finished flight log against the digest archived when it closed.
///
/// # Errors
///
/// Returns [`Error::FlightLogNotFound`] for an unknown id,
/// [`Error::FlightLogOpen`] for a session that never closed,
/// [`Error::FlightLogModified`] when the file changed, or an I/O error if
/// the file cannot be read.
pub fn verify_log(archive: &Storage, id: i64) -> Result<FlightLogRecord> {
    let log = archive
        .flight_log(id)?
        .ok_or(Error::FlightLogNotFound { id })?;
    let Some(expected) = log.digest.as_deref() else {
        return Err(Error::FlightLogOpen { id });
    };

    let actual = file_digest(&log.path)?;
    if actual != expected {
        return Err(Error::FlightLogModified {
            path: log.path.clone(),
            expected: expected.to_string(),
            actual,
        });
    }
    debug!("Flight log {} matches its digest", id);
    Ok(log)
}

/// State of the recorder, as reported by `/api/log_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogStatus {
    /// Whether a session is open.
    pub recording: bool,
    /// Path of the open log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logfile: Option<PathBuf>,
    /// Rows written so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Session start as Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishedLog {
    /// Path of the log.
    pub logfile: PathBuf,
    /// Data rows written.
    pub rows: u64,
    /// BLAKE3 digest of the file.
    pub digest: String,
}

struct Session {
    archive_id: Option<i64>,
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("archive_id", &self.archive_id)
            .field("path", &self.path)
            .field("rows", &self.rows)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Writes flight logs.
#[derive(Debug)]
pub struct Recorder {
    log_dir: PathBuf,
    default_name: String,
    archive: Option<SharedStorage>,
    session: Mutex<Option<Session>>,
}

impl Recorder {
    /// Create a recorder writing into `log_dir`.
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>, default_name: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            default_name: default_name.into(),
            archive: None,
            session: Mutex::new(None),
        }
    }

    /// Also record sessions in the archive.
    #[must_use]
    pub fn with_archive(mut self, archive: SharedStorage) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Directory logs are written to.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start a new session, closing any open one first.
    ///
    /// An empty or missing `filename` uses the configured default name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub async fn start(&self, filename: Option<&str>, note: Option<&str>) -> Result<PathBuf> {
        let mut session = self.session.lock().await;

        if let Some(previous) = session.take() {
            info!("Closing {} before starting a new log", previous.path.display());
            self.finish(previous)?;
        }

        std::fs::create_dir_all(&self.log_dir).map_err(|source| Error::DirectoryCreate {
            path: self.log_dir.clone(),
            source,
        })?;
        let log_dir = std::fs::canonicalize(&self.log_dir)?;

        let name = filename
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.default_name);
        let started_at = Utc::now();
        let path = unique_path(&log_dir, &log_file_name(name, started_at.with_timezone(&Local)));

        let mut file = File::create(&path).map_err(|source| Error::FlightLogCreate {
            path: path.clone(),
            source,
        })?;

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if let Some(note) = note {
            writeln!(file, "# note: {}", note.replace(['\r', '\n'], " "))?;
        }

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        writer.flush()?;

        let archive_id = self.archive.as_ref().and_then(|archive| {
            let result = lock_archive(archive).begin_flight_log(&path, note, started_at);
            result
                .map_err(|e| warn!("Failed to record flight log in archive: {}", e))
                .ok()
        });

        info!("Flight log started: {}", path.display());
        *session = Some(Session {
            archive_id,
            path: path.clone(),
            writer,
            rows: 0,
            started_at,
        });
        Ok(path)
    }

    /// Append a sample if a session is open. Returns whether a row was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub async fn append(&self, sample: &Telemetry) -> Result<bool> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(false);
        };

        session.writer.write_record(format_row(sample))?;
        session.writer.flush()?;
        session.rows += 1;
        Ok(true)
    }

    /// Close the open session. Returns `None` when nothing was recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be flushed or hashed.
    pub async fn stop(&self) -> Result<Option<FinishedLog>> {
        let mut guard = self.session.lock().await;
        match guard.take() {
            Some(session) => self.finish(session).map(Some),
            None => {
                debug!("Stop requested with no open flight log");
                Ok(None)
            }
        }
    }

    /// Current recorder state.
    pub async fn status(&self) -> LogStatus {
        let guard = self.session.lock().await;
        guard.as_ref().map_or_else(LogStatus::default, |s| LogStatus {
            recording: true,
            logfile: Some(s.path.clone()),
            rows: Some(s.rows),
            started_at: Some(unix_seconds::to_f64(&s.started_at)),
        })
    }

    fn finish(&self, session: Session) -> Result<FinishedLog> {
        let Session {
            archive_id,
            path,
            writer,
            rows,
            ..
        } = session;

        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        let digest = file_digest(&path)?;
        if let (Some(archive), Some(id)) = (self.archive.as_ref(), archive_id) {
            if let Err(e) = lock_archive(archive).finish_flight_log(id, Utc::now(), rows, &digest) {
                warn!("Failed to close flight log {} in archive: {}", id, e);
            }
        }

        info!("Flight log stopped: {} ({} rows)", path.display(), rows);
        Ok(FinishedLog {
            logfile: path,
            rows,
            digest,
        })
    }
}

/// Lock the archive, recovering from a poisoned lock.
pub fn lock_archive(archive: &SharedStorage) -> std::sync::MutexGuard<'_, Storage> {
    match archive.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// `dir/name`, or `dir/stem_N.csv` if that already exists.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name.trim_end_matches(".csv");
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.csv")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
