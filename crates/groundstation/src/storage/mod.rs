//! Storage layer for the telemetry archive.
//!
//! This module provides `SQLite`-based persistent storage for telemetry
//! samples and flight log sessions, with retention pruning.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::Telemetry;

/// Storage engine for archived telemetry.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Sample insertion and time-range queries
/// - Flight log session bookkeeping
/// - Automatic pruning of old samples
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

/// A flight log session as recorded in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightLogRecord {
    /// Archive id.
    pub id: i64,
    /// Path of the CSV file.
    pub path: PathBuf,
    /// Operator note.
    pub note: Option<String>,
    /// When logging started.
    pub started_at: DateTime<Utc>,
    /// When logging stopped; `None` while recording or if the process died.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Data rows written.
    pub rows: u64,
    /// BLAKE3 digest of the finished file.
    pub digest: Option<String>,
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of samples stored.
    pub total_samples: i64,
    /// Timestamp of the oldest sample.
    pub oldest_sample: Option<DateTime<Utc>>,
    /// Timestamp of the newest sample.
    pub newest_sample: Option<DateTime<Utc>>,
    /// Number of flight log sessions.
    pub flight_logs: i64,
    /// Schema version.
    pub schema_version: i32,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening archive at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets the CLI read while the server writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&mut conn)?;

        info!("Archive opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive one telemetry sample.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub fn insert_sample(&self, sample: &Telemetry) -> Result<i64> {
        let payload = serde_json::to_string(sample)?;
        self.conn.execute(
            "INSERT INTO samples (timestamp, payload) VALUES (?1, ?2)",
            params![encode_time(&sample.timestamp), payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get the most recent samples, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_samples(&self, limit: usize) -> Result<Vec<Telemetry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM samples ORDER BY timestamp DESC, id DESC LIMIT ?1")?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let payloads = stmt
            .query_map([limit_i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(decode_payloads(payloads))
    }

    /// Get samples within a time range, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn samples_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Telemetry>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT payload FROM samples
            WHERE timestamp >= ?1 AND timestamp <= ?2
            ORDER BY timestamp ASC, id ASC LIMIT ?3
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let payloads = stmt
            .query_map(
                params![encode_time(&since), encode_time(&until), limit_i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(decode_payloads(payloads))
    }

    /// Count archived samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_samples(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Prune samples older than the given duration.
    ///
    /// Returns the number of samples deleted. An age reaching back past the
    /// earliest representable time deletes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            debug!("Retention age {} reaches past the calendar, nothing to prune", max_age);
            return Ok(0);
        };
        let cutoff = encode_time(&cutoff);

        let affected = self
            .conn
            .execute("DELETE FROM samples WHERE timestamp < ?1", [cutoff])?;

        if affected > 0 {
            info!("Pruned {} old samples", affected);
        }
        Ok(affected)
    }

    /// Prune samples to keep only the most recent N entries.
    ///
    /// Returns the number of samples deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_keep_recent(&self, keep_count: usize) -> Result<usize> {
        let keep_i64 = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let affected = self.conn.execute(
            r"
            DELETE FROM samples WHERE id NOT IN (
                SELECT id FROM samples ORDER BY timestamp DESC, id DESC LIMIT ?1
            )
            ",
            [keep_i64],
        )?;

        if affected > 0 {
            info!("Pruned {} samples to keep {} recent", affected, keep_count);
        }
        Ok(affected)
    }

    /// Apply both retention limits. A zero limit disables that limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune(&self, max_age: Option<std::time::Duration>, max_samples: usize) -> Result<usize> {
        let mut removed = 0;
        if let Some(age) = max_age {
            // Out of range for chrono means older than anything stored
            if let Ok(age) = Duration::from_std(age) {
                removed += self.prune_older_than(age)?;
            }
        }
        if max_samples > 0 {
            removed += self.prune_keep_recent(max_samples)?;
        }
        Ok(removed)
    }

    /// Record the start of a flight log session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn begin_flight_log(
        &self,
        path: &Path,
        note: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO flight_logs (path, note, started_at) VALUES (?1, ?2, ?3)",
            params![path.to_string_lossy(), note, encode_time(&started_at)],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Flight log session {} started", id);
        Ok(id)
    }

    /// Record the end of a flight log session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightLogNotFound`] if no session has this id.
    pub fn finish_flight_log(
        &self,
        id: i64,
        stopped_at: DateTime<Utc>,
        rows: u64,
        digest: &str,
    ) -> Result<()> {
        let rows_i64 = i64::try_from(rows).unwrap_or(i64::MAX);
        let affected = self.conn.execute(
            "UPDATE flight_logs SET stopped_at = ?1, rows = ?2, digest = ?3 WHERE id = ?4",
            params![encode_time(&stopped_at), rows_i64, digest, id],
        )?;
        if affected == 0 {
            return Err(Error::FlightLogNotFound { id });
        }
        Ok(())
    }

    /// List flight log sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn flight_logs(&self, limit: usize) -> Result<Vec<FlightLogRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, path, note, started_at, stopped_at, rows, digest
            FROM flight_logs ORDER BY started_at DESC, id DESC LIMIT ?1
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let logs = stmt
            .query_map([limit_i64], Self::row_to_flight_log)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(logs)
    }

    /// Get a flight log session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn flight_log(&self, id: i64) -> Result<Option<FlightLogRecord>> {
        let log = self
            .conn
            .query_row(
                r"
                SELECT id, path, note, started_at, stopped_at, rows, digest
                FROM flight_logs WHERE id = ?1
                ",
                [id],
                Self::row_to_flight_log,
            )
            .optional()?;
        Ok(log)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_samples = self.count_samples()?;

        let oldest: Option<String> = self
            .conn
            .query_row(
                "SELECT timestamp FROM samples ORDER BY timestamp ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let newest: Option<String> = self
            .conn
            .query_row(
                "SELECT timestamp FROM samples ORDER BY timestamp DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let flight_logs: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM flight_logs", [], |row| row.get(0))?;

        let schema_version = migrations::schema_version(&self.conn)?.unwrap_or(0);

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_samples,
            oldest_sample: oldest.as_deref().and_then(decode_time),
            newest_sample: newest.as_deref().and_then(decode_time),
            flight_logs,
            schema_version,
            db_size_bytes,
        })
    }

    fn row_to_flight_log(row: &rusqlite::Row) -> rusqlite::Result<FlightLogRecord> {
        let path: String = row.get(1)?;
        let started_at: String = row.get(3)?;
        let stopped_at: Option<String> = row.get(4)?;
        let rows: i64 = row.get(5)?;

        Ok(FlightLogRecord {
            id: row.get(0)?,
            path: PathBuf::from(path),
            note: row.get(2)?,
            started_at: decode_time(&started_at).unwrap_or_default(),
            stopped_at: stopped_at.as_deref().and_then(decode_time),
            rows: u64::try_from(rows).unwrap_or(0),
            digest: row.get(6)?,
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
fn encode_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_payloads(payloads: Vec<String>) -> Vec<Telemetry> {
    payloads
        .into_iter()
        .filter_map(|payload| match serde_json::from_str(&payload) {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("Skipping unreadable archived sample: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn sample_at(ts: DateTime<Utc>, temperature: f64) -> Telemetry {
        let mut t = Telemetry::empty(ts);
        t.environment.temperature_c = Some(temperature);
        t
    }

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("telemetry.db");

        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn test_insert_and_recent() {
        let storage = create_test_storage();
        let base = Utc::now();

        for i in 0..5 {
            let ts = base + Duration::seconds(i);
            storage.insert_sample(&sample_at(ts, f64::from(i as i32))).unwrap();
        }

        let recent = storage.recent_samples(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].environment.temperature_c, Some(4.0));
        assert_eq!(recent[2].environment.temperature_c, Some(2.0));
    }

    #[test]
    fn test_sample_round_trips_through_archive() {
        let storage = create_test_storage();
        let mut sample = sample_at(Utc::now(), 19.25);
        sample.power.battery_mv = Some(3333);
        sample.system.ip_address = Some("10.0.0.2".to_string());

        storage.insert_sample(&sample).unwrap();
        let back = storage.recent_samples(1).unwrap();
        assert_eq!(back[0].power.battery_mv, Some(3333));
        assert_eq!(back[0].system.ip_address.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_samples_between() {
        let storage = create_test_storage();
        let base = Utc::now() - Duration::hours(1);

        for i in 0..10 {
            let ts = base + Duration::minutes(i);
            storage.insert_sample(&sample_at(ts, f64::from(i as i32))).unwrap();
        }

        let window = storage
            .samples_between(base + Duration::minutes(2), base + Duration::minutes(5), 100)
            .unwrap();
        let temps: Vec<_> = window
            .iter()
            .map(|s| s.environment.temperature_c.unwrap())
            .collect();
        assert_eq!(temps, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_prune_older_than() {
        let storage = create_test_storage();
        storage
            .insert_sample(&sample_at(Utc::now() - Duration::days(40), 1.0))
            .unwrap();
        storage.insert_sample(&sample_at(Utc::now(), 2.0)).unwrap();

        let removed = storage.prune_older_than(Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_prune_with_huge_age_keeps_everything() {
        let storage = create_test_storage();
        storage
            .insert_sample(&sample_at(Utc::now() - Duration::days(3650), 1.0))
            .unwrap();

        let days = std::time::Duration::from_secs(100_000_000 * 86_400);
        assert_eq!(storage.prune(Some(days), 0).unwrap(), 0);
        assert_eq!(storage.prune(Some(std::time::Duration::MAX), 0).unwrap(), 0);
        assert_eq!(storage.prune_older_than(Duration::MAX).unwrap(), 0);
        assert_eq!(storage.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_prune_keep_recent() {
        let storage = create_test_storage();
        let base = Utc::now();
        for i in 0..10 {
            storage
                .insert_sample(&sample_at(base + Duration::seconds(i), 0.0))
                .unwrap();
        }

        let removed = storage.prune_keep_recent(4).unwrap();
        assert_eq!(removed, 6);
        assert_eq!(storage.count_samples().unwrap(), 4);
    }

    #[test]
    fn test_prune_combined_and_disabled() {
        let storage = create_test_storage();
        let base = Utc::now();
        for i in 0..5 {
            storage
                .insert_sample(&sample_at(base + Duration::seconds(i), 0.0))
                .unwrap();
        }

        assert_eq!(storage.prune(None, 0).unwrap(), 0);
        assert_eq!(
            storage
                .prune(Some(std::time::Duration::from_secs(86_400)), 2)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_flight_log_lifecycle() {
        let storage = create_test_storage();
        let started = Utc::now();
        let id = storage
            .begin_flight_log(Path::new("/tmp/fire_mission.csv"), Some("ridge"), started)
            .unwrap();

        let open = storage.flight_log(id).unwrap().unwrap();
        assert_eq!(open.note.as_deref(), Some("ridge"));
        assert!(open.stopped_at.is_none());
        assert!(open.digest.is_none());

        storage
            .finish_flight_log(id, started + Duration::minutes(5), 300, "abc123")
            .unwrap();

        let done = storage.flight_log(id).unwrap().unwrap();
        assert_eq!(done.rows, 300);
        assert_eq!(done.digest.as_deref(), Some("abc123"));
        assert!(done.stopped_at.is_some());
    }

    #[test]
    fn test_finish_unknown_flight_log() {
        let storage = create_test_storage();
        let err = storage
            .finish_flight_log(42, Utc::now(), 0, "x")
            .unwrap_err();
        assert!(matches!(err, Error::FlightLogNotFound { id: 42 }));
    }

    #[test]
    fn test_flight_logs_newest_first() {
        let storage = create_test_storage();
        let base = Utc::now();
        for i in 0..3 {
            storage
                .begin_flight_log(
                    Path::new(&format!("/tmp/log{i}.csv")),
                    None,
                    base + Duration::minutes(i),
                )
                .unwrap();
        }

        let logs = storage.flight_logs(2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].path, PathBuf::from("/tmp/log2.csv"));
        assert_eq!(logs[1].path, PathBuf::from("/tmp/log1.csv"));
    }

    #[test]
    fn test_stats() {
        let storage = create_test_storage();
        let empty = storage.stats().unwrap();
        assert_eq!(empty.total_samples, 0);
        assert!(empty.oldest_sample.is_none());
        assert_eq!(empty.schema_version, migrations::CURRENT_VERSION);

        let base = Utc::now();
        storage.insert_sample(&sample_at(base, 1.0)).unwrap();
        storage
            .insert_sample(&sample_at(base + Duration::seconds(10), 2.0))
            .unwrap();
        storage
            .begin_flight_log(Path::new("/tmp/a.csv"), None, base)
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_samples, 2);
        assert_eq!(stats.flight_logs, 1);
        assert!(stats.oldest_sample.unwrap() < stats.newest_sample.unwrap());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_unreadable_payload_is_skipped() {
        let storage = create_test_storage();
        storage.insert_sample(&sample_at(Utc::now(), 1.0)).unwrap();
        storage
            .conn
            .execute(
                "INSERT INTO samples (timestamp, payload) VALUES (?1, 'not json')",
                ["9999-01-01T00:00:00.000000Z"],
            )
            .unwrap();

        let recent = storage.recent_samples(10).unwrap();
        assert_eq!(recent.len(), 1);
    }
}
