//! `SQLite` schema definitions for the telemetry archive.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the samples table.
///
/// `payload` holds the telemetry record as JSON, exactly as served by the API.
pub const CREATE_SAMPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL
)
";

/// SQL statement to create an index on timestamp for efficient queries.
pub const CREATE_SAMPLES_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp DESC)
";

/// SQL statement to create the flight log session table.
pub const CREATE_FLIGHT_LOGS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flight_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    note TEXT,
    started_at TEXT NOT NULL,
    stopped_at TEXT,
    rows INTEGER NOT NULL DEFAULT 0,
    digest TEXT
)
";

/// SQL statement to create an index on flight log start time.
pub const CREATE_FLIGHT_LOGS_STARTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flight_logs_started ON flight_logs(started_at DESC)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SAMPLES_TABLE,
    CREATE_SAMPLES_TIMESTAMP_INDEX,
    CREATE_FLIGHT_LOGS_TABLE,
    CREATE_FLIGHT_LOGS_STARTED_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_create_samples_table_contains_required_columns() {
        assert!(CREATE_SAMPLES_TABLE.contains("id INTEGER PRIMARY KEY"));
        assert!(CREATE_SAMPLES_TABLE.contains("timestamp TEXT NOT NULL"));
        assert!(CREATE_SAMPLES_TABLE.contains("payload TEXT NOT NULL"));
    }

    #[test]
    fn test_create_flight_logs_table_contains_required_columns() {
        assert!(CREATE_FLIGHT_LOGS_TABLE.contains("path TEXT NOT NULL"));
        assert!(CREATE_FLIGHT_LOGS_TABLE.contains("started_at TEXT NOT NULL"));
        assert!(CREATE_FLIGHT_LOGS_TABLE.contains("digest TEXT"));
    }

    #[test]
    fn test_create_metadata_table_structure() {
        assert!(CREATE_METADATA_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_METADATA_TABLE.contains("value TEXT NOT NULL"));
    }
}
