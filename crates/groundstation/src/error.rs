//! Error types for groundstation.
//!
//! This module defines all error types used throughout the groundstation crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for groundstation operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Sensor Errors ===
    /// A sensor could not be opened or read.
    #[error("sensor '{name}' failed: {message}")]
    Sensor {
        /// Name of the sensor.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Flight Log Errors ===
    /// A flight log file could not be created.
    #[error("failed to create flight log {path}: {source}")]
    FlightLogCreate {
        /// Path of the log file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No flight log with the given id is known.
    #[error("flight log {id} not found")]
    FlightLogNotFound {
        /// The requested id.
        id: i64,
    },

    /// The flight log was never closed, so it has no digest to check.
    #[error("flight log {id} was never closed; no digest recorded")]
    FlightLogOpen {
        /// The requested id.
        id: i64,
    },

    /// A flight log no longer matches the digest taken when it was closed.
    #[error("{path} has been modified: expected {expected}, found {actual}")]
    FlightLogModified {
        /// Path of the log file.
        path: PathBuf,
        /// Digest recorded at close.
        expected: String,
        /// Digest of the file now.
        actual: String,
    },

    /// Writing a flight log row failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // === Server Errors ===
    /// The HTTP server could not bind or crashed.
    #[error("server error on {address}: {message}")]
    Server {
        /// Address the server was bound to.
        address: String,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for groundstation operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new sensor error.
    #[must_use]
    pub fn sensor(name: &'static str, message: impl Into<String>) -> Self {
        Self::Sensor {
            name,
            message: message.into(),
        }
    }

    /// Create a new server error.
    #[must_use]
    pub fn server(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error came from a sensor.
    #[must_use]
    pub fn is_sensor_error(&self) -> bool {
        matches!(self, Self::Sensor { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FlightLogNotFound { id: 7 };
        assert_eq!(err.to_string(), "flight log 7 not found");

        let err = Error::sensor("bme680", "no device");
        assert_eq!(err.to_string(), "sensor 'bme680' failed: no device");

        let err = Error::FlightLogModified {
            path: PathBuf::from("/logs/a.csv"),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "/logs/a.csv has been modified: expected aa, found bb"
        );
    }

    #[test]
    fn test_error_is_sensor_error() {
        assert!(Error::sensor("ups", "timeout").is_sensor_error());
        assert!(!Error::internal("bug").is_sensor_error());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_server_error() {
        let err = Error::server("0.0.0.0:5000", "address in use");
        let msg = err.to_string();
        assert!(msg.contains("0.0.0.0:5000"));
        assert!(msg.contains("address in use"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "invalid interval".to_string(),
        };
        assert!(err.to_string().contains("invalid interval"));
    }

    #[test]
    fn test_flight_log_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::FlightLogCreate {
            path: PathBuf::from("/root/logs/mission.csv"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("/root/logs/mission.csv"));
        assert!(msg.contains("access denied"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
