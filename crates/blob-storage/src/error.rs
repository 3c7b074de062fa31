//! Error types for the storage area.
//!
//! This module defines all error types used throughout the crate, following a
//! hierarchy that separates record errors, connection errors, dialect and schema
//! errors, transaction state errors, backend errors and configuration errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::core::Dialect;
use crate::core::driver::{DriverError, DriverErrorKind, Engine};

/// The primary error type for all storage area operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record state errors
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Connection establishment and connection loss
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// SQL dialect detection errors
    #[error(transparent)]
    Dialect(#[from] DialectError),

    /// Storage table bootstrap errors
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Transaction misuse
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors related to the state of a stored record.
#[derive(Error, Debug)]
pub enum RecordError {
    /// No record exists for the identifier.
    #[error("record not found: {id}")]
    NotFound { id: String },

    /// A record with the identifier already exists.
    #[error("record already exists: {id}")]
    DuplicateKey { id: String },

    /// The requested byte range lies outside the stored payload.
    #[error("range [{offset}, {offset}+{length}) out of bounds for record {id} of {size} bytes")]
    InvalidRange {
        id: String,
        offset: u64,
        length: u64,
        size: u64,
    },
}

/// Errors raised while opening or holding a database connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    #[error("no driver registered for engine '{engine}'")]
    NoDriver { engine: Engine },

    /// The server refused the connection and retrying will not help.
    #[error("connection rejected: {source}")]
    Rejected {
        #[source]
        source: DriverError,
    },

    #[error("connection failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: DriverError,
    },

    #[error("connection lost: {message}")]
    Lost { message: String },
}

/// Errors raised while mapping a server to a known SQL dialect.
#[derive(Error, Debug)]
pub enum DialectError {
    /// The server speaks no dialect the catalog knows.
    #[error("unsupported SQL dialect: {dbms_name}")]
    Unsupported {
        /// Product name reported by the server.
        dbms_name: String,
    },

    /// A reconnect reached a server speaking another dialect than the one the
    /// storage area was opened against.
    #[error("server dialect changed from {expected} to {found}")]
    Changed {
        /// Dialect detected when the storage area was opened.
        expected: Dialect,
        /// Dialect detected on the new connection.
        found: Dialect,
    },
}

/// Errors raised while preparing the storage table.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot initialize table '{table}': {message}")]
    Initialization {
        table: String,
        message: String,
        #[source]
        source: Option<Box<StorageError>>,
    },
}

/// Errors caused by misuse of the transaction protocol.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("a transaction is already open on this connection")]
    AlreadyOpen,

    #[error("no transaction is open on this connection")]
    NotOpen,

    #[error("write attempted inside a read-only transaction")]
    ReadOnly,
}

/// Errors reported by the database engine or the driver.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("capability '{capability}' not supported by {backend_name}")]
    UnsupportedCapability {
        backend_name: String,
        capability: String,
    },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("database busy: {message}")]
    Busy { message: String },

    #[error("query execution failed: {message}")]
    QueryError { message: String },

    #[error("unexpected result: {message}")]
    UnexpectedResult { message: String },

    #[error("storage area is closed")]
    Closed,
}

/// Errors in the storage area configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration option '{key}'")]
    Missing { key: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type for storage area operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Returns true if the error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Record(RecordError::NotFound { .. }))
    }

    /// Returns true if the error reports an identifier collision.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StorageError::Record(RecordError::DuplicateKey { .. }))
    }

    /// Returns true if the connection dropped while the operation was running.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StorageError::Connection(ConnectionError::Lost { .. }))
    }

    /// Returns true if the same call may succeed later without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Connection(
                ConnectionError::Lost { .. } | ConnectionError::RetriesExhausted { .. }
            ) | StorageError::Backend(BackendError::Busy { .. })
        )
    }

    /// Returns true if the backend does not offer the requested operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            StorageError::Backend(BackendError::UnsupportedCapability { .. })
        )
    }
}

impl From<DriverError> for StorageError {
    fn from(err: DriverError) -> Self {
        match err.kind() {
            DriverErrorKind::InvalidConnectionString => {
                StorageError::Connection(ConnectionError::InvalidConnectionString {
                    message: err.message().to_string(),
                })
            }
            DriverErrorKind::Rejected => {
                StorageError::Connection(ConnectionError::Rejected { source: err })
            }
            DriverErrorKind::ConnectionLost => StorageError::Connection(ConnectionError::Lost {
                message: err.message().to_string(),
            }),
            DriverErrorKind::Unavailable => StorageError::Backend(BackendError::Busy {
                message: err.message().to_string(),
            }),
            DriverErrorKind::UniqueViolation => {
                StorageError::Backend(BackendError::ConstraintViolation {
                    message: err.message().to_string(),
                })
            }
            DriverErrorKind::Statement => StorageError::Backend(BackendError::QueryError {
                message: err.message().to_string(),
            }),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Config(ConfigError::Invalid {
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_display() {
        let err = StorageError::Record(RecordError::NotFound {
            id: "a1b2".to_string(),
        });
        assert_eq!(err.to_string(), "record not found: a1b2");
        assert!(err.is_not_found());
        assert!(!err.is_duplicate_key());
    }

    #[test]
    fn test_invalid_range_display() {
        let err = RecordError::InvalidRange {
            id: "x".to_string(),
            offset: 10,
            length: 5,
            size: 12,
        };
        assert_eq!(
            err.to_string(),
            "range [10, 10+5) out of bounds for record x of 12 bytes"
        );
    }

    #[test]
    fn test_driver_error_classification() {
        let lost: StorageError =
            DriverError::new(DriverErrorKind::ConnectionLost, "socket closed").into();
        assert!(lost.is_connection_lost());

        let unique: StorageError =
            DriverError::new(DriverErrorKind::UniqueViolation, "duplicate key").into();
        assert!(matches!(
            unique,
            StorageError::Backend(BackendError::ConstraintViolation { .. })
        ));

        let rejected: StorageError =
            DriverError::new(DriverErrorKind::Rejected, "password authentication failed").into();
        assert!(matches!(
            rejected,
            StorageError::Connection(ConnectionError::Rejected { .. })
        ));
    }

    #[test]
    fn test_retries_exhausted_keeps_source() {
        use std::error::Error as _;

        let err = ConnectionError::RetriesExhausted {
            attempts: 3,
            source: DriverError::new(DriverErrorKind::Unavailable, "connection refused"),
        };
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_unsupported_capability() {
        let err = StorageError::Backend(BackendError::UnsupportedCapability {
            backend_name: "SQLite".to_string(),
            capability: "read-range".to_string(),
        });
        assert!(err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "capability 'read-range' not supported by SQLite"
        );
    }
}
