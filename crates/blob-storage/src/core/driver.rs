//! Driver abstraction for SQL engines.
//!
//! This module defines the driver-neutral connectivity layer. A [`Driver`] opens
//! connections for one [`Engine`], and a [`DriverConnection`] exposes the small
//! statement surface the storage area needs: transaction control, statements that
//! report affected rows, and queries that return rows of [`Value`]s.
//!
//! Storage code never touches a native driver type. Every bound parameter and every
//! returned column crosses this boundary as a [`Value`], and every failure crosses it
//! as a classified [`DriverError`].

use std::fmt::{self, Debug};

use async_trait::async_trait;
use thiserror::Error;

use super::connection_string::ConnectionString;
use super::transaction::TransactionMode;

/// Identifies the database engine a connection string targets.
///
/// The engine selects the driver. The SQL dialect is detected separately from the
/// server's self-reported product name once the connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// PostgreSQL database.
    Postgres,
    /// MySQL or MariaDB database.
    MySql,
    /// Microsoft SQL Server.
    MsSql,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Sqlite => write!(f, "sqlite"),
            Engine::Postgres => write!(f, "postgres"),
            Engine::MySql => write!(f, "mysql"),
            Engine::MsSql => write!(f, "mssql"),
        }
    }
}

/// A parameter or column value exchanged with a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Any integer column.
    Integer(i64),
    /// Character data.
    Text(String),
    /// Binary data.
    Binary(Vec<u8>),
}

impl Value {
    /// Returns the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the binary payload, if this is binary.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Binary(_) => "binary",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

/// One result row, columns in select-list order.
pub type Row = Vec<Value>;

/// Classification of a driver failure.
///
/// Connection establishment retries every kind except
/// [`InvalidConnectionString`](DriverErrorKind::InvalidConnectionString) and
/// [`Rejected`](DriverErrorKind::Rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    /// The connection target cannot be understood by the driver.
    InvalidConnectionString,
    /// The server refused the client: bad credentials, unknown database, no permission.
    Rejected,
    /// The server could not be reached or is temporarily busy.
    Unavailable,
    /// An established connection dropped.
    ConnectionLost,
    /// A unique or primary key constraint rejected a write.
    UniqueViolation,
    /// Any other statement failure.
    Statement,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverErrorKind::InvalidConnectionString => "invalid connection string",
            DriverErrorKind::Rejected => "rejected",
            DriverErrorKind::Unavailable => "unavailable",
            DriverErrorKind::ConnectionLost => "connection lost",
            DriverErrorKind::UniqueViolation => "unique violation",
            DriverErrorKind::Statement => "statement failed",
        };
        write!(f, "{}", name)
    }
}

/// A classified failure reported by a driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
}

impl DriverError {
    /// Creates an error of `kind`.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classification of the failure.
    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    /// Driver's description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if retrying the same connection attempt cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::InvalidConnectionString | DriverErrorKind::Rejected
        )
    }
}

/// Opens connections to one database engine.
///
/// Drivers are registered with a [`DriverManager`](crate::backends::DriverManager)
/// and looked up by [`Engine`] when a connection factory opens a connection.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// The engine this driver serves.
    fn engine(&self) -> Engine;

    /// Human-readable driver name used in logs.
    fn name(&self) -> &'static str;

    /// Opens a new connection to the target.
    ///
    /// A failed attempt must not leave a partially open handle behind.
    async fn connect(
        &self,
        target: &ConnectionString,
    ) -> Result<Box<dyn DriverConnection>, DriverError>;
}

/// A live connection opened by a [`Driver`].
///
/// Statements are passed with placeholders already rendered in the connection's
/// dialect, and parameters in placeholder order.
#[async_trait]
pub trait DriverConnection: Send {
    /// The server's self-reported product name and version.
    async fn dbms_name(&mut self) -> Result<String, DriverError>;

    /// Starts a transaction in `mode`.
    async fn begin(&mut self, mode: TransactionMode) -> Result<(), DriverError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), DriverError>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError>;

    /// Runs a query and returns all result rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Closes the connection. Later calls fail with
    /// [`ConnectionLost`](DriverErrorKind::ConnectionLost).
    async fn close(&mut self) -> Result<(), DriverError>;
}
