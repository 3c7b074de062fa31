//! SQLite driver built on rusqlite.

use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ErrorCode, ToSql, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{
    ConnectionString, Driver, DriverConnection, DriverError, DriverErrorKind, Engine, Row,
    TransactionMode, Value,
};

/// Configuration for the SQLite driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteDriverConfig {
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteDriverConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

/// Opens SQLite databases, in memory or on disk.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    config: SqliteDriverConfig,
}

impl SqliteDriver {
    /// Creates a driver with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver with `config`.
    pub fn with_config(config: SqliteDriverConfig) -> Self {
        Self { config }
    }

    /// Driver configuration.
    pub fn config(&self) -> &SqliteDriverConfig {
        &self.config
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(
        &self,
        target: &ConnectionString,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        let path = target.database().ok_or_else(|| {
            DriverError::new(
                DriverErrorKind::InvalidConnectionString,
                "SQLite target needs a database path",
            )
        })?;

        let conn = if target.is_memory() {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(path)
        }
        .map_err(classify)?;

        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms as u64))
            .map_err(classify)?;

        if self.config.enable_wal && !target.is_memory() {
            let mode: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .map_err(classify)?;
            debug!(path = path, journal_mode = %mode, "Opened SQLite database");
        }

        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }
}

struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> Result<&rusqlite::Connection, DriverError> {
        self.conn.as_ref().ok_or_else(|| {
            DriverError::new(DriverErrorKind::ConnectionLost, "SQLite connection is closed")
        })
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn dbms_name(&mut self) -> Result<String, DriverError> {
        self.conn()?;
        Ok(format!("SQLite {}", rusqlite::version()))
    }

    async fn begin(&mut self, mode: TransactionMode) -> Result<(), DriverError> {
        let sql = match mode {
            TransactionMode::ReadWrite => "BEGIN IMMEDIATE",
            TransactionMode::ReadOnly => "BEGIN DEFERRED",
        };
        self.conn()?.execute_batch(sql).map_err(classify)
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("COMMIT").map_err(classify)
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("ROLLBACK").map_err(classify)
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let affected = stmt.execute(params_from_iter(params.iter())).map_err(classify)?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(classify)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(from_value_ref(row.get_ref(i).map_err(classify)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| classify(e))?;
        }
        Ok(())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Binary(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Text(v.to_string()),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Binary(v.to_vec()),
    }
}

/// Maps a rusqlite error onto the driver error taxonomy.
fn classify(err: rusqlite::Error) -> DriverError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                DriverErrorKind::UniqueViolation
            }
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure => DriverErrorKind::Unavailable,
            ErrorCode::PermissionDenied
            | ErrorCode::NotADatabase
            | ErrorCode::AuthorizationForStatementDenied => DriverErrorKind::Rejected,
            _ => DriverErrorKind::Statement,
        },
        rusqlite::Error::InvalidPath(_) => DriverErrorKind::InvalidConnectionString,
        _ => DriverErrorKind::Statement,
    };
    DriverError::new(kind, err.to_string())
}
