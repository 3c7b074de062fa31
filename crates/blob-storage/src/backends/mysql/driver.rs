//! MySQL driver built on sqlx.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{Column, Connection, Executor, Row as _, TypeInfo};

use crate::core::{
    ConnectionString, Driver, DriverConnection, DriverError, DriverErrorKind, Engine, Row,
    TransactionMode, Value,
};

/// Configuration for the MySQL driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MySqlDriverConfig {
    /// Port used when the connection string names none.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// User used when the connection string names none.
    #[serde(default = "default_user")]
    pub default_user: String,
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

impl Default for MySqlDriverConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            default_user: default_user(),
        }
    }
}

/// Opens MySQL and MariaDB connections.
#[derive(Debug, Clone, Default)]
pub struct MySqlDriver {
    config: MySqlDriverConfig,
}

impl MySqlDriver {
    /// Creates a driver with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver with `config`.
    pub fn with_config(config: MySqlDriverConfig) -> Self {
        Self { config }
    }

    fn connect_options(&self, target: &ConnectionString) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(target.host().unwrap_or("localhost"))
            .port(target.port().unwrap_or(self.config.default_port))
            .username(target.user().unwrap_or(&self.config.default_user));
        if let Some(password) = target.password() {
            options = options.password(password);
        }
        if let Some(database) = target.database() {
            options = options.database(database);
        }
        options
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn connect(
        &self,
        target: &ConnectionString,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        let conn = MySqlConnection::connect_with(&self.connect_options(target))
            .await
            .map_err(classify_connect)?;
        Ok(Box::new(MySqlDriverConnection { conn: Some(conn) }))
    }
}

struct MySqlDriverConnection {
    conn: Option<MySqlConnection>,
}

impl MySqlDriverConnection {
    fn conn(&mut self) -> Result<&mut MySqlConnection, DriverError> {
        self.conn.as_mut().ok_or_else(|| {
            DriverError::new(DriverErrorKind::ConnectionLost, "MySQL connection is closed")
        })
    }

    async fn simple(&mut self, sql: &str) -> Result<(), DriverError> {
        let conn = self.conn()?;
        conn.execute(sql).await.map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl DriverConnection for MySqlDriverConnection {
    async fn dbms_name(&mut self) -> Result<String, DriverError> {
        let conn = self.conn()?;
        let version: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&mut *conn)
            .await
            .map_err(classify)?;
        Ok(format!("MySQL {}", version))
    }

    async fn begin(&mut self, mode: TransactionMode) -> Result<(), DriverError> {
        let sql = match mode {
            TransactionMode::ReadWrite => "START TRANSACTION READ WRITE",
            TransactionMode::ReadOnly => "START TRANSACTION READ ONLY",
        };
        self.simple(sql).await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.simple("ROLLBACK").await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let conn = self.conn()?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *conn)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let conn = self.conn()?;
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *conn)
            .await
            .map_err(classify)?;
        rows.iter().map(decode_row).collect()
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(classify)?;
        }
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: SqlxQuery<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> SqlxQuery<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<Vec<u8>>),
            Value::Integer(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Binary(v) => query.bind(v.as_slice()),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> Result<Row, DriverError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let type_name = column.type_info().name();
            let value = if type_name.contains("BLOB") || type_name.contains("BINARY") {
                row.try_get::<Option<Vec<u8>>, _>(i)
                    .map(|v| v.map_or(Value::Null, Value::Binary))
            } else if type_name.contains("INT") && type_name.contains("UNSIGNED") {
                row.try_get::<Option<u64>, _>(i).map(|v| {
                    v.map_or(Value::Null, |v| {
                        Value::Integer(i64::try_from(v).unwrap_or(i64::MAX))
                    })
                })
            } else if type_name.contains("INT") {
                row.try_get::<Option<i64>, _>(i)
                    .map(|v| v.map_or(Value::Null, Value::Integer))
            } else if type_name == "BOOLEAN" {
                row.try_get::<Option<bool>, _>(i)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else if type_name == "NULL" {
                Ok(Value::Null)
            } else {
                row.try_get::<Option<String>, _>(i)
                    .map(|v| v.map_or(Value::Null, Value::Text))
            };
            value.map_err(classify)
        })
        .collect()
}

fn database_kind(err: &dyn sqlx::error::DatabaseError) -> DriverErrorKind {
    if err.is_unique_violation() {
        return DriverErrorKind::UniqueViolation;
    }
    match err.code().as_deref() {
        // access denied
        Some("28000") => DriverErrorKind::Rejected,
        // connection failures reported by the server
        Some("08004") | Some("08S01") => DriverErrorKind::Unavailable,
        _ => DriverErrorKind::Statement,
    }
}

/// Classifies a failure while opening a connection.
fn classify_connect(err: sqlx::Error) -> DriverError {
    let kind = match &err {
        sqlx::Error::Configuration(_) => DriverErrorKind::InvalidConnectionString,
        sqlx::Error::Database(db) => match database_kind(db.as_ref()) {
            DriverErrorKind::Statement => DriverErrorKind::Rejected,
            kind => kind,
        },
        _ => DriverErrorKind::Unavailable,
    };
    DriverError::new(kind, err.to_string())
}

/// Classifies a failure on an established connection.
fn classify(err: sqlx::Error) -> DriverError {
    let kind = match &err {
        sqlx::Error::Database(db) => match database_kind(db.as_ref()) {
            DriverErrorKind::Unavailable => DriverErrorKind::ConnectionLost,
            kind => kind,
        },
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
            DriverErrorKind::ConnectionLost
        }
        _ => DriverErrorKind::Statement,
    };
    DriverError::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_connection_loss() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            classify(sqlx::Error::Io(io)).kind(),
            DriverErrorKind::ConnectionLost
        );
    }

    #[test]
    fn test_connect_io_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = classify_connect(sqlx::Error::Io(io));
        assert_eq!(err.kind(), DriverErrorKind::Unavailable);
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_row_not_found_is_statement_error() {
        assert_eq!(
            classify(sqlx::Error::RowNotFound).kind(),
            DriverErrorKind::Statement
        );
    }
}
