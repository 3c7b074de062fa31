//! PostgreSQL driver built on tokio-postgres.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use crate::core::{
    ConnectionString, Driver, DriverConnection, DriverError, DriverErrorKind, Engine, Row,
    TransactionMode, Value,
};

/// Configuration for the PostgreSQL driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresDriverConfig {
    /// Port used when the connection string names none.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// User used when the connection string names none.
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Reported to the server as `application_name`.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_application_name() -> String {
    "helios-blob-storage".to_string()
}

impl Default for PostgresDriverConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            default_user: default_user(),
            connect_timeout_secs: default_connect_timeout_secs(),
            application_name: default_application_name(),
        }
    }
}

/// Opens PostgreSQL connections.
#[derive(Debug, Clone, Default)]
pub struct PostgresDriver {
    config: PostgresDriverConfig,
}

impl PostgresDriver {
    /// Creates a driver with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver with `config`.
    pub fn with_config(config: PostgresDriverConfig) -> Self {
        Self { config }
    }

    fn client_config(&self, target: &ConnectionString) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(target.host().unwrap_or("localhost"));
        cfg.port(target.port().unwrap_or(self.config.default_port));
        cfg.user(target.user().unwrap_or(&self.config.default_user));
        if let Some(password) = target.password() {
            cfg.password(password);
        }
        if let Some(dbname) = target.database() {
            cfg.dbname(dbname);
        }
        cfg.connect_timeout(Duration::from_secs(self.config.connect_timeout_secs));
        cfg.application_name(&self.config.application_name);
        cfg
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(
        &self,
        target: &ConnectionString,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        let (client, connection) = self
            .client_config(target)
            .connect(NoTls)
            .await
            .map_err(classify_connect)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        Ok(Box::new(PostgresConnection {
            client: Some(client),
        }))
    }
}

struct PostgresConnection {
    client: Option<Client>,
}

impl PostgresConnection {
    fn client(&self) -> Result<&Client, DriverError> {
        self.client.as_ref().ok_or_else(|| {
            DriverError::new(
                DriverErrorKind::ConnectionLost,
                "PostgreSQL connection is closed",
            )
        })
    }
}

#[async_trait]
impl DriverConnection for PostgresConnection {
    async fn dbms_name(&mut self) -> Result<String, DriverError> {
        let row = self
            .client()?
            .query_one("SELECT version()", &[])
            .await
            .map_err(classify)?;
        row.try_get::<_, String>(0).map_err(classify)
    }

    async fn begin(&mut self, mode: TransactionMode) -> Result<(), DriverError> {
        let sql = match mode {
            TransactionMode::ReadWrite => "BEGIN ISOLATION LEVEL READ COMMITTED READ WRITE",
            TransactionMode::ReadOnly => "BEGIN ISOLATION LEVEL READ COMMITTED READ ONLY",
        };
        self.client()?.batch_execute(sql).await.map_err(classify)
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.client()?.batch_execute("COMMIT").await.map_err(classify)
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.client()?
            .batch_execute("ROLLBACK")
            .await
            .map_err(classify)
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let client = self.client()?;
        let stmt = client.prepare(sql).await.map_err(classify)?;
        let bound = bind_params(stmt.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect();
        client.execute(&stmt, &refs).await.map_err(classify)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let client = self.client()?;
        let stmt = client.prepare(sql).await.map_err(classify)?;
        let bound = bind_params(stmt.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect();
        let rows = client.query(&stmt, &refs).await.map_err(classify)?;
        rows.iter().map(decode_row).collect()
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        // dropping the client ends the spawned connection task
        self.client.take();
        Ok(())
    }
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Converts values to the parameter types the server inferred for the statement.
fn bind_params(types: &[Type], values: &[Value]) -> Result<Vec<BoxedParam>, DriverError> {
    if types.len() != values.len() {
        return Err(DriverError::new(
            DriverErrorKind::Statement,
            format!(
                "statement expects {} parameter(s), {} given",
                types.len(),
                values.len()
            ),
        ));
    }

    types
        .iter()
        .zip(values)
        .map(|(ty, value)| match value {
            Value::Integer(v) => integer_param(*v, ty),
            Value::Text(v) => Ok(Box::new(v.clone()) as BoxedParam),
            Value::Binary(v) => Ok(Box::new(v.clone()) as BoxedParam),
            Value::Null => Ok(null_param(ty)),
        })
        .collect()
}

fn integer_param(value: i64, ty: &Type) -> Result<BoxedParam, DriverError> {
    let out_of_range = |_| {
        DriverError::new(
            DriverErrorKind::Statement,
            format!("integer {} out of range for {}", value, ty),
        )
    };
    if *ty == Type::INT2 {
        Ok(Box::new(i16::try_from(value).map_err(out_of_range)?) as BoxedParam)
    } else if *ty == Type::INT4 {
        Ok(Box::new(i32::try_from(value).map_err(out_of_range)?) as BoxedParam)
    } else {
        Ok(Box::new(value) as BoxedParam)
    }
}

fn null_param(ty: &Type) -> BoxedParam {
    if *ty == Type::BYTEA {
        Box::new(None::<Vec<u8>>) as BoxedParam
    } else if *ty == Type::INT2 {
        Box::new(None::<i16>) as BoxedParam
    } else if *ty == Type::INT4 {
        Box::new(None::<i32>) as BoxedParam
    } else if *ty == Type::INT8 {
        Box::new(None::<i64>) as BoxedParam
    } else {
        Box::new(None::<String>) as BoxedParam
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, DriverError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let ty = column.type_();
            let value = if *ty == Type::BYTEA {
                row.try_get::<_, Option<Vec<u8>>>(i)
                    .map(|v| v.map_or(Value::Null, Value::Binary))
            } else if *ty == Type::INT2 {
                row.try_get::<_, Option<i16>>(i)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else if *ty == Type::INT4 {
                row.try_get::<_, Option<i32>>(i)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else if *ty == Type::INT8 {
                row.try_get::<_, Option<i64>>(i)
                    .map(|v| v.map_or(Value::Null, Value::Integer))
            } else if *ty == Type::BOOL {
                row.try_get::<_, Option<bool>>(i)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else {
                row.try_get::<_, Option<String>>(i)
                    .map(|v| v.map_or(Value::Null, Value::Text))
            };
            value.map_err(classify)
        })
        .collect()
}

fn has_io_source(err: &tokio_postgres::Error) -> bool {
    std::error::Error::source(err).is_some_and(|s| s.is::<std::io::Error>())
}

fn sql_state_kind(code: &SqlState) -> Option<DriverErrorKind> {
    if *code == SqlState::UNIQUE_VIOLATION {
        Some(DriverErrorKind::UniqueViolation)
    } else if *code == SqlState::INVALID_PASSWORD
        || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
        || *code == SqlState::INVALID_CATALOG_NAME
        || *code == SqlState::INSUFFICIENT_PRIVILEGE
    {
        Some(DriverErrorKind::Rejected)
    } else if *code == SqlState::TOO_MANY_CONNECTIONS
        || *code == SqlState::CANNOT_CONNECT_NOW
        || *code == SqlState::ADMIN_SHUTDOWN
    {
        Some(DriverErrorKind::Unavailable)
    } else {
        None
    }
}

/// Classifies a failure while opening a connection.
fn classify_connect(err: tokio_postgres::Error) -> DriverError {
    let kind = match err.code().and_then(sql_state_kind) {
        Some(kind) => kind,
        // refused, unreachable, timed out, closed during startup
        None => DriverErrorKind::Unavailable,
    };
    DriverError::new(kind, err.to_string())
}

/// Classifies a failure on an established connection.
fn classify(err: tokio_postgres::Error) -> DriverError {
    let kind = if err.is_closed() || has_io_source(&err) {
        DriverErrorKind::ConnectionLost
    } else {
        match err.code().and_then(sql_state_kind) {
            Some(DriverErrorKind::Unavailable) => DriverErrorKind::ConnectionLost,
            Some(kind) => kind,
            None => DriverErrorKind::Statement,
        }
    };
    DriverError::new(kind, err.to_string())
}
