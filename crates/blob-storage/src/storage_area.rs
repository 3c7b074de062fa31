//! The SQL-backed storage area.
//!
//! A [`StorageArea`] owns one connection slot guarded by an async mutex, so calls
//! on one storage area are serialized while separate storage areas on the same
//! database rely on the engine's isolation. Every operation runs in its own
//! transaction.
//!
//! When the driver reports the connection as lost, the running operation fails
//! with [`ConnectionError::Lost`](crate::error::ConnectionError::Lost), the
//! connection is discarded, and the next operation opens a new one through the
//! factory's retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::backends::DriverManager;
use crate::config::StorageAreaConfig;
use crate::core::{
    BlobStorage, Connection, ConnectionFactory, Dialect, Query, Row, StorageCapability,
    TransactionMode, Value,
};
use crate::error::{BackendError, DialectError, RecordError, StorageError, StorageResult};
use crate::schema::{self, BootstrapOutcome};
use crate::types::{ContentType, StorageRecord};

const INSERT_RECORD: &str =
    "INSERT INTO storagearea (uuid, content, type) VALUES (${uuid}, ${content}, ${type})";
const SELECT_CONTENT: &str = "SELECT content FROM storagearea WHERE uuid = ${uuid}";
const SELECT_RECORD: &str = "SELECT content, type FROM storagearea WHERE uuid = ${uuid}";
const SELECT_EXISTS: &str = "SELECT 1 FROM storagearea WHERE uuid = ${uuid}";
const DELETE_RECORD: &str = "DELETE FROM storagearea WHERE uuid = ${uuid}";

/// Options for a storage area beyond its connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAreaOptions {
    /// Serve partial reads on dialects that support them.
    #[serde(default)]
    pub enable_range_reads: bool,
}

/// Blob storage over one SQL database.
pub struct StorageArea {
    factory: ConnectionFactory,
    slot: Mutex<Option<Connection>>,
    dialect: Dialect,
    bootstrap: BootstrapOutcome,
    capabilities: Vec<StorageCapability>,
    closed: AtomicBool,
}

impl std::fmt::Debug for StorageArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageArea")
            .field("target", self.factory.target())
            .field("dialect", &self.dialect)
            .field("bootstrap", &self.bootstrap)
            .field("capabilities", &self.capabilities)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StorageArea {
    /// Connects, prepares the storage table and returns a ready storage area.
    ///
    /// Fails without side effects if the connection cannot be opened, the dialect
    /// is unsupported, or the table cannot be created.
    pub async fn open(factory: ConnectionFactory, options: StorageAreaOptions) -> StorageResult<Self> {
        let mut conn = factory.connect().await?;

        let bootstrap = match schema::ensure_schema(&mut conn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(connection = %factory.target(), error = %e, "Storage table bootstrap failed");
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Closing connection after failed bootstrap");
                }
                return Err(e);
            }
        };

        let dialect = conn.dialect();
        let capabilities = StorageCapability::resolve(dialect, options.enable_range_reads);
        info!(
            connection = %factory.target(),
            dialect = %dialect,
            bootstrap = ?bootstrap,
            range_reads = capabilities.contains(&StorageCapability::ReadRange),
            "Storage area ready"
        );

        Ok(Self {
            factory,
            slot: Mutex::new(Some(conn)),
            dialect,
            bootstrap,
            capabilities,
            closed: AtomicBool::new(false),
        })
    }

    /// Opens a storage area from validated configuration.
    pub async fn from_config(
        config: &StorageAreaConfig,
        drivers: Arc<DriverManager>,
    ) -> StorageResult<Self> {
        config.validate()?;
        let factory = ConnectionFactory::new(
            drivers,
            &config.storage_connection_string,
            config.retry_policy(),
        )?;
        let options = StorageAreaOptions {
            enable_range_reads: config.enable_range_reads,
        };
        Self::open(factory, options).await
    }

    /// Dialect detected when the storage area was opened.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// What table bootstrap did when this storage area was opened.
    pub fn bootstrap_outcome(&self) -> BootstrapOutcome {
        self.bootstrap
    }

    /// Factory used to open and reopen the connection.
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases the connection. Later operations fail with [`BackendError::Closed`].
    pub async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        let conn = self.slot.lock().await.take();
        match conn {
            Some(conn) => {
                info!(connection = %self.factory.target(), "Closing storage area");
                conn.close().await
            }
            None => Ok(()),
        }
    }

    /// Locks the connection slot, reconnecting if it is empty.
    async fn session(&self) -> StorageResult<Session<'_>> {
        if self.is_closed() {
            return Err(BackendError::Closed.into());
        }
        let mut guard = self.slot.lock().await;
        if self.is_closed() {
            return Err(BackendError::Closed.into());
        }

        if guard.is_none() {
            info!(connection = %self.factory.target(), "Reconnecting storage area");
            *guard = Some(self.reconnect().await?);
        }
        Ok(Session { guard })
    }

    /// Opens a replacement connection and checks it still reaches a usable table.
    async fn reconnect(&self) -> StorageResult<Connection> {
        let mut conn = self.factory.connect().await?;

        let checked = if conn.dialect() != self.dialect {
            Err(DialectError::Changed {
                expected: self.dialect,
                found: conn.dialect(),
            }
            .into())
        } else {
            // the server may have failed over to a database without the table
            schema::ensure_schema(&mut conn).await
        };

        match checked {
            Ok(outcome) => {
                debug!(bootstrap = ?outcome, "Reconnected storage area");
                Ok(conn)
            }
            Err(e) => {
                error!(connection = %self.factory.target(), error = %e, "Reconnected server is not usable");
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Failed to close rejected connection");
                }
                Err(e)
            }
        }
    }

    fn require(&self, capability: StorageCapability) -> StorageResult<()> {
        if self.capabilities.contains(&capability) {
            Ok(())
        } else {
            Err(BackendError::UnsupportedCapability {
                backend_name: self.dialect.to_string(),
                capability: capability.to_string(),
            }
            .into())
        }
    }
}

/// Exclusive use of the connection slot for one operation.
///
/// A connection reported lost is discarded when the session ends.
struct Session<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
}

impl Session<'_> {
    fn connection(&mut self) -> StorageResult<&mut Connection> {
        self.guard
            .as_mut()
            .ok_or_else(|| BackendError::Closed.into())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.guard.as_ref().is_some_and(Connection::is_broken) {
            warn!("Discarding lost connection");
            self.guard.take();
        }
    }
}

#[async_trait]
impl BlobStorage for StorageArea {
    fn backend_name(&self) -> String {
        self.dialect.to_string()
    }

    fn capabilities(&self) -> &[StorageCapability] {
        &self.capabilities
    }

    async fn store(
        &self,
        id: &str,
        content_type: ContentType,
        payload: &[u8],
    ) -> StorageResult<()> {
        debug!(id = id, content_type = %content_type, size = payload.len(), "Storing record");
        let mut session = self.session().await?;
        let conn = session.connection()?;

        let mut tx = conn.begin(TransactionMode::ReadWrite).await?;
        let insert = Query::new(INSERT_RECORD)
            .bind("uuid", id)
            .bind("content", payload)
            .bind("type", content_type.code());
        let result = tx
            .execute(&insert)
            .await
            .map(|_| ())
            .map_err(|e| duplicate_key(e, id));
        tx.complete(result).await
    }

    async fn read(&self, id: &str) -> StorageResult<Vec<u8>> {
        debug!(id = id, "Reading record");
        let mut session = self.session().await?;
        let conn = session.connection()?;

        let mut tx = conn.begin(TransactionMode::ReadOnly).await?;
        let result = match tx.query(&Query::new(SELECT_CONTENT).bind("uuid", id)).await {
            Ok(rows) => first_row(rows, id).and_then(|mut row| payload_of(column(&mut row, 0)?)),
            Err(e) => Err(e),
        };
        tx.complete(result).await
    }

    async fn read_record(&self, id: &str) -> StorageResult<StorageRecord> {
        debug!(id = id, "Reading record with content type");
        let mut session = self.session().await?;
        let conn = session.connection()?;

        let mut tx = conn.begin(TransactionMode::ReadOnly).await?;
        let result = match tx.query(&Query::new(SELECT_RECORD).bind("uuid", id)).await {
            Ok(rows) => first_row(rows, id).and_then(|mut row| {
                let code = integer_of(column(&mut row, 1)?)?;
                let payload = payload_of(column(&mut row, 0)?)?;
                let content_type = i32::try_from(code)
                    .map(ContentType::from_code)
                    .map_err(|_| unexpected(format!("content type {} out of range", code)))?;
                Ok(StorageRecord::new(id, content_type, payload))
            }),
            Err(e) => Err(e),
        };
        tx.complete(result).await
    }

    async fn read_range(&self, id: &str, offset: u64, length: u64) -> StorageResult<Vec<u8>> {
        self.require(StorageCapability::ReadRange)?;
        debug!(id = id, offset = offset, length = length, "Reading record range");

        let out_of_bounds = |size: u64| -> StorageError {
            RecordError::InvalidRange {
                id: id.to_string(),
                offset,
                length,
                size,
            }
            .into()
        };
        let (end, start, count) = match offset.checked_add(length).zip(offset.checked_add(1)) {
            Some((end, first)) => match (i64::try_from(first), i64::try_from(length)) {
                (Ok(start), Ok(count)) => (end, start, count),
                _ => return Err(out_of_bounds(0)),
            },
            None => return Err(out_of_bounds(0)),
        };

        let mut session = self.session().await?;
        let conn = session.connection()?;
        let profile = conn.profile()?;
        let size_sql = format!(
            "SELECT {}(content) FROM storagearea WHERE uuid = ${{uuid}}",
            profile.size_function
        );
        let range_sql = format!(
            "SELECT {}(content, ${{start}}, ${{count}}) FROM storagearea WHERE uuid = ${{uuid}}",
            profile.range_function
        );

        let mut tx = conn.begin(TransactionMode::ReadOnly).await?;

        // bounds are checked against the stored size first, so the range
        // arguments never exceed what the engine's substring function accepts
        let size = match tx.query(&Query::new(size_sql).bind("uuid", id)).await {
            Ok(rows) => first_row(rows, id).and_then(|mut row| size_of(column(&mut row, 0)?)),
            Err(e) => Err(e),
        };
        let result = match size {
            Ok(size) if end > size => Err(out_of_bounds(size)),
            Ok(_) if count == 0 => Ok(Vec::new()),
            Ok(_) => {
                let query = Query::new(range_sql)
                    .bind("uuid", id)
                    .bind("start", start)
                    .bind("count", count);
                match tx.query(&query).await {
                    Ok(rows) => first_row(rows, id)
                        .and_then(|mut row| payload_of(column(&mut row, 0)?)),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        tx.complete(result).await
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        debug!(id = id, "Deleting record");
        let mut session = self.session().await?;
        let conn = session.connection()?;

        let mut tx = conn.begin(TransactionMode::ReadWrite).await?;
        let result = match tx.execute(&Query::new(DELETE_RECORD).bind("uuid", id)).await {
            Ok(0) => Err(not_found(id)),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        tx.complete(result).await
    }

    async fn exists(&self, id: &str) -> StorageResult<bool> {
        let mut session = self.session().await?;
        let conn = session.connection()?;

        let mut tx = conn.begin(TransactionMode::ReadOnly).await?;
        let result = tx
            .query(&Query::new(SELECT_EXISTS).bind("uuid", id))
            .await
            .map(|rows| !rows.is_empty());
        tx.complete(result).await
    }

    async fn size(&self, id: &str) -> StorageResult<u64> {
        let mut session = self.session().await?;
        let conn = session.connection()?;
        let profile = conn.profile()?;
        let sql = format!(
            "SELECT {}(content) FROM storagearea WHERE uuid = ${{uuid}}",
            profile.size_function
        );

        let mut tx = conn.begin(TransactionMode::ReadOnly).await?;
        let result = match tx.query(&Query::new(sql).bind("uuid", id)).await {
            Ok(rows) => first_row(rows, id).and_then(|mut row| size_of(column(&mut row, 0)?)),
            Err(e) => Err(e),
        };
        tx.complete(result).await
    }
}

fn not_found(id: &str) -> StorageError {
    RecordError::NotFound { id: id.to_string() }.into()
}

fn unexpected(message: impl Into<String>) -> StorageError {
    BackendError::UnexpectedResult {
        message: message.into(),
    }
    .into()
}

/// Reports a unique-key violation on insert as a duplicate identifier.
fn duplicate_key(err: StorageError, id: &str) -> StorageError {
    match err {
        StorageError::Backend(BackendError::ConstraintViolation { .. }) => {
            RecordError::DuplicateKey { id: id.to_string() }.into()
        }
        other => other,
    }
}

fn first_row(rows: Vec<Row>, id: &str) -> StorageResult<Row> {
    rows.into_iter().next().ok_or_else(|| not_found(id))
}

fn column(row: &mut Row, index: usize) -> StorageResult<Value> {
    row.get_mut(index)
        .map(|value| std::mem::replace(value, Value::Null))
        .ok_or_else(|| unexpected(format!("missing column {}", index)))
}

fn payload_of(value: Value) -> StorageResult<Vec<u8>> {
    match value {
        Value::Binary(bytes) => Ok(bytes),
        Value::Text(text) => Ok(text.into_bytes()),
        Value::Null => Ok(Vec::new()),
        other => Err(unexpected(format!(
            "expected binary content, found {}",
            other.type_name()
        ))),
    }
}

fn integer_of(value: Value) -> StorageResult<i64> {
    match value {
        Value::Integer(v) => Ok(v),
        Value::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| unexpected(format!("expected an integer, found '{}'", text))),
        other => Err(unexpected(format!(
            "expected an integer, found {}",
            other.type_name()
        ))),
    }
}

fn size_of(value: Value) -> StorageResult<u64> {
    match value {
        Value::Null => Ok(0),
        value => {
            let size = integer_of(value)?;
            u64::try_from(size).map_err(|_| unexpected(format!("negative size {}", size)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DriverError, DriverErrorKind};

    #[test]
    fn test_duplicate_key_mapping() {
        let err: StorageError =
            DriverError::new(DriverErrorKind::UniqueViolation, "UNIQUE constraint failed").into();
        assert!(duplicate_key(err, "abc").is_duplicate_key());

        let err: StorageError = DriverError::new(DriverErrorKind::Statement, "syntax").into();
        assert!(!duplicate_key(err, "abc").is_duplicate_key());
    }

    #[test]
    fn test_payload_decoding() {
        assert_eq!(payload_of(Value::Binary(vec![1, 2])).unwrap(), vec![1, 2]);
        assert!(payload_of(Value::Null).unwrap().is_empty());
        assert!(payload_of(Value::Integer(3)).is_err());
    }

    #[test]
    fn test_size_decoding() {
        assert_eq!(size_of(Value::Integer(12)).unwrap(), 12);
        assert_eq!(size_of(Value::Text("7".to_string())).unwrap(), 7);
        assert!(size_of(Value::Integer(-1)).is_err());
    }

    #[test]
    fn test_missing_row_is_not_found() {
        let err = first_row(Vec::new(), "gone").unwrap_err();
        assert!(err.is_not_found());
    }
}
