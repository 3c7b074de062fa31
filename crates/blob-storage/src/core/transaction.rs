//! Scoped transactions.
//!
//! A [`Transaction`] is a guard over a mutably borrowed [`Connection`]. While it is
//! alive no other transaction can start on that connection. It ends in exactly one
//! of three ways:
//!
//! - [`commit`](Transaction::commit) makes the work durable
//! - [`rollback`](Transaction::rollback) discards it
//! - dropping the guard marks the transaction abandoned, and the connection rolls
//!   it back before its next use
//!
//! # Example
//!
//! ```ignore
//! use helios_blob_storage::core::{Query, TransactionMode};
//!
//! let mut tx = connection.begin(TransactionMode::ReadWrite).await?;
//! let result = tx
//!     .execute(&Query::new("DELETE FROM storagearea WHERE uuid = ${uuid}").bind("uuid", id))
//!     .await;
//! tx.complete(result).await?;
//! ```

use tracing::warn;

use crate::error::StorageResult;

use super::connection::Connection;
use super::dialect::Dialect;
use super::driver::Row;
use super::query::Query;

/// Access mode requested when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Only reads are permitted.
    ReadOnly,
    /// Reads and writes are permitted.
    ReadWrite,
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "read-only"),
            TransactionMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// An open transaction on a [`Connection`].
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    mode: TransactionMode,
    finished: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("dialect", &self.conn.dialect())
            .field("mode", &self.mode)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(conn: &'c mut Connection, mode: TransactionMode) -> Self {
        Self {
            conn,
            mode,
            finished: false,
        }
    }

    /// Access mode the transaction was opened with.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Dialect of the underlying connection.
    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    /// Runs a write statement and returns the number of affected rows.
    pub async fn execute(&mut self, query: &Query) -> StorageResult<u64> {
        self.conn.execute(query).await
    }

    /// Runs a statement that takes no parameters, such as DDL.
    pub async fn execute_raw(&mut self, sql: &str) -> StorageResult<u64> {
        self.conn.execute_raw(sql).await
    }

    /// Runs a query inside the transaction.
    pub async fn query(&mut self, query: &Query) -> StorageResult<Vec<Row>> {
        self.conn.query(query).await
    }

    /// Makes the transaction's work durable.
    pub async fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        self.conn.commit().await
    }

    /// Discards the transaction's work.
    pub async fn rollback(mut self) -> StorageResult<()> {
        self.finished = true;
        self.conn.rollback().await
    }

    /// Commits if `result` is `Ok`, rolls back otherwise, and passes the result on.
    ///
    /// A failed rollback is logged and the original error is returned.
    pub async fn complete<T>(self, result: StorageResult<T>) -> StorageResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed operation also failed");
                }
                Err(e)
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.abandon();
        }
    }
}
