//! Open connections with a detected dialect.
//!
//! A [`Connection`] wraps a driver connection, remembers the dialect detected when
//! it was opened, and tracks transaction state so misuse fails with a
//! [`TransactionError`] instead of reaching the server.

use tracing::{debug, warn};

use crate::error::{ConnectionError, DialectError, StorageResult, TransactionError};

use super::dialect::{Dialect, DialectProfile};
use super::driver::{DriverConnection, DriverError, DriverErrorKind, Engine, Row};
use super::query::Query;
use super::transaction::{Transaction, TransactionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Open(TransactionMode),
    /// The guard was dropped without commit or rollback.
    Abandoned,
}

/// A live database session.
pub struct Connection {
    inner: Box<dyn DriverConnection>,
    engine: Engine,
    dialect: Dialect,
    dbms_name: String,
    state: TxState,
    broken: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &self.engine)
            .field("dialect", &self.dialect)
            .field("dbms_name", &self.dbms_name)
            .field("state", &self.state)
            .field("broken", &self.broken)
            .finish()
    }
}

impl Connection {
    /// Wraps a freshly opened driver connection and detects its dialect.
    pub(crate) async fn establish(
        engine: Engine,
        mut inner: Box<dyn DriverConnection>,
    ) -> Result<Self, DriverError> {
        let dbms_name = inner.dbms_name().await?;
        let dialect = Dialect::detect(&dbms_name);
        debug!(engine = %engine, dbms = %dbms_name, dialect = %dialect, "Detected SQL dialect");

        Ok(Self {
            inner,
            engine,
            dialect,
            dbms_name,
            state: TxState::Idle,
            broken: false,
        })
    }

    /// Engine of the driver that opened the connection.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Dialect detected when the connection opened.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Product name and version reported by the server.
    pub fn dbms_name(&self) -> &str {
        &self.dbms_name
    }

    /// Returns true once the driver reported the connection as lost.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        matches!(self.state, TxState::Open(_))
    }

    /// Catalog entry for the detected dialect.
    pub fn profile(&self) -> Result<&'static DialectProfile, DialectError> {
        self.dialect
            .profile()
            .map_err(|_| DialectError::Unsupported {
                dbms_name: self.dbms_name.clone(),
            })
    }

    /// Starts a transaction.
    ///
    /// Fails with [`TransactionError::AlreadyOpen`] if one is already running.
    pub async fn begin(&mut self, mode: TransactionMode) -> StorageResult<Transaction<'_>> {
        self.ensure_usable()?;
        self.resolve_abandoned().await?;
        if let TxState::Open(_) = self.state {
            return Err(TransactionError::AlreadyOpen.into());
        }

        let result = self.inner.begin(mode).await;
        self.check(result)?;
        self.state = TxState::Open(mode);
        Ok(Transaction::new(self, mode))
    }

    /// Runs a write statement inside the open read-write transaction.
    pub async fn execute(&mut self, query: &Query) -> StorageResult<u64> {
        self.ensure_writable()?;
        let (sql, params) = query.format(self.profile()?.placeholder)?;
        let result = self.inner.execute(&sql, &params).await;
        self.check(result)
    }

    pub(crate) async fn execute_raw(&mut self, sql: &str) -> StorageResult<u64> {
        self.ensure_writable()?;
        let result = self.inner.execute(sql, &[]).await;
        self.check(result)
    }

    /// Runs a query, inside the open transaction if there is one.
    pub async fn query(&mut self, query: &Query) -> StorageResult<Vec<Row>> {
        self.ensure_usable()?;
        self.resolve_abandoned().await?;
        let (sql, params) = query.format(self.profile()?.placeholder)?;
        let result = self.inner.query(&sql, &params).await;
        self.check(result)
    }

    pub(crate) async fn commit(&mut self) -> StorageResult<()> {
        self.ensure_usable()?;
        if !self.in_transaction() {
            return Err(TransactionError::NotOpen.into());
        }
        let result = self.inner.commit().await;
        self.state = TxState::Idle;
        self.check(result)
    }

    pub(crate) async fn rollback(&mut self) -> StorageResult<()> {
        if self.broken {
            // the server discards the transaction with the session
            self.state = TxState::Idle;
            return Ok(());
        }
        if self.state == TxState::Idle {
            return Err(TransactionError::NotOpen.into());
        }
        let result = self.inner.rollback().await;
        self.state = TxState::Idle;
        self.check(result)
    }

    /// Closes the session, rolling back any transaction left open.
    pub async fn close(mut self) -> StorageResult<()> {
        if self.broken {
            return Ok(());
        }
        if self.state != TxState::Idle {
            if let Err(e) = self.inner.rollback().await {
                warn!(error = %e, "Rollback on close failed");
            }
            self.state = TxState::Idle;
        }
        let result = self.inner.close().await;
        self.check(result)
    }

    /// Called by a dropped [`Transaction`] guard.
    pub(crate) fn abandon(&mut self) {
        if let TxState::Open(mode) = self.state {
            debug!(mode = %mode, "Transaction dropped without commit, rolling back on next use");
            self.state = TxState::Abandoned;
        }
    }

    async fn resolve_abandoned(&mut self) -> StorageResult<()> {
        if self.state != TxState::Abandoned {
            return Ok(());
        }
        let result = self.inner.rollback().await;
        self.state = TxState::Idle;
        self.check(result)
    }

    fn ensure_usable(&self) -> StorageResult<()> {
        if self.broken {
            return Err(ConnectionError::Lost {
                message: "connection was lost earlier".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_usable()?;
        match self.state {
            TxState::Open(TransactionMode::ReadWrite) => Ok(()),
            TxState::Open(TransactionMode::ReadOnly) => Err(TransactionError::ReadOnly.into()),
            TxState::Idle | TxState::Abandoned => Err(TransactionError::NotOpen.into()),
        }
    }

    /// Converts a driver result, marking the connection broken on connection loss.
    fn check<T>(&mut self, result: Result<T, DriverError>) -> StorageResult<T> {
        if let Err(e) = &result {
            if e.kind() == DriverErrorKind::ConnectionLost {
                warn!(engine = %self.engine, error = %e, "Connection lost");
                self.broken = true;
                self.state = TxState::Idle;
            }
        }
        result.map_err(Into::into)
    }
}
