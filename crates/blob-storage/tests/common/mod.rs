//! Test infrastructure for the storage area.
//!
//! Provides temporary SQLite databases and [`FlakyDriver`], a SQLite driver
//! wrapper that fails connection attempts or drops connections on demand. It can
//! also pose as a MySQL server, answering MySQL-only statements itself and
//! committing implicitly before DDL the way MySQL does.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use helios_blob_storage::backends::DriverManager;
use helios_blob_storage::backends::sqlite::SqliteDriver;
use helios_blob_storage::core::{
    ConnectionFactory, ConnectionString, Driver, DriverConnection, DriverError, DriverErrorKind,
    Engine, RetryPolicy, Row, TransactionMode, Value,
};
use helios_blob_storage::{StorageArea, StorageAreaOptions};

/// A SQLite database file in a directory removed on drop.
pub struct TempDatabase {
    _dir: TempDir,
    path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("storage.db");
        Self { _dir: dir, path }
    }

    pub fn target(&self) -> ConnectionString {
        ConnectionString::sqlite_file(self.path.to_string_lossy().to_string())
    }

    pub fn connection_string(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// A retry policy with a 10ms pause between attempts.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(10))
}

pub fn sqlite_factory(db: &TempDatabase) -> ConnectionFactory {
    let drivers = Arc::new(DriverManager::with_builtin_drivers());
    ConnectionFactory::from_target(drivers, db.target(), fast_retry(0))
}

/// Opens a storage area on a temporary database.
pub async fn open_area(db: &TempDatabase) -> StorageArea {
    StorageArea::open(sqlite_factory(db), StorageAreaOptions::default())
        .await
        .expect("Failed to open storage area")
}

/// Shared fault switches for [`FlakyDriver`] and its connections.
#[derive(Debug)]
pub struct Faults {
    connect_failures: AtomicU32,
    failure_kind: Mutex<DriverErrorKind>,
    attempts: AtomicU32,
    lose_next_statement: AtomicBool,
    dbms_name: Mutex<Option<String>>,
    mysql: AtomicBool,
    rival_creates_table: AtomicBool,
    locks_taken: AtomicU32,
    locks_released: AtomicU32,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            connect_failures: AtomicU32::new(0),
            failure_kind: Mutex::new(DriverErrorKind::Unavailable),
            attempts: AtomicU32::new(0),
            lose_next_statement: AtomicBool::new(false),
            dbms_name: Mutex::new(None),
            mysql: AtomicBool::new(false),
            rival_creates_table: AtomicBool::new(false),
            locks_taken: AtomicU32::new(0),
            locks_released: AtomicU32::new(0),
        }
    }
}

impl Faults {
    /// Fails the next `count` connection attempts with `kind`.
    pub fn fail_connects(&self, count: u32, kind: DriverErrorKind) {
        *self.failure_kind.lock() = kind;
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Makes the next statement on any open connection fail as a lost connection.
    pub fn lose_connection(&self) {
        self.lose_next_statement.store(true, Ordering::SeqCst);
    }

    /// Makes new connections report another product name.
    pub fn report_dbms(&self, name: &str) {
        *self.dbms_name.lock() = Some(name.to_string());
    }

    /// Makes new connections behave like a MySQL 8 server.
    pub fn emulate_mysql(&self) {
        self.report_dbms("MySQL 8.0.36");
        self.mysql.store(true, Ordering::SeqCst);
    }

    /// Makes another session create the storage table just before our next
    /// `CREATE TABLE` runs.
    pub fn rival_creates_table(&self) {
        self.rival_creates_table.store(true, Ordering::SeqCst);
    }

    /// Named locks taken and released through `GET_LOCK` / `RELEASE_LOCK`.
    pub fn named_locks(&self) -> (u32, u32) {
        (
            self.locks_taken.load(Ordering::SeqCst),
            self.locks_released.load(Ordering::SeqCst),
        )
    }

    fn is_mysql(&self) -> bool {
        self.mysql.load(Ordering::SeqCst)
    }

    fn answer_named_lock(&self, sql: &str) -> Option<Vec<Row>> {
        let counter = if sql.contains("GET_LOCK(") {
            &self.locks_taken
        } else if sql.contains("RELEASE_LOCK(") {
            &self.locks_released
        } else {
            return None;
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Some(vec![vec![Value::Integer(1)]])
    }

    fn take_connect_failure(&self) -> Option<DriverErrorKind> {
        let remaining = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        remaining.ok().map(|_| *self.failure_kind.lock())
    }

    fn take_lost(&self) -> bool {
        self.lose_next_statement.swap(false, Ordering::SeqCst)
    }
}

/// SQLite driver with injectable faults.
#[derive(Debug, Clone, Default)]
pub struct FlakyDriver {
    inner: SqliteDriver,
    faults: Arc<Faults>,
}

impl FlakyDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> Arc<Faults> {
        self.faults.clone()
    }

    /// A factory for `target` that connects through this driver.
    pub fn factory(&self, target: ConnectionString, policy: RetryPolicy) -> ConnectionFactory {
        let drivers = DriverManager::new();
        drivers.register(Arc::new(self.clone()));
        ConnectionFactory::from_target(Arc::new(drivers), target, policy)
    }
}

#[async_trait]
impl Driver for FlakyDriver {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn name(&self) -> &'static str {
        "flaky-sqlite"
    }

    async fn connect(
        &self,
        target: &ConnectionString,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        self.faults.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.faults.take_connect_failure() {
            return Err(DriverError::new(kind, "injected connect failure"));
        }
        let inner = self.inner.connect(target).await?;
        Ok(Box::new(FlakyConnection {
            inner,
            faults: self.faults.clone(),
            driver: self.inner.clone(),
            target: target.clone(),
            in_transaction: false,
        }))
    }
}

const SQLITE_TABLE_EXISTS: &str = "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?";

struct FlakyConnection {
    inner: Box<dyn DriverConnection>,
    faults: Arc<Faults>,
    driver: SqliteDriver,
    target: ConnectionString,
    in_transaction: bool,
}

impl FlakyConnection {
    fn lost() -> DriverError {
        DriverError::new(DriverErrorKind::ConnectionLost, "injected connection loss")
    }

    /// Runs DDL the MySQL way: the open transaction is committed first.
    async fn execute_ddl(&mut self, sql: &str) -> Result<u64, DriverError> {
        if self.in_transaction {
            self.inner.commit().await?;
            self.in_transaction = false;
        }
        if sql.starts_with("CREATE TABLE")
            && self.faults.rival_creates_table.swap(false, Ordering::SeqCst)
        {
            let mut rival = self.driver.connect(&self.target).await?;
            rival.execute(sql, &[]).await?;
            rival.close().await?;
        }
        self.inner.execute(sql, &[]).await
    }
}

#[async_trait]
impl DriverConnection for FlakyConnection {
    async fn dbms_name(&mut self) -> Result<String, DriverError> {
        let reported = self.faults.dbms_name.lock().clone();
        match reported {
            Some(name) => Ok(name),
            None => self.inner.dbms_name().await,
        }
    }

    async fn begin(&mut self, mode: TransactionMode) -> Result<(), DriverError> {
        self.inner.begin(mode).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        // MySQL accepts COMMIT after DDL already ended the transaction
        if self.faults.is_mysql() && !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        if self.faults.is_mysql() && !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.inner.rollback().await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        if self.faults.take_lost() {
            return Err(Self::lost());
        }
        if self.faults.is_mysql() {
            if self.faults.answer_named_lock(sql).is_some() {
                return Ok(0);
            }
            if sql.starts_with("CREATE ") {
                return self.execute_ddl(sql).await;
            }
        }
        self.inner.execute(sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        if self.faults.take_lost() {
            return Err(Self::lost());
        }
        if self.faults.is_mysql() {
            if let Some(rows) = self.faults.answer_named_lock(sql) {
                return Ok(rows);
            }
            if sql.contains("information_schema.tables") {
                return self.inner.query(SQLITE_TABLE_EXISTS, params).await;
            }
        }
        self.inner.query(sql, params).await
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.inner.close().await
    }
}
