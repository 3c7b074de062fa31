//! Storage table definition and bootstrap.
//!
//! The storage table is created on first use from an embedded DDL template whose
//! `${BINARY}` marker is replaced by the dialect's binary column type. Creation
//! runs in one read-write transaction, so a failure leaves no partial table behind
//! on engines with transactional DDL.
//!
//! ```sql
//! CREATE TABLE storagearea(
//!        uuid VARCHAR(64) NOT NULL PRIMARY KEY,
//!        content ${BINARY} NOT NULL,
//!        type INTEGER NOT NULL
//!        );
//! CREATE INDEX storagearea_type ON storagearea(type);
//! ```

use tracing::{debug, info, warn};

use crate::core::{Connection, DialectProfile, Query, Transaction, TransactionMode};
use crate::error::{DialectError, SchemaError, StorageError, StorageResult};

/// Name of the storage table.
pub const STORAGE_TABLE: &str = "storagearea";

const PREPARE_STORAGE: &str = include_str!("prepare_storage.sql");

/// What bootstrap found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The table existed already; nothing was changed.
    AlreadyPresent,
    /// The table and its index were created.
    Created,
}

/// Renders the storage DDL for a dialect.
pub fn storage_ddl(profile: &DialectProfile) -> Result<String, DialectError> {
    profile.dialect.substitute_binary_type(PREPARE_STORAGE)
}

/// Splits a multi-statement script on `;`, dropping empty statements.
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect()
}

/// Returns true if the storage table exists.
pub async fn table_exists(conn: &mut Connection) -> StorageResult<bool> {
    let profile = conn.profile()?;
    let rows = conn.query(&exists_query(profile)).await?;
    Ok(!rows.is_empty())
}

/// Creates the storage table if it is missing.
///
/// Fails with [`DialectError::Unsupported`] before touching the database when the
/// dialect has no catalog entry. Any other failure is reported as
/// [`SchemaError::Initialization`] after the transaction was rolled back, unless
/// the table turns out to exist by then.
pub async fn ensure_schema(conn: &mut Connection) -> StorageResult<BootstrapOutcome> {
    let profile = conn.profile()?;

    let present = table_exists(conn)
        .await
        .map_err(|e| initialization_error("cannot check whether the table exists", e))?;
    if present {
        debug!(table = STORAGE_TABLE, "Storage table already present");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    let ddl = storage_ddl(profile)?;
    info!(table = STORAGE_TABLE, dialect = %profile.dialect, "Creating storage table");

    let mut tx = conn
        .begin(TransactionMode::ReadWrite)
        .await
        .map_err(|e| initialization_error("cannot open the bootstrap transaction", e))?;

    let result = create_table(&mut tx, profile, &ddl).await;
    let completed = tx.complete(result).await;
    release_bootstrap_lock(conn, profile).await;

    let error = match completed {
        Ok(outcome) => return Ok(outcome),
        Err(e) => e,
    };

    // where DDL commits implicitly a rival can create the table after our re-check
    if table_exists(conn).await.unwrap_or(false) {
        warn!(table = STORAGE_TABLE, error = %error, "Storage table created concurrently, using it");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }
    Err(initialization_error("table creation failed", error))
}

async fn release_bootstrap_lock(conn: &mut Connection, profile: &DialectProfile) {
    let Some(unlock) = profile.bootstrap_unlock_sql else {
        return;
    };
    if let Err(e) = conn.query(&Query::new(unlock)).await {
        warn!(table = STORAGE_TABLE, error = %e, "Failed to release the bootstrap lock");
    }
}

async fn create_table(
    tx: &mut Transaction<'_>,
    profile: &DialectProfile,
    ddl: &str,
) -> StorageResult<BootstrapOutcome> {
    if let Some(lock) = profile.bootstrap_lock_sql {
        tx.execute_raw(lock).await?;
    }

    // another process may have won the race before the lock was taken
    if !tx.query(&exists_query(profile)).await?.is_empty() {
        warn!(table = STORAGE_TABLE, "Storage table created concurrently, skipping");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    for statement in split_statements(ddl) {
        tx.execute_raw(statement).await?;
    }
    Ok(BootstrapOutcome::Created)
}

fn exists_query(profile: &DialectProfile) -> Query {
    Query::new(profile.table_exists_sql).bind("table", STORAGE_TABLE)
}

fn initialization_error(message: &str, source: StorageError) -> StorageError {
    SchemaError::Initialization {
        table: STORAGE_TABLE.to_string(),
        message: format!("{}: {}", message, source),
        source: Some(Box::new(source)),
    }
    .into()
}
