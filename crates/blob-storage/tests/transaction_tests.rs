//! Transaction protocol tests.

#![cfg(feature = "sqlite")]

mod common;

use helios_blob_storage::core::{Connection, Dialect, Query, TransactionMode};
use helios_blob_storage::error::{BackendError, StorageError, TransactionError};
use helios_blob_storage::schema;

use common::{TempDatabase, sqlite_factory};

async fn prepared_connection(db: &TempDatabase) -> Connection {
    let mut conn = sqlite_factory(db).connect().await.unwrap();
    schema::ensure_schema(&mut conn).await.unwrap();
    conn
}

fn insert(id: &str) -> Query {
    Query::new("INSERT INTO storagearea (uuid, content, type) VALUES (${uuid}, ${content}, ${type})")
        .bind("uuid", id)
        .bind("content", &b"payload"[..])
        .bind("type", 1i32)
}

async fn count(conn: &mut Connection, id: &str) -> usize {
    conn.query(&Query::new("SELECT uuid FROM storagearea WHERE uuid = ${uuid}").bind("uuid", id))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_commit_persists() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let mut tx = conn.begin(TransactionMode::ReadWrite).await.unwrap();
    assert_eq!(tx.mode(), TransactionMode::ReadWrite);
    assert_eq!(tx.dialect(), Dialect::Sqlite);
    let debug = format!("{:?}", tx);
    assert!(debug.contains("ReadWrite") && debug.contains("Sqlite"), "{}", debug);
    assert_eq!(tx.execute(&insert("committed")).await.unwrap(), 1);
    tx.commit().await.unwrap();

    assert!(!conn.in_transaction());
    assert_eq!(count(&mut conn, "committed").await, 1);
}

#[tokio::test]
async fn test_rollback_discards() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let mut tx = conn.begin(TransactionMode::ReadWrite).await.unwrap();
    tx.execute(&insert("discarded")).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(count(&mut conn, "discarded").await, 0);
}

#[tokio::test]
async fn test_complete_commits_on_success() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let mut tx = conn.begin(TransactionMode::ReadWrite).await.unwrap();
    let result = tx.execute(&insert("completed")).await;
    assert_eq!(tx.complete(result).await.unwrap(), 1);

    assert_eq!(count(&mut conn, "completed").await, 1);
}

#[tokio::test]
async fn test_complete_rolls_back_on_error() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let mut tx = conn.begin(TransactionMode::ReadWrite).await.unwrap();
    tx.execute(&insert("first")).await.unwrap();
    let result = tx.execute(&insert("first")).await;
    let err = tx.complete(result).await.unwrap_err();

    assert!(matches!(
        err,
        StorageError::Backend(BackendError::ConstraintViolation { .. })
    ));
    assert_eq!(count(&mut conn, "first").await, 0);
}

#[tokio::test]
async fn test_nested_begin_fails() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let tx = conn.begin(TransactionMode::ReadOnly).await.unwrap();
    // Leak the guard so the transaction stays open
    std::mem::forget(tx);

    let err = conn.begin(TransactionMode::ReadWrite).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::AlreadyOpen)
    ));
}

#[tokio::test]
async fn test_write_outside_transaction_fails() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let err = conn.execute(&insert("loose")).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::NotOpen)
    ));
    assert_eq!(count(&mut conn, "loose").await, 0);
}

#[tokio::test]
async fn test_write_in_read_only_transaction_fails() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    let mut tx = conn.begin(TransactionMode::ReadOnly).await.unwrap();
    let err = tx.execute(&insert("readonly")).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::ReadOnly)
    ));
    tx.rollback().await.unwrap();

    assert_eq!(count(&mut conn, "readonly").await, 0);
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let db = TempDatabase::new();
    let mut conn = prepared_connection(&db).await;

    {
        let mut tx = conn.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.execute(&insert("abandoned")).await.unwrap();
    }

    // The abandoned transaction is rolled back before the connection is reused
    assert_eq!(count(&mut conn, "abandoned").await, 0);
    assert!(!conn.in_transaction());

    let mut tx = conn.begin(TransactionMode::ReadWrite).await.unwrap();
    tx.execute(&insert("next")).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(count(&mut conn, "next").await, 1);
}

#[tokio::test]
async fn test_separate_connections_see_committed_data_only() {
    let db = TempDatabase::new();
    let mut writer = prepared_connection(&db).await;
    let mut reader = sqlite_factory(&db).connect().await.unwrap();

    let mut tx = writer.begin(TransactionMode::ReadWrite).await.unwrap();
    tx.execute(&insert("pending")).await.unwrap();
    assert_eq!(count(&mut reader, "pending").await, 0);
    tx.commit().await.unwrap();

    assert_eq!(count(&mut reader, "pending").await, 1);
}
