//! SQLite driver implementation.
//!
//! This module provides the SQLite driver, built on rusqlite with the bundled
//! SQLite library. It supports both in-memory databases (great for testing) and
//! file-based databases.
//!
//! # Connection strings
//!
//! - `sqlite::memory:` - a private in-memory database per connection
//! - `sqlite:///var/lib/orthanc/blobs.db` - a database file
//! - `Driver=SQLite3;Database=/var/lib/orthanc/blobs.db` - ODBC style
//!
//! # Transactions
//!
//! Read-write transactions start with `BEGIN IMMEDIATE`, taking the write lock
//! up front so concurrent writers wait on the busy timeout instead of failing
//! at commit.

mod driver;

pub use driver::{SqliteDriver, SqliteDriverConfig};
