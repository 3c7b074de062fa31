//! Helios SQL Blob Storage
//!
//! This crate stores opaque binary records (typically DICOM instances) in a single
//! table of a relational database. It reaches the database through a driver-neutral
//! layer and adapts its SQL to the dialect the server reports.
//!
//! # Features
//!
//! - **Multiple Engines**: SQLite, PostgreSQL, MySQL, and SQL Server through a
//!   host-registered driver
//! - **Self-initializing**: the storage table is created on first use, atomically
//!   where the engine allows it
//! - **Transactions**: every operation runs in its own transaction
//! - **Resilient connections**: bounded connect retry and reconnect after a lost
//!   connection
//!
//! # Driver Features
//!
//! ```toml
//! [dependencies]
//! helios-blob-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - SQLite through rusqlite, in-memory and file databases
//! - `postgres` - PostgreSQL through tokio-postgres
//! - `mysql` - MySQL and MariaDB through sqlx
//! - `cli` - the `helios-blob-storage` command-line tool
//!
//! # Architecture
//!
//! - [`core`] - Driver traits, dialects, connections, transactions and the
//!   [`BlobStorage`](core::BlobStorage) trait
//! - [`backends`] - Built-in drivers and the [`DriverManager`](backends::DriverManager)
//! - [`schema`] - Storage table bootstrap
//! - [`storage_area`] - The [`StorageArea`] implementation
//! - [`config`] - Configuration read from the host document
//! - [`plugin`] - Host startup and shutdown
//! - [`types`] - Stored records and content types
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_blob_storage::backends::DriverManager;
//! use helios_blob_storage::core::{BlobStorage, ConnectionFactory, RetryPolicy};
//! use helios_blob_storage::storage_area::{StorageArea, StorageAreaOptions};
//! use helios_blob_storage::types::ContentType;
//!
//! # async fn example() -> helios_blob_storage::StorageResult<()> {
//! let drivers = DriverManager::global_initialization();
//! let factory = ConnectionFactory::new(drivers, "sqlite:archive.db", RetryPolicy::default())?;
//! let area = StorageArea::open(factory, StorageAreaOptions::default()).await?;
//!
//! area.store("1.2.840.113619.2.55", ContentType::Dicom, b"DICM").await?;
//! assert_eq!(area.read("1.2.840.113619.2.55").await?, b"DICM");
//! area.delete("1.2.840.113619.2.55").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Host Integration
//!
//! ```no_run
//! use serde_json::json;
//!
//! # async fn example() -> helios_blob_storage::StorageResult<()> {
//! let configuration = json!({
//!     "Odbc": {
//!         "EnableStorage": true,
//!         "StorageConnectionString": "Driver={PostgreSQL Unicode};Server=db;Database=pacs;Uid=orthanc;Pwd=secret;"
//!     }
//! });
//!
//! if let Some(area) = helios_blob_storage::plugin::initialize(&configuration).await? {
//!     // ... serve requests ...
//!     helios_blob_storage::plugin::finalize(area).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod plugin;
pub mod schema;
pub mod storage_area;
pub mod types;

// Re-export commonly used types at crate root
pub use config::StorageAreaConfig;
pub use error::{StorageError, StorageResult};
pub use storage_area::{StorageArea, StorageAreaOptions};
pub use types::{ContentType, StorageRecord};

// Re-export core traits
pub use core::{BlobStorage, Driver, DriverConnection, Transaction};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
