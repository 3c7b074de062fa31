//! Database driver implementations.
//!
//! This module contains the built-in [`Driver`](crate::core::Driver)
//! implementations and the [`DriverManager`] that registers them. Each driver is
//! gated behind a feature flag.
//!
//! # Available Drivers
//!
//! | Engine | Feature | Crate |
//! |--------|---------|-------|
//! | SQLite | `sqlite` | rusqlite (bundled) |
//! | PostgreSQL | `postgres` | tokio-postgres |
//! | MySQL / MariaDB | `mysql` | sqlx |
//!
//! SQL Server is a known dialect without a bundled driver. Hosts that ship one
//! register it with [`DriverManager::register`].
//!
//! # Example
//!
//! ```no_run
//! use helios_blob_storage::backends::DriverManager;
//! use helios_blob_storage::core::Engine;
//!
//! let drivers = DriverManager::global_initialization();
//! assert!(drivers.is_registered(Engine::Sqlite));
//! ```

mod manager;

pub use manager::DriverManager;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;
