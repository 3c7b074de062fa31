//! Core storage traits and abstractions.
//!
//! This module provides the building blocks of the storage area:
//!
//! - [`Driver`], [`DriverConnection`] - Driver-neutral connectivity
//! - [`ConnectionString`] - Parsed connection targets
//! - [`Dialect`], [`DialectProfile`] - Dialect detection and the SQL catalog
//! - [`Connection`], [`Transaction`] - Sessions and scoped transactions
//! - [`ConnectionFactory`], [`RetryPolicy`] - Connection establishment with retry
//! - [`Query`] - Statements with named parameters
//! - [`BlobStorage`] - The operations a host performs on stored records
//! - [`StorageCapability`] - Runtime capability discovery
//!
//! # Layering
//!
//! ```text
//! BlobStorage (StorageArea)
//!     └── ConnectionFactory ── DriverManager ── Driver
//!             └── Connection ── DriverConnection
//!                     └── Transaction
//! ```

pub mod capabilities;
pub mod connection;
pub mod connection_string;
pub mod dialect;
pub mod driver;
pub mod factory;
pub mod query;
pub mod storage;
pub mod transaction;

pub use capabilities::StorageCapability;
pub use connection::Connection;
pub use connection_string::ConnectionString;
pub use dialect::{BINARY_PLACEHOLDER, Dialect, DialectCapability, DialectProfile, PlaceholderStyle};
pub use driver::{Driver, DriverConnection, DriverError, DriverErrorKind, Engine, Row, Value};
pub use factory::{ConnectionFactory, RetryPolicy};
pub use query::Query;
pub use storage::BlobStorage;
pub use transaction::{Transaction, TransactionMode};
