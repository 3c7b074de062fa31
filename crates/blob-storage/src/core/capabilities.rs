//! Storage capabilities.
//!
//! A storage area reports what it can do once the dialect of its connection is
//! known. Callers check [`StorageCapability::ReadRange`] before asking for partial
//! reads instead of relying on the error.

use serde::{Deserialize, Serialize};

use super::dialect::{Dialect, DialectCapability};

/// Operations a storage area may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageCapability {
    /// Insert a new record.
    Store,
    /// Read a whole payload.
    Read,
    /// Read a byte range of a payload.
    ReadRange,
    /// Remove a record.
    Delete,
    /// Check whether a record exists.
    Exists,
    /// Report the payload size without reading it.
    Size,
}

impl std::fmt::Display for StorageCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageCapability::Store => "store",
            StorageCapability::Read => "read",
            StorageCapability::ReadRange => "read-range",
            StorageCapability::Delete => "delete",
            StorageCapability::Exists => "exists",
            StorageCapability::Size => "size",
        };
        write!(f, "{}", name)
    }
}

impl StorageCapability {
    /// Capabilities of a storage area on `dialect`.
    ///
    /// Range reads need both dialect support and the `enable_range_reads` switch.
    pub fn resolve(dialect: Dialect, enable_range_reads: bool) -> Vec<StorageCapability> {
        let mut caps = vec![
            StorageCapability::Store,
            StorageCapability::Read,
            StorageCapability::Delete,
            StorageCapability::Exists,
            StorageCapability::Size,
        ];
        if enable_range_reads && dialect.supports(DialectCapability::RangeRead) {
            caps.push(StorageCapability::ReadRange);
        }
        caps
    }
}
