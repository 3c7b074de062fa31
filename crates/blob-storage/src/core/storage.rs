//! Core blob storage trait.
//!
//! This module defines the [`BlobStorage`] trait, the operations a host performs on
//! a storage area: store, read, partial read, delete, and the metadata checks.
//! Records are addressed by an opaque string identifier chosen by the caller.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::{ContentType, StorageRecord};

use super::capabilities::StorageCapability;

/// Blob storage over a relational database.
///
/// Every operation runs in its own transaction and either takes full effect or
/// none. Operations on one storage area are serialized over its connection.
///
/// # Example
///
/// ```ignore
/// use helios_blob_storage::core::BlobStorage;
/// use helios_blob_storage::types::ContentType;
///
/// async fn archive<S: BlobStorage>(storage: &S, dicom: &[u8]) -> StorageResult<()> {
///     storage.store("7d3c9e0e-instance", ContentType::Dicom, dicom).await?;
///     assert_eq!(storage.size("7d3c9e0e-instance").await?, dicom.len() as u64);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Name of the backend, e.g. the detected SQL dialect.
    fn backend_name(&self) -> String;

    /// Operations this storage serves.
    fn capabilities(&self) -> &[StorageCapability];

    /// Returns true if `capability` is served.
    fn supports(&self, capability: StorageCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// * `RecordError::DuplicateKey` - a record with `id` already exists
    async fn store(&self, id: &str, content_type: ContentType, payload: &[u8])
    -> StorageResult<()>;

    /// Stores a new record under a freshly generated identifier and returns it.
    async fn store_new(&self, content_type: ContentType, payload: &[u8]) -> StorageResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.store(&id, content_type, payload).await?;
        Ok(id)
    }

    /// Reads a whole payload.
    ///
    /// # Errors
    ///
    /// * `RecordError::NotFound` - no record with `id`
    async fn read(&self, id: &str) -> StorageResult<Vec<u8>>;

    /// Reads a whole record, content type included.
    async fn read_record(&self, id: &str) -> StorageResult<StorageRecord>;

    /// Reads `length` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// * `BackendError::UnsupportedCapability` - partial reads are not available
    /// * `RecordError::NotFound` - no record with `id`
    /// * `RecordError::InvalidRange` - the range extends past the payload
    async fn read_range(&self, id: &str, offset: u64, length: u64) -> StorageResult<Vec<u8>>;

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// * `RecordError::NotFound` - no record with `id`
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Returns true if a record with `id` is stored.
    async fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Payload size in bytes.
    async fn size(&self, id: &str) -> StorageResult<u64>;
}
