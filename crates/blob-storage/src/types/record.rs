//! Stored record types.
//!
//! This module defines the [`StorageRecord`] type, one row of the storage table,
//! and [`ContentType`], the integer tag stored next to each payload.

use serde::{Deserialize, Serialize};

/// Kind of payload stored in a record.
///
/// Persisted as an integer. Codes 0 to 3 are the well-known kinds; any other code
/// is carried through as [`ContentType::Custom`].
///
/// # Examples
///
/// ```
/// use helios_blob_storage::types::ContentType;
///
/// assert_eq!(ContentType::Dicom.code(), 1);
/// assert_eq!(ContentType::from_code(2), ContentType::DicomAsJson);
/// assert_eq!(ContentType::from_code(1042), ContentType::Custom(1042));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentType {
    /// Untagged payload.
    #[default]
    Unknown,
    /// A DICOM file.
    Dicom,
    /// DICOM attributes rendered as JSON.
    DicomAsJson,
    /// A DICOM file truncated before its pixel data.
    DicomUntilPixelData,
    /// A host-defined code outside the well-known range.
    Custom(i32),
}

impl ContentType {
    /// Integer persisted in the `type` column.
    pub fn code(self) -> i32 {
        match self {
            ContentType::Unknown => 0,
            ContentType::Dicom => 1,
            ContentType::DicomAsJson => 2,
            ContentType::DicomUntilPixelData => 3,
            ContentType::Custom(code) => code,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ContentType::Unknown,
            1 => ContentType::Dicom,
            2 => ContentType::DicomAsJson,
            3 => ContentType::DicomUntilPixelData,
            other => ContentType::Custom(other),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Unknown => write!(f, "unknown"),
            ContentType::Dicom => write!(f, "dicom"),
            ContentType::DicomAsJson => write!(f, "dicom-as-json"),
            ContentType::DicomUntilPixelData => write!(f, "dicom-until-pixel-data"),
            ContentType::Custom(code) => write!(f, "custom({})", code),
        }
    }
}

impl From<i32> for ContentType {
    fn from(code: i32) -> Self {
        ContentType::from_code(code)
    }
}

/// A stored payload with its identifier and content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRecord {
    id: String,
    content_type: ContentType,
    payload: Vec<u8>,
}

impl StorageRecord {
    /// Creates a record.
    pub fn new(id: impl Into<String>, content_type: ContentType, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            content_type,
            payload,
        }
    }

    /// Record identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Kind of payload.
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Stored bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Consumes the record, returning its bytes.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
