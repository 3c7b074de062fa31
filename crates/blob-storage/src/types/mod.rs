//! Core types for the storage area.
//!
//! - [`StorageRecord`] - A stored payload with its identifier and content type
//! - [`ContentType`] - The integer tag stored next to each payload

mod record;

pub use record::{ContentType, StorageRecord};
