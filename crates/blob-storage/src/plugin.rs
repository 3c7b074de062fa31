//! Host lifecycle.
//!
//! A host calls [`initialize`] once at startup with its full configuration
//! document and keeps the returned [`StorageArea`] until shutdown, when it hands
//! it back to [`finalize`].

use serde_json::Value;
use tracing::{error, info, warn};

use crate::backends::DriverManager;
use crate::config::{CONFIG_SECTION, StorageAreaConfig};
use crate::error::StorageResult;
use crate::storage_area::StorageArea;

/// Name under which the storage area registers with its host.
pub const PLUGIN_NAME: &str = "odbc-storage";

/// Version reported to the host, the crate version.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reads the configuration and opens the storage area.
///
/// Returns `Ok(None)` when the configuration section is missing or storage is
/// disabled; the host then keeps its default storage.
pub async fn initialize(configuration: &Value) -> StorageResult<Option<StorageArea>> {
    info!(plugin = PLUGIN_NAME, version = PLUGIN_VERSION, "Initializing SQL storage area");

    let config = match StorageAreaConfig::from_section(configuration) {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!(
                section = CONFIG_SECTION,
                "No configuration section for the SQL storage area, using default storage"
            );
            return Ok(None);
        }
        Err(e) => {
            error!(section = CONFIG_SECTION, error = %e, "Invalid SQL storage area configuration");
            return Err(e);
        }
    };

    if !config.enable_storage {
        warn!(
            section = CONFIG_SECTION,
            "SQL storage area is disabled, set \"EnableStorage\" to true to use it"
        );
        return Ok(None);
    }

    let drivers = DriverManager::global_initialization();
    match StorageArea::from_config(&config, drivers).await {
        Ok(area) => {
            info!(dialect = %area.dialect(), "SQL storage area registered");
            Ok(Some(area))
        }
        Err(e) => {
            error!(error = %e, "Cannot open SQL storage area");
            Err(e)
        }
    }
}

/// Releases the storage area's connection.
pub async fn finalize(area: StorageArea) -> StorageResult<()> {
    warn!(plugin = PLUGIN_NAME, "SQL storage area is finalizing");
    area.close().await
}
