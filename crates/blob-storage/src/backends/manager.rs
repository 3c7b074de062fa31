//! Driver registry.
//!
//! The [`DriverManager`] maps each [`Engine`] to the [`Driver`] that serves it.
//! Built-in drivers are registered according to the enabled features; hosts can
//! register their own, for example a SQL Server driver.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::core::{Driver, Engine};
use crate::error::ConnectionError;

static GLOBAL: OnceLock<Arc<DriverManager>> = OnceLock::new();

/// Registry of available drivers, keyed by engine.
#[derive(Default)]
pub struct DriverManager {
    drivers: RwLock<HashMap<Engine, Arc<dyn Driver>>>,
}

impl std::fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverManager")
            .field("engines", &self.engines())
            .finish()
    }
}

impl DriverManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every driver compiled into this build.
    pub fn with_builtin_drivers() -> Self {
        let manager = Self::new();

        #[cfg(feature = "sqlite")]
        manager.register(Arc::new(super::sqlite::SqliteDriver::new()));

        #[cfg(feature = "postgres")]
        manager.register(Arc::new(super::postgres::PostgresDriver::new()));

        #[cfg(feature = "mysql")]
        manager.register(Arc::new(super::mysql::MySqlDriver::new()));

        manager
    }

    /// Returns the process-wide registry, creating it on first call.
    ///
    /// Safe to call more than once; later calls return the same registry.
    pub fn global_initialization() -> Arc<DriverManager> {
        GLOBAL
            .get_or_init(|| {
                let manager = Self::with_builtin_drivers();
                info!(engines = ?manager.engines(), "Driver manager initialized");
                Arc::new(manager)
            })
            .clone()
    }

    /// The process-wide registry, if it was initialized.
    pub fn global() -> Option<Arc<DriverManager>> {
        GLOBAL.get().cloned()
    }

    /// Returns true once [`global_initialization`](Self::global_initialization) ran.
    pub fn is_initialized() -> bool {
        GLOBAL.get().is_some()
    }

    /// Registers a driver, replacing and returning any driver for the same engine.
    pub fn register(&self, driver: Arc<dyn Driver>) -> Option<Arc<dyn Driver>> {
        debug!(engine = %driver.engine(), driver = driver.name(), "Registering driver");
        self.drivers.write().insert(driver.engine(), driver)
    }

    /// Looks up the driver for an engine.
    pub fn resolve(&self, engine: Engine) -> Result<Arc<dyn Driver>, ConnectionError> {
        self.drivers
            .read()
            .get(&engine)
            .cloned()
            .ok_or(ConnectionError::NoDriver { engine })
    }

    /// Engines with a registered driver.
    pub fn engines(&self) -> Vec<Engine> {
        let mut engines: Vec<Engine> = self.drivers.read().keys().copied().collect();
        engines.sort_by_key(|engine| engine.to_string());
        engines
    }

    /// Returns true if a driver serves `engine`.
    pub fn is_registered(&self, engine: Engine) -> bool {
        self.drivers.read().contains_key(&engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_manager_has_no_drivers() {
        let manager = DriverManager::new();
        assert!(manager.engines().is_empty());
        assert!(matches!(
            manager.resolve(Engine::MsSql),
            Err(ConnectionError::NoDriver {
                engine: Engine::MsSql
            })
        ));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_builtin_drivers() {
        let manager = DriverManager::with_builtin_drivers();
        assert!(manager.is_registered(Engine::Sqlite));
        assert!(!manager.is_registered(Engine::MsSql));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_register_replaces() {
        let manager = DriverManager::with_builtin_drivers();
        let previous = manager.register(Arc::new(super::super::sqlite::SqliteDriver::new()));
        assert!(previous.is_some());
        let count = manager
            .engines()
            .into_iter()
            .filter(|engine| *engine == Engine::Sqlite)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_global_initialization_is_idempotent() {
        let first = DriverManager::global_initialization();
        let second = DriverManager::global_initialization();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(DriverManager::is_initialized());
        assert!(DriverManager::global().is_some());
    }
}
