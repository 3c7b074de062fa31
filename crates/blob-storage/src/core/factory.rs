//! Connection factory with bounded retry.
//!
//! The factory owns the parsed connection target and a [`RetryPolicy`]. Every call
//! to [`ConnectionFactory::connect`] resolves the driver, opens a fresh connection
//! and detects its dialect. Transient failures are retried with a fixed delay.
//! Failures that retrying cannot fix, such as rejected credentials, end the loop
//! immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::backends::DriverManager;
use crate::error::{ConnectionError, StorageResult};

use super::connection::Connection;
use super::connection_string::ConnectionString;
use super::driver::{Driver, DriverError, DriverErrorKind};

/// Bounded retry schedule for opening connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Allows `max_retries` retries after the first attempt, `retry_interval` apart.
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
        }
    }

    /// A single attempt with no retry.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Opens connections to one target.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    target: ConnectionString,
    policy: RetryPolicy,
    drivers: Arc<DriverManager>,
}

impl ConnectionFactory {
    /// Parses the connection string and builds a factory.
    ///
    /// No connection is attempted here.
    pub fn new(
        drivers: Arc<DriverManager>,
        connection_string: &str,
        policy: RetryPolicy,
    ) -> StorageResult<Self> {
        let target = ConnectionString::parse(connection_string).map_err(|e| {
            ConnectionError::InvalidConnectionString {
                message: e.message().to_string(),
            }
        })?;
        Ok(Self::from_target(drivers, target, policy))
    }

    /// Creates a factory for an already parsed target.
    pub fn from_target(
        drivers: Arc<DriverManager>,
        target: ConnectionString,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            target,
            policy,
            drivers,
        }
    }

    /// Connection target.
    pub fn target(&self) -> &ConnectionString {
        &self.target
    }

    /// Retry policy applied by [`connect`](Self::connect).
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Opens a connection, retrying transient failures per the policy.
    pub async fn connect(&self) -> StorageResult<Connection> {
        let driver = self.drivers.resolve(self.target.engine())?;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.attempt(driver.as_ref()).await {
                Ok(connection) => {
                    if attempts > 1 {
                        info!(attempts = attempts, "Connected after retries");
                    }
                    info!(
                        connection = %self.target,
                        driver = driver.name(),
                        dialect = %connection.dialect(),
                        "Connected to database"
                    );
                    return Ok(connection);
                }
                Err(e) if e.is_permanent() => {
                    error!(connection = %self.target, error = %e, "Connection refused, not retrying");
                    return Err(match e.kind() {
                        DriverErrorKind::InvalidConnectionString => {
                            ConnectionError::InvalidConnectionString {
                                message: e.message().to_string(),
                            }
                        }
                        _ => ConnectionError::Rejected { source: e },
                    }
                    .into());
                }
                Err(e) => {
                    if attempts > self.policy.max_retries {
                        error!(
                            connection = %self.target,
                            attempts = attempts,
                            error = %e,
                            "Giving up on database connection"
                        );
                        return Err(ConnectionError::RetriesExhausted {
                            attempts,
                            source: e,
                        }
                        .into());
                    }

                    warn!(
                        attempt = attempts,
                        max_retries = self.policy.max_retries,
                        delay_ms = self.policy.retry_interval.as_millis(),
                        error = %e,
                        "Connection attempt failed, retrying"
                    );

                    sleep(self.policy.retry_interval).await;
                }
            }
        }
    }

    async fn attempt(&self, driver: &dyn Driver) -> Result<Connection, DriverError> {
        let raw = driver.connect(&self.target).await?;
        Connection::establish(driver.engine(), raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 10);
        assert_eq!(policy.retry_interval, Duration::from_secs(5));
        assert_eq!(policy.max_attempts(), 11);
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(RetryPolicy::new(u32::MAX, Duration::ZERO).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_invalid_connection_string_fails_fast() {
        let err = ConnectionFactory::new(
            Arc::new(DriverManager::new()),
            "oracle://db/pacs",
            RetryPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::StorageError::Connection(ConnectionError::InvalidConnectionString { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_driver() {
        let factory = ConnectionFactory::new(
            Arc::new(DriverManager::new()),
            "postgres://localhost/pacs",
            RetryPolicy::no_retry(),
        )
        .unwrap();
        let err = factory.connect().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::StorageError::Connection(ConnectionError::NoDriver { .. })
        ));
    }
}
