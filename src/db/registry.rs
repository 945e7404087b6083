// Driver Registry
// Maps each engine to the driver that opens its connections

use crate::db::drivers::{MssqlDriver, MysqlDriver, PostgresDriver, SqliteDriver};
use crate::db::traits::{DatabaseDriver, DatabaseError};
use crate::db::types::DatabaseType;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DatabaseType, Arc<dyn DatabaseDriver>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding every driver compiled into the crate.
    ///
    /// Firebird has no native driver here; register one to enable it.
    pub async fn with_default_drivers() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(SqliteDriver::new())).await;
        registry.register(Arc::new(MysqlDriver::new())).await;
        registry.register(Arc::new(PostgresDriver::new())).await;
        registry.register(Arc::new(MssqlDriver::new())).await;
        registry
    }

    /// Register a database driver, replacing any previous one for the same engine
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let db_type = driver.database_type();
        let mut drivers = self.drivers.write().await;
        drivers.insert(db_type, driver);
        debug!(engine = %db_type, "Registered database driver");
    }

    /// Get a driver by database type
    pub async fn get_driver(
        &self,
        db_type: DatabaseType,
    ) -> Result<Arc<dyn DatabaseDriver>, DatabaseError> {
        let drivers = self.drivers.read().await;
        drivers
            .get(&db_type)
            .cloned()
            .ok_or(DatabaseError::DriverNotFound {
                engine: db_type,
                hint: db_type.install_hint(),
            })
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{Connection, DatabaseConfig};

    // Mock driver for testing
    struct MockDriver;

    #[async_trait::async_trait]
    impl DatabaseDriver for MockDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Firebird
        }

        async fn connect(&self, _config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("Mock".to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MockDriver)).await;
        let driver = registry.get_driver(DatabaseType::Firebird).await.unwrap();
        assert_eq!(driver.database_type(), DatabaseType::Firebird);
    }

    #[tokio::test]
    async fn test_missing_driver_carries_install_hint() {
        let registry = DriverRegistry::new();
        match registry.get_driver(DatabaseType::Firebird).await {
            Err(DatabaseError::DriverNotFound { engine, hint }) => {
                assert_eq!(engine, DatabaseType::Firebird);
                assert!(hint.contains("fbclient"));
            }
            _ => panic!("expected DriverNotFound"),
        }
    }

    #[tokio::test]
    async fn test_default_drivers() {
        let registry = DriverRegistry::with_default_drivers().await;
        for engine in [
            DatabaseType::Sqlite,
            DatabaseType::Mysql,
            DatabaseType::Postgres,
            DatabaseType::Mssql,
        ] {
            let driver = registry.get_driver(engine).await.unwrap();
            assert_eq!(driver.database_type(), engine);
        }
        assert!(registry.get_driver(DatabaseType::Firebird).await.is_err());
    }
}
