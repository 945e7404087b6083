// Connection String Handling
// Parses "<engine>:<target>" into an engine and a driver configuration

use crate::db::traits::{DatabaseConfig, DatabaseError};
use crate::db::types::DatabaseType;
use std::fmt;

/// Parsed `<engine>:<target>` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub engine: DatabaseType,
    pub target: String,
}

/// Network location encoded in a target: `host/port:database` or `host:database`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, DatabaseError> {
        let (engine, target) = raw
            .split_once(':')
            .ok_or_else(|| DatabaseError::InvalidConnectionString(raw.to_string()))?;

        if engine.trim().is_empty() || target.trim().is_empty() {
            return Err(DatabaseError::InvalidConnectionString(raw.to_string()));
        }

        Ok(Self {
            engine: DatabaseType::lookup(engine)?,
            target: target.trim().to_string(),
        })
    }

    /// Split a network target into host, port and database name
    pub fn endpoint(&self) -> Result<Endpoint, DatabaseError> {
        let (location, database) = self
            .target
            .rsplit_once(':')
            .ok_or_else(|| DatabaseError::InvalidConnectionString(self.to_string()))?;

        let (host, port) = match location.split_once('/') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| DatabaseError::InvalidConnectionString(self.to_string()))?;
                (host, port)
            }
            None => (location, self.engine.default_port()),
        };

        if host.trim().is_empty() || database.trim().is_empty() {
            return Err(DatabaseError::InvalidConnectionString(self.to_string()));
        }

        Ok(Endpoint {
            host: host.trim().to_string(),
            port,
            database: database.trim().to_string(),
        })
    }

    /// Build the driver configuration, attaching credentials for network engines
    pub fn to_config(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<DatabaseConfig, DatabaseError> {
        if self.engine.is_file_based() {
            let config = DatabaseConfig::new(self.engine, expand_home(&self.target));
            config.validate()?;
            return Ok(config);
        }

        let endpoint = self.endpoint()?;
        let mut config = DatabaseConfig::new(self.engine, endpoint.database);
        config.host = Some(endpoint.host);
        config.port = Some(endpoint.port);
        config.username = username.map(str::to_string);
        config.password = password.unwrap_or_default().to_string();
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine.driver_id(), self.target)
    }
}

/// Expand ~ to home directory if present
fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => std::path::Path::new(&home)
            .join(rest)
            .to_string_lossy()
            .to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqlite() {
        let conn = ConnectionString::parse("sqlite3:test_db_unit.db").unwrap();
        assert_eq!(conn.engine, DatabaseType::Sqlite);
        assert_eq!(conn.target, "test_db_unit.db");

        let memory = ConnectionString::parse("sqlite3::memory:").unwrap();
        assert_eq!(memory.target, ":memory:");
    }

    #[test]
    fn test_parse_unknown_engine() {
        let err = ConnectionString::parse("invalid_driver:some/connection").unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownEngine(_)));
    }

    #[test]
    fn test_parse_missing_separator() {
        assert!(matches!(
            ConnectionString::parse("sqlite3").unwrap_err(),
            DatabaseError::InvalidConnectionString(_)
        ));
        assert!(ConnectionString::parse("sqlite3:").is_err());
    }

    #[test]
    fn test_endpoint_with_port() {
        let conn = ConnectionString::parse("psycopg2:db.internal/6543:orders").unwrap();
        let endpoint = conn.endpoint().unwrap();
        assert_eq!(endpoint.host, "db.internal");
        assert_eq!(endpoint.port, 6543);
        assert_eq!(endpoint.database, "orders");
    }

    #[test]
    fn test_endpoint_default_port() {
        let conn = ConnectionString::parse("pymssql:localhost:master").unwrap();
        let endpoint = conn.endpoint().unwrap();
        assert_eq!(endpoint.port, 1433);
        assert_eq!(endpoint.database, "master");
    }

    #[test]
    fn test_endpoint_bad_port() {
        let conn = ConnectionString::parse("mysql.connector:localhost/abc:app").unwrap();
        assert!(conn.endpoint().is_err());
    }

    #[test]
    fn test_to_config_attaches_credentials() {
        let conn = ConnectionString::parse("mysql.connector:localhost/3307:app").unwrap();
        let config = conn.to_config(Some("root"), Some("secret")).unwrap();
        assert_eq!(config.database_type, DatabaseType::Mysql);
        assert_eq!(config.host.as_deref(), Some("localhost"));
        assert_eq!(config.get_port(), 3307);
        assert_eq!(config.username.as_deref(), Some("root"));
        assert_eq!(config.password, "secret");
    }

    #[test]
    fn test_display_round_trip() {
        let conn = ConnectionString::parse("postgres:localhost:app").unwrap();
        assert_eq!(conn.to_string(), "psycopg2:localhost:app");
    }
}
