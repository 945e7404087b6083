// Database Types
// Fixed set of supported engines, their connection-string tokens and driver hints

use crate::db::traits::DatabaseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SQLITE: &str = "sqlite3";
pub const FIREBIRD: &str = "firebird.driver";
pub const MYSQL: &str = "mysql.connector";
pub const POSTGRES: &str = "psycopg2";
pub const MSSQL: &str = "pymssql";

pub const SQLITE_INSTALL: &str =
    "SQLite is bundled with this crate (rusqlite, bundled feature); nothing to install";
pub const FIREBIRD_INSTALL: &str =
    "Firebird needs the fbclient native library and a Firebird driver registered with DriverRegistry::register";
pub const MYSQL_INSTALL: &str =
    "MySQL is served by sqlx (mysql feature); make sure the server is reachable";
pub const POSTGRES_INSTALL: &str =
    "PostgreSQL is served by tokio-postgres; make sure the server is reachable";
pub const MSSQL_INSTALL: &str =
    "MS-SQL is served by tiberius (TDS 7.3); make sure the server is reachable";

/// Supported database engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Sqlite,
    Firebird,
    Mysql,
    Postgres,
    Mssql,
}

impl DatabaseType {
    pub const ALL: [DatabaseType; 5] = [
        DatabaseType::Sqlite,
        DatabaseType::Firebird,
        DatabaseType::Mysql,
        DatabaseType::Postgres,
        DatabaseType::Mssql,
    ];

    /// Token used in connection strings, e.g. `sqlite3:app.db`
    pub fn driver_id(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => SQLITE,
            DatabaseType::Firebird => FIREBIRD,
            DatabaseType::Mysql => MYSQL,
            DatabaseType::Postgres => POSTGRES,
            DatabaseType::Mssql => MSSQL,
        }
    }

    /// What a user needs in place before this engine can be opened
    pub fn install_hint(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => SQLITE_INSTALL,
            DatabaseType::Firebird => FIREBIRD_INSTALL,
            DatabaseType::Mysql => MYSQL_INSTALL,
            DatabaseType::Postgres => POSTGRES_INSTALL,
            DatabaseType::Mssql => MSSQL_INSTALL,
        }
    }

    /// Display name for logs and messages
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "SQLite",
            DatabaseType::Firebird => "Firebird",
            DatabaseType::Mysql => "MySQL",
            DatabaseType::Postgres => "PostgreSQL",
            DatabaseType::Mssql => "Microsoft SQL Server",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Sqlite => 0, // File-based, no port
            DatabaseType::Firebird => 3050,
            DatabaseType::Mysql => 3306,
            DatabaseType::Postgres => 5432,
            DatabaseType::Mssql => 1433,
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, DatabaseType::Sqlite)
    }

    /// Resolve an engine token. Accepts the driver ids as well as short names.
    pub fn lookup(token: &str) -> Result<Self, DatabaseError> {
        let normalized = token.trim().to_ascii_lowercase();
        let found = match normalized.as_str() {
            SQLITE | "sqlite" => DatabaseType::Sqlite,
            FIREBIRD | "firebird" => DatabaseType::Firebird,
            MYSQL | "mysql" | "mariadb" => DatabaseType::Mysql,
            POSTGRES | "postgres" | "postgresql" => DatabaseType::Postgres,
            MSSQL | "mssql" | "sqlserver" => DatabaseType::Mssql,
            _ => return Err(DatabaseError::UnknownEngine(token.to_string())),
        };
        Ok(found)
    }
}

impl FromStr for DatabaseType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.driver_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_ids() {
        assert_eq!(DatabaseType::Sqlite.driver_id(), "sqlite3");
        assert_eq!(DatabaseType::Firebird.driver_id(), "firebird.driver");
        assert_eq!(DatabaseType::Mysql.driver_id(), "mysql.connector");
        assert_eq!(DatabaseType::Postgres.driver_id(), "psycopg2");
        assert_eq!(DatabaseType::Mssql.driver_id(), "pymssql");
    }

    #[test]
    fn test_install_hints_name_the_driver() {
        assert!(DatabaseType::Firebird.install_hint().contains("fbclient"));
        assert!(DatabaseType::Mysql.install_hint().contains("sqlx"));
        assert!(DatabaseType::Postgres.install_hint().contains("tokio-postgres"));
        assert!(DatabaseType::Mssql.install_hint().contains("tiberius"));
    }

    #[test]
    fn test_lookup_round_trips_every_engine() {
        for engine in DatabaseType::ALL {
            assert_eq!(DatabaseType::lookup(engine.driver_id()).unwrap(), engine);
        }
    }

    #[test]
    fn test_lookup_short_names() {
        assert_eq!("postgresql".parse::<DatabaseType>().unwrap(), DatabaseType::Postgres);
        assert_eq!("SQLite".parse::<DatabaseType>().unwrap(), DatabaseType::Sqlite);
        assert_eq!("mssql".parse::<DatabaseType>().unwrap(), DatabaseType::Mssql);
    }

    #[test]
    fn test_lookup_unknown_engine_fails() {
        let err = DatabaseType::lookup("NON_EXISTENT_CONSTANT").unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownEngine(name) if name == "NON_EXISTENT_CONSTANT"));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DatabaseType::Sqlite.default_port(), 0);
        assert_eq!(DatabaseType::Postgres.default_port(), 5432);
        assert_eq!(DatabaseType::Mssql.default_port(), 1433);
    }
}
