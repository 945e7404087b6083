// Database Drivers
// Native driver implementations for every engine that ships with the crate

pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

// Re-export drivers
pub use mssql::MssqlDriver;
pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
