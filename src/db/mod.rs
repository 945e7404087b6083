// Database Module
// Multi-engine SQL access: engine registry, native drivers, dialects and result normalization

pub mod connection;
pub mod database;
pub mod dialect;
pub mod drivers;
pub mod registry;
pub mod result;
pub mod traits;
pub mod types;

pub use connection::{ConnectionString, Endpoint};
pub use database::{Database, InsertData};
pub use drivers::{MssqlDriver, MysqlDriver, PostgresDriver, SqliteDriver};
pub use registry::DriverRegistry;
pub use result::{ArrayOutput, DatabaseResult, JsonRow, Paginated};
pub use traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, QueryResult, Record,
};
pub use types::DatabaseType;
