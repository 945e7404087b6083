// tina4-data
// Multi-engine SQL access with normalized results, plus password and token authentication

pub mod auth;
pub mod db;

pub use auth::{Auth, AuthConfig, AuthError, Claims};
pub use db::{
    CellValue, Database, DatabaseError, DatabaseResult, DatabaseType, InsertData, Record,
};
