// Database Driver Traits
// Core abstraction shared by every native driver: values, errors, connections

use crate::db::types::DatabaseType;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Unknown database engine: {0}")]
    UnknownEngine(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Driver not found for {engine}: {hint}")]
    DriverNotFound {
        engine: DatabaseType,
        hint: &'static str,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("A transaction is already in progress")]
    TransactionActive,

    #[error("Connection is closed")]
    Closed,

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A single column value, as read from a driver or bound as a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept as text so no precision is lost before normalization
    Decimal(String),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Binary(Vec<u8>),
    Json(Value),
}

pub const ISO_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";
pub const ISO_TIME_FORMAT: &str = "%H:%M:%S%.f";

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) => Some(*f as i64),
            CellValue::Decimal(s) | CellValue::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
            CellValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Portable JSON form: decimals become floats, temporal values ISO-8601 text,
    /// binary base64 text.
    pub fn to_json_value(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) => json!(*i),
            CellValue::Float(f) => float_to_json(*f),
            CellValue::Decimal(s) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => json!(f),
                _ => Value::String(s.clone()),
            },
            CellValue::String(s) => Value::String(s.clone()),
            CellValue::Date(d) => Value::String(d.format(ISO_DATE_FORMAT).to_string()),
            CellValue::DateTime(dt) => Value::String(dt.format(ISO_DATETIME_FORMAT).to_string()),
            CellValue::Time(t) => Value::String(t.format(ISO_TIME_FORMAT).to_string()),
            CellValue::Binary(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            CellValue::Json(v) => v.clone(),
        }
    }
}

fn float_to_json(f: f64) -> Value {
    if f.is_nan() {
        Value::String("NaN".to_string())
    } else if f.is_infinite() {
        if f > 0.0 {
            Value::String("Infinity".to_string())
        } else {
            Value::String("-Infinity".to_string())
        }
    } else {
        json!(f)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_value().serialize(serializer)
    }
}

macro_rules! cell_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for CellValue {
                fn from(v: $ty) -> Self {
                    CellValue::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

cell_from! {
    bool => Bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    String => String,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    NaiveTime => Time,
    Vec<u8> => Binary,
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<&String> for CellValue {
    fn from(v: &String) -> Self {
        CellValue::String(v.clone())
    }
}

impl From<&[u8]> for CellValue {
    fn from(v: &[u8]) -> Self {
        CellValue::Binary(v.to_vec())
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

impl From<Value> for CellValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(CellValue::Int)
                .or_else(|| n.as_f64().map(CellValue::Float))
                .unwrap_or(CellValue::Null),
            Value::String(s) => CellValue::String(s),
            other => CellValue::Json(other),
        }
    }
}

/// A row: column name -> value, in column order
pub type Record = IndexMap<String, CellValue>;

/// Build a `Vec<CellValue>` for positional `?` placeholders
#[macro_export]
macro_rules! sql_params {
    () => {
        ::std::vec::Vec::<$crate::db::CellValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::db::CellValue::from($value)),+]
    };
}

/// Build a [`Record`] from `column => value` pairs
#[macro_export]
macro_rules! record {
    () => {
        $crate::db::Record::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::db::Record::new();
        $(record.insert(::std::string::String::from($column), $crate::db::CellValue::from($value));)+
        record
    }};
}

/// Columns and rows returned by a driver for one statement
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Zip column names onto each row
    pub fn into_records(self) -> (Vec<String>, Vec<Record>) {
        let records = self
            .rows
            .into_iter()
            .map(|row| self.columns.iter().cloned().zip(row).collect::<Record>())
            .collect();
        (self.columns, records)
    }
}

/// Connection trait - all database connections must implement this.
///
/// SQL handed to a connection already uses the engine's native placeholder syntax.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Engine behind this connection
    fn database_type(&self) -> DatabaseType;

    /// Test if the connection is alive
    async fn is_alive(&self) -> bool;

    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError>;

    /// Run a statement and collect every row it returns
    async fn query(&self, sql: &str, params: &[CellValue]) -> Result<QueryResult, DatabaseError>;

    async fn begin(&self) -> Result<(), DatabaseError>;

    async fn commit(&self) -> Result<(), DatabaseError>;

    async fn rollback(&self) -> Result<(), DatabaseError>;

    /// Release the native handle. Safe to call more than once.
    async fn close(&self);
}

/// Database driver trait - all database drivers must implement this
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    /// Create a new connection from configuration
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError>;
}

/// Everything a driver needs to open a connection
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub id: String,
    pub database_type: DatabaseType,

    // Network engines
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite
    pub database: String,
    pub username: Option<String>,
    pub password: String,
}

impl DatabaseConfig {
    pub fn new(database_type: DatabaseType, database: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database_type,
            host: None,
            port: None,
            database: database.into(),
            username: None,
            password: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.database.is_empty() {
            return Err(DatabaseError::InvalidConfig(
                if self.database_type.is_file_based() {
                    "SQLite database path is required"
                } else {
                    "Database name is required"
                }
                .to_string(),
            ));
        }
        if !self.database_type.is_file_based()
            && self.host.as_ref().map(|h| h.is_empty()).unwrap_or(true)
        {
            return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.database_type.default_port())
    }

    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }
}
