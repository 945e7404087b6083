// MySQL Driver
// Implements DatabaseDriver trait for MySQL using sqlx

use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, QueryResult,
};
use crate::db::types::DatabaseType;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Row, TypeInfo};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// MySQL specific connection wrapper
pub struct MysqlConnection {
    pub id: String,
    pool: Mutex<Option<MySqlPool>>,
}

impl MysqlConnection {
    async fn pool(&self) -> Result<MySqlPool, DatabaseError> {
        self.pool.lock().await.clone().ok_or(DatabaseError::Closed)
    }

    /// Text protocol; transaction control cannot go through a prepared statement
    async fn raw(&self, sql: &str) -> Result<(), DatabaseError> {
        let pool = self.pool().await?;
        sqlx::raw_sql(sql)
            .execute(&pool)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        Ok(())
    }
}

fn bind_mysql<'q>(
    q: Query<'q, MySql, MySqlArguments>,
    v: &'q CellValue,
) -> Query<'q, MySql, MySqlArguments> {
    match v {
        CellValue::Null => q.bind(None::<String>),
        CellValue::Bool(b) => q.bind(*b),
        CellValue::Int(i) => q.bind(*i),
        CellValue::Float(f) => q.bind(*f),
        CellValue::Decimal(s) | CellValue::String(s) => q.bind(s.as_str()),
        CellValue::Date(d) => q.bind(*d),
        CellValue::DateTime(dt) => q.bind(*dt),
        CellValue::Time(t) => q.bind(*t),
        CellValue::Binary(bytes) => q.bind(bytes.as_slice()),
        CellValue::Json(other) => q.bind(other.to_string()),
    }
}

fn build_query<'q>(sql: &'q str, params: &'q [CellValue]) -> Query<'q, MySql, MySqlArguments> {
    params.iter().fold(sqlx::query(sql), bind_mysql)
}

#[async_trait::async_trait]
impl Connection for MysqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn is_alive(&self) -> bool {
        self.raw("SELECT 1").await.is_ok()
    }

    async fn execute(&self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        let pool = self.pool().await?;
        build_query(sql, params)
            .execute(&pool)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| DatabaseError::QueryError(e.to_string()))
    }

    async fn query(&self, sql: &str, params: &[CellValue]) -> Result<QueryResult, DatabaseError> {
        let pool = self.pool().await?;
        let rows = build_query(sql, params)
            .fetch_all(&pool)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            // no rows to read names from, ask the server for the statement shape
            None => match (&pool).describe(sql).await {
                Ok(described) => described.columns().iter().map(|c| c.name().to_string()).collect(),
                Err(e) => {
                    debug!(error = %e, "Could not describe empty MySQL result");
                    Vec::new()
                }
            },
        };

        let mut result = QueryResult::new(columns);
        result.rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| MysqlDriver::cell_value_from_row(row, idx))
                    .collect()
            })
            .collect();
        Ok(result)
    }

    async fn begin(&self) -> Result<(), DatabaseError> {
        self.raw("START TRANSACTION").await
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        self.raw("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        self.raw("ROLLBACK").await
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
    }
}

/// How a MySQL column is read back, keyed off the server's type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Bool,
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Json,
    Bytes,
    Text,
}

impl ValueKind {
    fn from_type_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "BOOLEAN" => ValueKind::Bool,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => ValueKind::Signed,
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" | "BIT" => ValueKind::Unsigned,
            "FLOAT" => ValueKind::Float,
            "DOUBLE" => ValueKind::Double,
            "DECIMAL" => ValueKind::Decimal,
            "DATE" => ValueKind::Date,
            "TIME" => ValueKind::Time,
            "DATETIME" | "TIMESTAMP" => ValueKind::DateTime,
            "JSON" => ValueKind::Json,
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => ValueKind::Bytes,
            _ => ValueKind::Text,
        }
    }
}

/// MySQL driver implementation
pub struct MysqlDriver;

impl MysqlDriver {
    /// Create a new MySQL driver
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &DatabaseConfig) -> Result<MySqlConnectOptions, DatabaseError> {
        config.validate()?;
        let mut options = MySqlConnectOptions::new()
            .host(config.host_or_default())
            .port(config.get_port())
            .database(&config.database)
            .username(config.username.as_deref().unwrap_or("root"));
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }
        Ok(options)
    }

    /// Extract cell value from row
    fn cell_value_from_row(row: &MySqlRow, idx: usize) -> CellValue {
        let type_name = row.column(idx).type_info().name();

        let value = match ValueKind::from_type_name(type_name) {
            ValueKind::Bool => row
                .try_get_unchecked::<Option<bool>, _>(idx)
                .map(|v| v.map(CellValue::Bool)),
            ValueKind::Signed => row
                .try_get_unchecked::<Option<i64>, _>(idx)
                .map(|v| v.map(CellValue::Int)),
            ValueKind::Unsigned => row.try_get_unchecked::<Option<u64>, _>(idx).map(|v| {
                v.map(|u| match i64::try_from(u) {
                    Ok(i) => CellValue::Int(i),
                    Err(_) => CellValue::Decimal(u.to_string()),
                })
            }),
            ValueKind::Float => row
                .try_get_unchecked::<Option<f32>, _>(idx)
                .map(|v| v.map(|f| CellValue::Float(f as f64))),
            ValueKind::Double => row
                .try_get_unchecked::<Option<f64>, _>(idx)
                .map(|v| v.map(CellValue::Float)),
            ValueKind::Decimal => row
                .try_get_unchecked::<Option<String>, _>(idx)
                .map(|v| v.map(CellValue::Decimal)),
            ValueKind::Date => row
                .try_get_unchecked::<Option<NaiveDate>, _>(idx)
                .map(|v| v.map(CellValue::Date)),
            ValueKind::Time => row
                .try_get_unchecked::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map(CellValue::Time)),
            ValueKind::DateTime => row
                .try_get_unchecked::<Option<NaiveDateTime>, _>(idx)
                .map(|v| v.map(CellValue::DateTime)),
            ValueKind::Json => row
                .try_get_unchecked::<Option<serde_json::Value>, _>(idx)
                .map(|v| v.map(CellValue::Json)),
            ValueKind::Bytes => row
                .try_get_unchecked::<Option<Vec<u8>>, _>(idx)
                .map(|v| v.map(CellValue::Binary)),
            ValueKind::Text => row
                .try_get_unchecked::<Option<String>, _>(idx)
                .map(|v| v.map(CellValue::String)),
        };

        match value {
            Ok(cell) => cell.unwrap_or(CellValue::Null),
            // out-of-range temporal values and exotic types still come back as text
            Err(e) => {
                debug!(column = idx, mysql_type = type_name, error = %e, "Falling back to raw MySQL value");
                row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|bytes| CellValue::String(String::from_utf8_lossy(&bytes).into_owned()))
                    .unwrap_or(CellValue::Null)
            }
        }
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MysqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let options = Self::connect_options(config)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("MySQL connection failed: {}", e)))?;

        Ok(Box::new(MysqlConnection {
            id: config.id.clone(),
            pool: Mutex::new(Some(pool)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_type() {
        let driver = MysqlDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Mysql);
        assert_eq!(driver.driver_name(), "MySQL");
    }

    #[test]
    fn test_connect_options_require_host() {
        let config = DatabaseConfig::new(DatabaseType::Mysql, "app");
        assert!(matches!(
            MysqlDriver::connect_options(&config).unwrap_err(),
            DatabaseError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_value_kind_from_type_name() {
        assert_eq!(ValueKind::from_type_name("INT"), ValueKind::Signed);
        assert_eq!(ValueKind::from_type_name("BIGINT UNSIGNED"), ValueKind::Unsigned);
        assert_eq!(ValueKind::from_type_name("DECIMAL"), ValueKind::Decimal);
        assert_eq!(ValueKind::from_type_name("TIMESTAMP"), ValueKind::DateTime);
        assert_eq!(ValueKind::from_type_name("VARBINARY"), ValueKind::Bytes);
        assert_eq!(ValueKind::from_type_name("VARCHAR"), ValueKind::Text);
        assert_eq!(ValueKind::from_type_name("TEXT"), ValueKind::Text);
    }
}
