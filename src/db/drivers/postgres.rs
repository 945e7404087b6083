// PostgreSQL Driver
// Implements DatabaseDriver trait for PostgreSQL using tokio-postgres behind a bb8 pool

use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, QueryResult,
    ISO_DATETIME_FORMAT,
};
use crate::db::types::DatabaseType;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager as Bb8PostgresManager;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::debug;

pub type PostgresPool = Pool<Bb8PostgresManager<NoTls>>;

type BoxError = Box<dyn Error + Sync + Send>;

/// PostgreSQL specific connection wrapper.
///
/// The pool holds a single connection so session state (transactions) survives
/// between calls.
pub struct PostgresConnection {
    pub id: String,
    pool: Mutex<Option<PostgresPool>>,
}

impl PostgresConnection {
    async fn pool(&self) -> Result<PostgresPool, DatabaseError> {
        self.pool.lock().await.clone().ok_or(DatabaseError::Closed)
    }

    async fn batch(&self, sql: &str) -> Result<(), DatabaseError> {
        let pool = self.pool().await?;
        let conn = pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;
        conn.batch_execute(sql)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))
    }
}

fn param_refs(params: &[CellValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn is_alive(&self) -> bool {
        let Ok(pool) = self.pool().await else {
            return false;
        };
        let alive = match pool.get().await {
            Ok(conn) => conn.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        };
        alive
    }

    async fn execute(&self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        let pool = self.pool().await?;
        let conn = pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;
        conn.execute(sql, &param_refs(params))
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))
    }

    async fn query(&self, sql: &str, params: &[CellValue]) -> Result<QueryResult, DatabaseError> {
        let pool = self.pool().await?;
        let conn = pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;

        let stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        let columns = stmt.columns().iter().map(|c| c.name().to_string()).collect();

        let rows = conn
            .query(&stmt, &param_refs(params))
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        let mut result = QueryResult::new(columns);
        result.rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| PostgresDriver::cell_value_from_row(row, idx))
                    .collect()
            })
            .collect();
        Ok(result)
    }

    async fn begin(&self) -> Result<(), DatabaseError> {
        self.batch("BEGIN").await
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        self.batch("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        self.batch("ROLLBACK").await
    }

    async fn close(&self) {
        // dropping the last pool handle closes its connection
        self.pool.lock().await.take();
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build the tokio-postgres configuration from the unified config
    fn build_pg_config(config: &DatabaseConfig) -> Result<tokio_postgres::Config, DatabaseError> {
        config.validate()?;
        let mut pg = tokio_postgres::Config::new();
        pg.host(config.host_or_default())
            .port(config.get_port())
            .dbname(&config.database)
            .user(config.username.as_deref().unwrap_or("postgres"));
        if !config.password.is_empty() {
            pg.password(&config.password);
        }
        Ok(pg)
    }

    /// Extract cell value from row
    fn cell_value_from_row(row: &Row, idx: usize) -> CellValue {
        let ty = row.columns()[idx].type_().clone();

        match ty {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Bool)
                .unwrap_or(CellValue::Null),

            // Integer types
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .unwrap_or(CellValue::Null),
            Type::OID => row
                .try_get::<_, Option<u32>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),

            // Float types
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Float(v as f64))
                .unwrap_or(CellValue::Null),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null),

            Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx) {
                Ok(value) => value
                    .map(|d| CellValue::Decimal(d.to_string()))
                    .unwrap_or(CellValue::Null),
                // NaN and values beyond 28 significant digits
                Err(e) => {
                    debug!(column = idx, error = %e, "NUMERIC value not representable");
                    CellValue::Null
                }
            },

            // Date/Time types
            Type::DATE => row
                .try_get::<_, Option<NaiveDate>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Date)
                .unwrap_or(CellValue::Null),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(idx)
                .ok()
                .flatten()
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Null),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<DateTime<Utc>>>(idx)
                .ok()
                .flatten()
                .map(|dt| CellValue::DateTime(dt.naive_utc()))
                .unwrap_or(CellValue::Null),
            Type::TIME => row
                .try_get::<_, Option<NaiveTime>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Time)
                .unwrap_or(CellValue::Null),

            Type::BYTEA => row
                .try_get::<_, Option<Vec<u8>>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Binary)
                .unwrap_or(CellValue::Null),

            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Json)
                .unwrap_or(CellValue::Null),

            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .flatten()
                .map(|u| CellValue::String(u.to_string()))
                .unwrap_or(CellValue::Null),

            // Text types, and anything else that decodes as text
            _ => match row.try_get::<_, Option<String>>(idx) {
                Ok(value) => value.map(CellValue::String).unwrap_or(CellValue::Null),
                Err(e) => {
                    debug!(column = idx, pg_type = %ty, error = %e, "Unsupported PostgreSQL column type");
                    CellValue::Null
                }
            },
        }
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let pg_config = Self::build_pg_config(config)?;
        let manager = Bb8PostgresManager::new(pg_config, NoTls);

        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .build(manager)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e)))?;

        Ok(Box::new(PostgresConnection {
            id: config.id.clone(),
            pool: Mutex::new(Some(pool)),
        }))
    }
}

fn is_text_type(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
}

/// Parameters adapt to whatever type the server inferred for the placeholder
impl ToSql for CellValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            CellValue::Null => Ok(IsNull::Yes),
            CellValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => CellValue::Int(*b as i64).to_sql(ty, out),
            },
            CellValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*i).to_sql(ty, out),
                ref t if is_text_type(t) => i.to_string().to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            CellValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*f)?.to_sql(ty, out),
                ref t if is_text_type(t) => f.to_string().to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            CellValue::Decimal(s) => match *ty {
                Type::NUMERIC => s.trim().parse::<Decimal>()?.to_sql(ty, out),
                Type::FLOAT4 | Type::FLOAT8 => CellValue::Float(s.trim().parse()?).to_sql(ty, out),
                _ => s.to_sql(ty, out),
            },
            CellValue::String(s) => match *ty {
                Type::NUMERIC => s.trim().parse::<Decimal>()?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
                _ => s.to_sql(ty, out),
            },
            CellValue::Date(d) => match *ty {
                ref t if is_text_type(t) => d.to_string().to_sql(ty, out),
                _ => d.to_sql(ty, out),
            },
            CellValue::DateTime(dt) => match *ty {
                Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                ref t if is_text_type(t) => dt.format(ISO_DATETIME_FORMAT).to_string().to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
            CellValue::Time(t) => t.to_sql(ty, out),
            CellValue::Binary(bytes) => bytes.to_sql(ty, out),
            CellValue::Json(v) => match *ty {
                ref t if is_text_type(t) => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_postgres::types::FromSql;

    fn numeric(value: CellValue) -> Result<Decimal, BoxError> {
        let mut buf = BytesMut::new();
        value.to_sql(&Type::NUMERIC, &mut buf)?;
        Decimal::from_sql(&Type::NUMERIC, &buf)
    }

    fn closed_connection() -> PostgresConnection {
        PostgresConnection {
            id: "closed".to_string(),
            pool: Mutex::new(None),
        }
    }

    #[test]
    fn test_driver_type() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Postgres);
    }

    #[test]
    fn test_pg_config_building() {
        let mut config = DatabaseConfig::new(DatabaseType::Postgres, "testdb");
        config.host = Some("localhost".to_string());
        config.port = Some(5433);
        config.username = Some("testuser".to_string());
        config.password = "testpass".to_string();

        let pg = PostgresDriver::build_pg_config(&config).unwrap();
        assert_eq!(pg.get_dbname(), Some("testdb"));
        assert_eq!(pg.get_user(), Some("testuser"));
        assert_eq!(pg.get_ports(), &[5433]);
        assert_eq!(pg.get_password(), Some(&b"testpass"[..]));
    }

    #[test]
    fn test_pg_config_requires_host() {
        let config = DatabaseConfig::new(DatabaseType::Postgres, "testdb");
        assert!(PostgresDriver::build_pg_config(&config).is_err());
    }

    #[test]
    fn test_numeric_params() {
        assert_eq!(numeric(CellValue::Decimal("10.5".to_string())).unwrap().to_string(), "10.5");
        assert_eq!(numeric(CellValue::from("-12345678.5")).unwrap().to_string(), "-12345678.5");
        assert_eq!(numeric(CellValue::Int(100000)).unwrap(), Decimal::from(100000i64));
        assert_eq!(numeric(CellValue::Float(0.25)).unwrap().to_string(), "0.25");
    }

    #[test]
    fn test_numeric_rejects_garbage() {
        assert!(numeric(CellValue::from("12a")).is_err());
        assert!(numeric(CellValue::from("")).is_err());
        assert!(numeric(CellValue::Float(f64::NAN)).is_err());
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_alive() {
        let conn = closed_connection();
        assert!(!conn.is_alive().await);
        assert!(matches!(
            conn.execute("SELECT 1", &[]).await.unwrap_err(),
            DatabaseError::Closed
        ));
    }
}
