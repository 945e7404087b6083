// MS-SQL Driver
// Implements DatabaseDriver trait for MS-SQL using tiberius behind a bb8 pool

use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, QueryResult,
};
use crate::db::types::DatabaseType;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::borrow::Cow;
use tiberius::{AuthMethod, ColumnData, ColumnType, Config, EncryptionLevel, Row};
use tokio::sync::Mutex;
use tracing::debug;

pub type MssqlPool = Pool<ConnectionManager>;

/// MS-SQL specific connection wrapper
pub struct MssqlConnection {
    pub id: String,
    pool: Mutex<Option<MssqlPool>>,
}

impl MssqlConnection {
    async fn pool(&self) -> Result<MssqlPool, DatabaseError> {
        self.pool.lock().await.clone().ok_or(DatabaseError::Closed)
    }

    /// Run a raw batch outside sp_executesql so transaction state sticks to the session
    async fn batch(&self, sql: &str) -> Result<(), DatabaseError> {
        let pool = self.pool().await?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;
        conn.simple_query(sql)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?
            .into_results()
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        Ok(())
    }
}

fn param_refs(params: &[CellValue]) -> Vec<&dyn tiberius::ToSql> {
    params.iter().map(|p| p as &dyn tiberius::ToSql).collect()
}

#[async_trait::async_trait]
impl Connection for MssqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn is_alive(&self) -> bool {
        self.batch("SELECT 1").await.is_ok()
    }

    async fn execute(&self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        let pool = self.pool().await?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;
        let refs = param_refs(params);
        let result = conn
            .execute(sql, &refs)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        Ok(result.total())
    }

    async fn query(&self, sql: &str, params: &[CellValue]) -> Result<QueryResult, DatabaseError> {
        let pool = self.pool().await?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;

        let refs = param_refs(params);
        let mut stream = conn
            .query(sql, &refs)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        let columns = stream
            .columns()
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        let mut result = QueryResult::new(columns);
        result.rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| MssqlDriver::cell_value_from_row(row, idx))
                    .collect()
            })
            .collect();
        Ok(result)
    }

    async fn begin(&self) -> Result<(), DatabaseError> {
        self.batch("BEGIN TRANSACTION").await
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        self.batch("COMMIT TRANSACTION").await
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        self.batch("ROLLBACK TRANSACTION").await
    }

    async fn close(&self) {
        self.pool.lock().await.take();
    }
}

/// MS-SQL driver implementation
pub struct MssqlDriver;

impl MssqlDriver {
    /// Create a new MS-SQL driver
    pub fn new() -> Self {
        Self
    }

    /// Convert unified DatabaseConfig to a tiberius Config
    fn to_tiberius_config(config: &DatabaseConfig) -> Result<Config, DatabaseError> {
        config.validate()?;
        let username = config
            .username
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username required for MS-SQL".to_string()))?;

        let mut tiberius_config = Config::new();
        tiberius_config.host(config.host_or_default());
        tiberius_config.port(config.get_port());
        tiberius_config.database(&config.database);
        tiberius_config.authentication(AuthMethod::sql_server(username, &config.password));
        tiberius_config.trust_cert();
        tiberius_config.encryption(EncryptionLevel::Off);
        Ok(tiberius_config)
    }

    /// Convert Tiberius ColumnType to string
    fn column_type_to_string(col_type: &ColumnType) -> String {
        match col_type {
            ColumnType::Int1 => "tinyint".to_string(),
            ColumnType::Int2 => "smallint".to_string(),
            ColumnType::Int4 => "int".to_string(),
            ColumnType::Int8 => "bigint".to_string(),
            ColumnType::Intn => "int".to_string(),
            ColumnType::Float4 => "real".to_string(),
            ColumnType::Float8 | ColumnType::Floatn => "float".to_string(),
            ColumnType::Decimaln | ColumnType::Numericn => "decimal".to_string(),
            ColumnType::Money | ColumnType::Money4 => "money".to_string(),
            ColumnType::Bit | ColumnType::Bitn => "bit".to_string(),
            ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::NVarchar | ColumnType::NChar
            | ColumnType::Text | ColumnType::NText => "nvarchar".to_string(),
            ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen => "datetime".to_string(),
            ColumnType::Datetime4 => "smalldatetime".to_string(),
            ColumnType::Daten => "date".to_string(),
            ColumnType::Timen => "time".to_string(),
            ColumnType::DatetimeOffsetn => "datetimeoffset".to_string(),
            ColumnType::Guid => "uniqueidentifier".to_string(),
            ColumnType::Xml => "xml".to_string(),
            ColumnType::Null => "null".to_string(),
            _ => format!("{:?}", col_type).to_lowercase(),
        }
    }

    /// Extract cell value from row
    fn cell_value_from_row(row: &Row, idx: usize) -> CellValue {
        let col_type = row
            .columns()
            .get(idx)
            .map(|c| c.column_type())
            .unwrap_or(ColumnType::Null);

        match col_type {
            ColumnType::Null => CellValue::Null,

            // Integer types
            ColumnType::Int1 => row
                .try_get::<u8, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            ColumnType::Int2 => row
                .try_get::<i16, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            ColumnType::Int4 => row
                .try_get::<i32, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            ColumnType::Int8 => row
                .try_get::<i64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .unwrap_or(CellValue::Null),
            ColumnType::Intn => row
                .try_get::<i64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
                .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
                .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
                .unwrap_or(CellValue::Null),

            // Float types
            ColumnType::Float4 => row
                .try_get::<f32, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Float(v as f64))
                .unwrap_or(CellValue::Null),
            ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => row
                .try_get::<f64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null),
            ColumnType::Floatn => row
                .try_get::<f64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Float)
                .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(|v| CellValue::Float(v as f64)))
                .unwrap_or(CellValue::Null),

            // Exact numerics keep their digits
            ColumnType::Decimaln | ColumnType::Numericn => row
                .try_get::<tiberius::numeric::Numeric, _>(idx)
                .ok()
                .flatten()
                .map(|n| CellValue::Decimal(n.to_string()))
                .unwrap_or(CellValue::Null),

            // Boolean
            ColumnType::Bit | ColumnType::Bitn => row
                .try_get::<bool, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Bool)
                .unwrap_or(CellValue::Null),

            // String types
            ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::NVarchar | ColumnType::NChar
            | ColumnType::Text | ColumnType::NText => row
                .try_get::<&str, _>(idx)
                .ok()
                .flatten()
                .map(|s| CellValue::String(s.to_string()))
                .unwrap_or(CellValue::Null),

            // Date/Time types
            ColumnType::Datetime
            | ColumnType::Datetime2
            | ColumnType::Datetimen
            | ColumnType::Datetime4 => row
                .try_get::<NaiveDateTime, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Null),
            ColumnType::DatetimeOffsetn => row
                .try_get::<DateTime<Utc>, _>(idx)
                .ok()
                .flatten()
                .map(|dt| CellValue::DateTime(dt.naive_utc()))
                .unwrap_or(CellValue::Null),
            ColumnType::Daten => row
                .try_get::<NaiveDate, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Date)
                .unwrap_or(CellValue::Null),
            ColumnType::Timen => row
                .try_get::<NaiveTime, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Time)
                .unwrap_or(CellValue::Null),

            // Binary types
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
                .try_get::<&[u8], _>(idx)
                .ok()
                .flatten()
                .map(|b| CellValue::Binary(b.to_vec()))
                .unwrap_or(CellValue::Null),

            // GUID
            ColumnType::Guid => row
                .try_get::<tiberius::Uuid, _>(idx)
                .ok()
                .flatten()
                .map(|u| CellValue::String(u.to_string()))
                .unwrap_or(CellValue::Null),

            // XML
            ColumnType::Xml => row
                .try_get::<&tiberius::xml::XmlData, _>(idx)
                .ok()
                .flatten()
                .map(|xml| CellValue::String(xml.to_owned().into_string()))
                .unwrap_or(CellValue::Null),

            other => {
                debug!(
                    column = idx,
                    sql_type = %Self::column_type_to_string(&other),
                    "Unsupported MS-SQL column type"
                );
                CellValue::Null
            }
        }
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let tiberius_config = Self::to_tiberius_config(config)?;
        let manager = ConnectionManager::build(tiberius_config)
            .map_err(|e| DatabaseError::InvalidConfig(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .build(manager)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("MS-SQL connection failed: {}", e)))?;

        Ok(Box::new(MssqlConnection {
            id: config.id.clone(),
            pool: Mutex::new(Some(pool)),
        }))
    }
}

impl tiberius::ToSql for CellValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            CellValue::Null => ColumnData::String(None),
            CellValue::Bool(b) => ColumnData::Bit(Some(*b)),
            CellValue::Int(i) => ColumnData::I64(Some(*i)),
            CellValue::Float(f) => ColumnData::F64(Some(*f)),
            CellValue::Decimal(s) | CellValue::String(s) => {
                ColumnData::String(Some(Cow::Borrowed(s.as_str())))
            }
            CellValue::Date(d) => tiberius::ToSql::to_sql(d),
            CellValue::DateTime(dt) => tiberius::ToSql::to_sql(dt),
            CellValue::Time(t) => tiberius::ToSql::to_sql(t),
            CellValue::Binary(bytes) => ColumnData::Binary(Some(Cow::Borrowed(bytes.as_slice()))),
            CellValue::Json(v) => ColumnData::String(Some(Cow::Owned(v.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiberius::ToSql;

    #[test]
    fn test_column_type_to_string() {
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::Int4), "int");
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::Float8), "float");
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::NVarchar), "nvarchar");
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::Decimaln), "decimal");
    }

    #[test]
    fn test_driver_type() {
        let driver = MssqlDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Mssql);
        assert_eq!(driver.driver_name(), "Microsoft SQL Server");
    }

    #[test]
    fn test_config_conversion() {
        let mut config = DatabaseConfig::new(DatabaseType::Mssql, "master");
        config.host = Some("localhost".to_string());
        config.port = Some(1433);
        config.username = Some("sa".to_string());
        config.password = "password".to_string();
        assert!(MssqlDriver::to_tiberius_config(&config).is_ok());

        config.username = None;
        assert!(matches!(
            MssqlDriver::to_tiberius_config(&config).unwrap_err(),
            DatabaseError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_params_bind_as_native_types() {
        assert!(matches!(CellValue::Int(7).to_sql(), ColumnData::I64(Some(7))));
        assert!(matches!(CellValue::Bool(true).to_sql(), ColumnData::Bit(Some(true))));
        assert!(matches!(CellValue::Null.to_sql(), ColumnData::String(None)));
        match CellValue::from("Alpha").to_sql() {
            ColumnData::String(Some(s)) => assert_eq!(s, "Alpha"),
            other => panic!("unexpected column data: {:?}", other),
        }
    }
}
