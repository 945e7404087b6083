// SQLite Driver
// Implements DatabaseDriver trait for SQLite using rusqlite

use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, QueryResult,
    ISO_DATETIME_FORMAT, ISO_DATE_FORMAT, ISO_TIME_FORMAT,
};
use crate::db::types::DatabaseType;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection as RusqliteConnection, OpenFlags};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    pub id: String,
    conn: Arc<Mutex<Option<RusqliteConnection>>>,
}

impl SqliteConnection {
    /// Run `f` against the open handle, or report the connection as closed
    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&RusqliteConnection) -> rusqlite::Result<T>,
    ) -> Result<T, DatabaseError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(DatabaseError::Closed)?;
        f(conn).map_err(|e| DatabaseError::QueryError(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn is_alive(&self) -> bool {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .is_ok()
    }

    async fn execute(&self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        self.with_conn(|conn| conn.execute(sql, params_from_iter(params.iter())))
            .await
            .map(|affected| affected as u64)
    }

    async fn query(&self, sql: &str, params: &[CellValue]) -> Result<QueryResult, DatabaseError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
            let column_count = columns.len();

            let mut result = QueryResult::new(columns);
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(column_count);
                for idx in 0..column_count {
                    cells.push(SqliteDriver::cell_value_from_ref(row.get_ref(idx)?));
                }
                result.rows.push(cells);
            }
            Ok(result)
        })
        .await
    }

    async fn begin(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| conn.execute_batch("BEGIN")).await
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| conn.execute_batch("COMMIT")).await
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| conn.execute_batch("ROLLBACK")).await
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!(connection = %self.id, error = %e, "SQLite close reported an error");
            }
        }
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    /// Open SQLite connection
    fn open_connection(path: &str) -> Result<RusqliteConnection, DatabaseError> {
        RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to open SQLite database: {}", e)))
    }

    /// SQLite is dynamically typed: map the storage class straight across
    fn cell_value_from_ref(value: ValueRef<'_>) -> CellValue {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Int(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(bytes) => CellValue::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Binary(bytes.to_vec()),
        }
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        config.validate()?;
        let sqlite_conn = Self::open_connection(&config.database)?;
        debug!(path = %config.database, "Opened SQLite database");

        Ok(Box::new(SqliteConnection {
            id: config.id.clone(),
            conn: Arc::new(Mutex::new(Some(sqlite_conn))),
        }))
    }
}

/// Temporal values are stored as ISO-8601 text so they read back unchanged
impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            CellValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            CellValue::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(*b as i64)),
            CellValue::Int(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            CellValue::Float(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            CellValue::Decimal(s) => match s.trim().parse::<f64>() {
                Ok(f) => ToSqlOutput::Owned(SqliteValue::Real(f)),
                Err(_) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            },
            CellValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            CellValue::Date(d) => {
                ToSqlOutput::Owned(SqliteValue::Text(d.format(ISO_DATE_FORMAT).to_string()))
            }
            CellValue::DateTime(dt) => {
                ToSqlOutput::Owned(SqliteValue::Text(dt.format(ISO_DATETIME_FORMAT).to_string()))
            }
            CellValue::Time(t) => {
                ToSqlOutput::Owned(SqliteValue::Text(t.format(ISO_TIME_FORMAT).to_string()))
            }
            CellValue::Binary(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            CellValue::Json(v) => ToSqlOutput::Owned(SqliteValue::Text(v.to_string())),
        };
        Ok(output)
    }
}
