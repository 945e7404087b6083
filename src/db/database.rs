// Database
// One live connection behind a uniform execute / fetch / CRUD / transaction API

use crate::db::connection::ConnectionString;
use crate::db::dialect;
use crate::db::registry::DriverRegistry;
use crate::db::result::DatabaseResult;
use crate::db::traits::{CellValue, Connection, DatabaseError, Record};
use crate::db::types::DatabaseType;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Rows handed to [`Database::insert`]
#[derive(Debug, Clone, PartialEq)]
pub enum InsertData {
    One(Record),
    Many(Vec<Record>),
}

impl From<Record> for InsertData {
    fn from(record: Record) -> Self {
        InsertData::One(record)
    }
}

impl From<Vec<Record>> for InsertData {
    fn from(records: Vec<Record>) -> Self {
        InsertData::Many(records)
    }
}

impl InsertData {
    /// Accepts an object or an array of objects; anything else is not insertable
    pub fn from_json(value: Value) -> Option<Self> {
        fn to_record(value: Value) -> Option<Record> {
            match value {
                Value::Object(map) => Some(
                    map.into_iter()
                        .map(|(column, v)| (column, CellValue::from(v)))
                        .collect(),
                ),
                _ => None,
            }
        }

        match value {
            Value::Object(_) => to_record(value).map(InsertData::One),
            Value::Array(items) => items
                .into_iter()
                .map(to_record)
                .collect::<Option<Vec<_>>>()
                .map(InsertData::Many),
            _ => None,
        }
    }

    fn into_records(self) -> Vec<Record> {
        match self {
            InsertData::One(record) => vec![record],
            InsertData::Many(records) => records,
        }
    }
}

/// Transaction the connection currently has open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Idle,
    /// Opened by the first write; ended by `commit` or `rollback`
    Implicit,
    /// Opened by `start_transaction`
    Explicit,
}

/// A connection to one database engine.
///
/// Writes are never auto-committed: the first write opens a transaction that
/// stays open until `commit` or `rollback`, and closing the connection
/// discards it.
///
/// Operational failures (bad SQL, missing rows, a closed connection) are
/// reported through the returned values; only opening the connection and
/// transaction misuse produce `Err`.
pub struct Database {
    connection_string: ConnectionString,
    username: Option<String>,
    password: Option<String>,
    registry: Arc<DriverRegistry>,
    conn: Option<Box<dyn Connection>>,
    transaction: TransactionState,
}

impl Database {
    /// Open `"<engine>:<target>"` with the drivers built into the crate
    pub async fn connect(connection_string: &str) -> Result<Self, DatabaseError> {
        Self::connect_with_credentials(connection_string, None, None).await
    }

    pub async fn connect_with_credentials(
        connection_string: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, DatabaseError> {
        let registry = Arc::new(DriverRegistry::with_default_drivers().await);
        Self::connect_with_registry(connection_string, username, password, registry).await
    }

    #[instrument(skip(password, registry))]
    pub async fn connect_with_registry(
        connection_string: &str,
        username: Option<&str>,
        password: Option<&str>,
        registry: Arc<DriverRegistry>,
    ) -> Result<Self, DatabaseError> {
        let parsed = ConnectionString::parse(connection_string).inspect_err(|e| {
            error!(error = %e, "Rejected connection string");
        })?;

        let mut db = Self {
            connection_string: parsed,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            registry,
            conn: None,
            transaction: TransactionState::Idle,
        };

        let conn = db.open().await.inspect_err(|e| {
            error!(engine = %db.connection_string.engine, error = %e, "Database connection failed");
        })?;
        info!(engine = %db.connection_string.engine, "Database connected");
        db.conn = Some(conn);
        Ok(db)
    }

    async fn open(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        let config = self
            .connection_string
            .to_config(self.username.as_deref(), self.password.as_deref())?;
        let driver = self.registry.get_driver(self.connection_string.engine).await?;
        let conn = driver.connect(&config).await?;
        debug!(driver = driver.driver_name(), connection = conn.connection_id(), "Opened connection");
        Ok(conn)
    }

    fn conn(&self) -> Result<&dyn Connection, DatabaseError> {
        self.conn.as_deref().ok_or(DatabaseError::Closed)
    }

    pub fn database_engine(&self) -> DatabaseType {
        self.connection_string.engine
    }

    /// Connection-string token of the engine, e.g. `sqlite3`
    pub fn driver_id(&self) -> &'static str {
        self.connection_string.engine.driver_id()
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Whether uncommitted work is pending, explicit or not
    pub fn in_transaction(&self) -> bool {
        self.transaction != TransactionState::Idle
    }

    fn native(&self, sql: &str) -> String {
        dialect::rewrite_placeholders(sql, self.database_engine())
    }

    async fn run(&self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        let native = self.native(sql);
        debug!(sql = %native, params = params.len(), "execute");
        self.conn()?.execute(&native, params).await
    }

    /// Open the implicit transaction if nothing is pending yet
    async fn ensure_transaction(&mut self) -> Result<(), DatabaseError> {
        if self.transaction == TransactionState::Idle {
            self.conn()?.begin().await?;
            self.transaction = TransactionState::Implicit;
            debug!("Implicit transaction opened");
        }
        Ok(())
    }

    async fn write(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        self.ensure_transaction().await?;
        self.run(sql, params).await
    }

    /// Run one statement; `count` carries the affected row count.
    /// The change stays pending until `commit`.
    pub async fn execute(&mut self, sql: &str, params: &[CellValue]) -> DatabaseResult {
        match self.write(sql, params).await {
            Ok(affected) => DatabaseResult::default().with_count(affected),
            Err(e) => {
                warn!(error = %e, "Statement failed");
                DatabaseResult::from_error(e.to_string())
            }
        }
    }

    /// Run one statement per parameter set, stopping at the first failure
    pub async fn execute_many(&mut self, sql: &str, params_list: &[Vec<CellValue>]) -> DatabaseResult {
        let mut affected = 0;
        for params in params_list {
            match self.write(sql, params).await {
                Ok(n) => affected += n,
                Err(e) => {
                    warn!(error = %e, "Batched statement failed");
                    return DatabaseResult::from_error(e.to_string()).with_count(affected);
                }
            }
        }
        DatabaseResult::default().with_count(affected)
    }

    /// Query rows; with a `limit` or `skip` only that page is returned while
    /// `count` still reports every matching row.
    pub async fn fetch(
        &self,
        sql: &str,
        params: &[CellValue],
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> DatabaseResult {
        match self.try_fetch(sql, params, limit, skip).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Query failed");
                DatabaseResult::from_error(e.to_string())
                    .with_limit(limit)
                    .with_skip(skip)
            }
        }
    }

    async fn try_fetch(
        &self,
        sql: &str,
        params: &[CellValue],
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> Result<DatabaseResult, DatabaseError> {
        let conn = self.conn()?;
        let engine = self.database_engine();

        let paged = limit.is_some() || skip.is_some();
        let statement = if paged {
            dialect::paginate(sql, engine, limit, skip.unwrap_or(0))
        } else {
            sql.to_string()
        };
        let native = self.native(&statement);
        debug!(sql = %native, params = params.len(), "fetch");
        let (columns, records) = conn.query(&native, params).await?.into_records();

        let total = if paged {
            self.count_rows(sql, params).await.unwrap_or(records.len() as u64)
        } else {
            records.len() as u64
        };

        Ok(DatabaseResult::new(records, columns)
            .with_count(total)
            .with_limit(limit)
            .with_skip(skip))
    }

    async fn count_rows(&self, sql: &str, params: &[CellValue]) -> Option<u64> {
        let counted = self.native(&dialect::count_query(sql));
        match self.conn().ok()?.query(&counted, params).await {
            Ok(result) => result
                .rows
                .first()
                .and_then(|row| row.first())
                .and_then(CellValue::as_i64)
                .map(|n| n.max(0) as u64),
            Err(e) => {
                debug!(error = %e, "Could not count rows, using page size");
                None
            }
        }
    }

    /// First row of the query, `None` when there is none or the query failed
    pub async fn fetch_one(&self, sql: &str, params: &[CellValue]) -> Option<Record> {
        let conn = self.conn().ok()?;
        let native = self.native(sql);
        debug!(sql = %native, params = params.len(), "fetch_one");
        match conn.query(&native, params).await {
            Ok(result) => result.into_records().1.into_iter().next(),
            Err(e) => {
                warn!(error = %e, "Query failed");
                None
            }
        }
    }

    /// Insert one or many rows. `None` means the input was not insertable and
    /// no SQL was issued.
    pub async fn insert(&mut self, table: &str, data: impl Into<InsertData>) -> Option<DatabaseResult> {
        let records = data.into().into_records();
        if dialect::validate_identifier(table).is_err() || records.is_empty() {
            debug!(table, "Rejected insert input");
            return None;
        }
        for record in &records {
            if record.is_empty() || record.keys().any(|c| dialect::validate_identifier(c).is_err()) {
                debug!(table, "Rejected insert record");
                return None;
            }
        }

        let mut inserted = 0;
        for record in records {
            let columns: Vec<&str> = record.keys().map(String::as_str).collect();
            let sql = dialect::insert_statement(table, &columns);
            let params: Vec<CellValue> = record.values().cloned().collect();
            match self.write(&sql, &params).await {
                Ok(n) => inserted += n,
                Err(e) => {
                    warn!(table, error = %e, "Insert failed");
                    return Some(DatabaseResult::from_error(e.to_string()).with_count(inserted));
                }
            }
        }
        Some(DatabaseResult::default().with_count(inserted))
    }

    pub async fn insert_one(&mut self, table: &str, record: Record) -> Option<DatabaseResult> {
        self.insert(table, InsertData::One(record)).await
    }

    pub async fn insert_many(&mut self, table: &str, records: Vec<Record>) -> Option<DatabaseResult> {
        self.insert(table, InsertData::Many(records)).await
    }

    /// Insert from JSON: an object is one row, an array of objects many rows
    pub async fn insert_json(&mut self, table: &str, value: Value) -> Option<DatabaseResult> {
        let data = InsertData::from_json(value)?;
        self.insert(table, data).await
    }

    /// Update the row whose `id` matches the record's `id`
    pub async fn update(&mut self, table: &str, record: &Record) -> bool {
        self.update_by(table, record, "id").await
    }

    pub async fn update_by(&mut self, table: &str, record: &Record, primary_key: &str) -> bool {
        let Some(key_value) = record.get(primary_key) else {
            debug!(table, primary_key, "Update record has no key value");
            return false;
        };
        let columns: Vec<&str> = record
            .keys()
            .map(String::as_str)
            .filter(|c| *c != primary_key)
            .collect();
        if columns.is_empty()
            || dialect::validate_identifier(table).is_err()
            || dialect::validate_identifier(primary_key).is_err()
            || columns.iter().any(|c| dialect::validate_identifier(c).is_err())
        {
            return false;
        }

        let sql = dialect::update_statement(table, &columns, primary_key);
        let mut params: Vec<CellValue> = record
            .iter()
            .filter(|(c, _)| c.as_str() != primary_key)
            .map(|(_, v)| v.clone())
            .collect();
        params.push(key_value.clone());

        match self.write(&sql, &params).await {
            Ok(_) => true,
            Err(e) => {
                warn!(table, error = %e, "Update failed");
                false
            }
        }
    }

    /// Delete the row whose `id` matches the record's `id`
    pub async fn delete(&mut self, table: &str, record: &Record) -> bool {
        self.delete_by(table, record, "id").await
    }

    pub async fn delete_by(&mut self, table: &str, record: &Record, primary_key: &str) -> bool {
        let Some(key_value) = record.get(primary_key) else {
            debug!(table, primary_key, "Delete record has no key value");
            return false;
        };
        if dialect::validate_identifier(table).is_err()
            || dialect::validate_identifier(primary_key).is_err()
        {
            return false;
        }

        let sql = dialect::delete_statement(table, primary_key);
        match self.write(&sql, std::slice::from_ref(key_value)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(table, error = %e, "Delete failed");
                false
            }
        }
    }

    /// `max(id) + 1`, or 1 for an empty table
    pub async fn get_next_id(&self, table: &str) -> Result<i64, DatabaseError> {
        self.get_next_id_by(table, "id").await
    }

    pub async fn get_next_id_by(&self, table: &str, column: &str) -> Result<i64, DatabaseError> {
        dialect::validate_identifier(table)?;
        dialect::validate_identifier(column)?;
        let sql = dialect::next_id_query(table, column);
        let result = self.conn()?.query(&sql, &[]).await?;
        let max = result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(CellValue::as_i64);
        Ok(max.map_or(1, |m| m + 1))
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        let Ok(conn) = self.conn() else {
            return false;
        };
        let sql = self.native(dialect::table_exists_query(self.database_engine()));
        match conn.query(&sql, &[CellValue::from(name)]).await {
            Ok(result) => result.row_count() > 0,
            Err(e) => {
                warn!(table = name, error = %e, "Table lookup failed");
                false
            }
        }
    }

    /// Begin an explicit transaction. Transactions do not nest; writes
    /// already pending become part of it.
    pub async fn start_transaction(&mut self) -> Result<(), DatabaseError> {
        match self.transaction {
            TransactionState::Explicit => return Err(DatabaseError::TransactionActive),
            TransactionState::Implicit => debug!("Pending writes joined the transaction"),
            TransactionState::Idle => self.conn()?.begin().await?,
        }
        self.transaction = TransactionState::Explicit;
        debug!("Transaction started");
        Ok(())
    }

    /// Commit pending writes; a no-op when nothing is pending
    pub async fn commit(&mut self) -> Result<(), DatabaseError> {
        if self.transaction == TransactionState::Idle {
            debug!("Commit with nothing pending");
            return Ok(());
        }
        self.transaction = TransactionState::Idle;
        self.conn()?.commit().await
    }

    /// Discard pending writes; a no-op when nothing is pending
    pub async fn rollback(&mut self) -> Result<(), DatabaseError> {
        if self.transaction == TransactionState::Idle {
            warn!("Rollback with nothing pending");
            return Ok(());
        }
        self.transaction = TransactionState::Idle;
        self.conn()?.rollback().await
    }

    /// Make sure a live connection is held, reconnecting if needed. Never fails.
    pub async fn check_connected(&mut self) {
        if let Some(conn) = &self.conn {
            if conn.is_alive().await {
                return;
            }
        }

        warn!(engine = %self.database_engine(), "Connection not alive, reconnecting");
        if let Some(stale) = self.conn.take() {
            stale.close().await;
        }
        self.transaction = TransactionState::Idle;

        match self.open().await {
            Ok(conn) => {
                info!(engine = %self.database_engine(), "Database reconnected");
                self.conn = Some(conn);
            }
            Err(e) => {
                error!(engine = %self.database_engine(), error = %e, "Reconnect failed");
            }
        }
    }

    /// Release the connection, discarding uncommitted writes. Safe to call
    /// more than once.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.transaction != TransactionState::Idle {
                warn!(connection = conn.connection_id(), "Closing with uncommitted writes");
            }
            conn.close().await;
            info!(engine = %self.database_engine(), "Database closed");
        }
        self.transaction = TransactionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::DatabaseConfig;
    use crate::db::DatabaseDriver;
    use crate::{record, sql_params};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_db_path() -> PathBuf {
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tina4_database_test_{}_{}.db",
            std::process::id(),
            counter
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn create_test_db() -> Database {
        let path = test_db_path();
        let mut db = Database::connect(&format!("sqlite3:{}", path.display()))
            .await
            .unwrap();
        let created = db
            .execute("CREATE TABLE test_fetch (id INTEGER, name TEXT)", &[])
            .await;
        assert!(created.is_ok());
        db.commit().await.unwrap();
        db
    }

    async fn seed_three_rows(db: &mut Database) {
        db.insert(
            "test_fetch",
            vec![
                record! { "id" => 1, "name" => "Alpha" },
                record! { "id" => 2, "name" => "Beta" },
                record! { "id" => 3, "name" => "Gamma" },
            ],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_connection() {
        let db = create_test_db().await;
        assert_eq!(db.database_engine(), DatabaseType::Sqlite);
        assert_eq!(db.driver_id(), crate::db::types::SQLITE);
        assert!(db.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_connection_string() {
        assert!(matches!(
            Database::connect("invalid_driver:some/connection").await.err(),
            Some(DatabaseError::UnknownEngine(_))
        ));
        assert!(matches!(
            Database::connect("no-separator").await.err(),
            Some(DatabaseError::InvalidConnectionString(_))
        ));
    }

    #[tokio::test]
    async fn test_firebird_reports_missing_driver() {
        match Database::connect("firebird.driver:localhost:/var/db/app.fdb").await {
            Err(DatabaseError::DriverNotFound { engine, .. }) => {
                assert_eq!(engine, DatabaseType::Firebird)
            }
            other => panic!("expected DriverNotFound, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_table_exists() {
        let mut db = create_test_db().await;
        assert!(db.table_exists("test_fetch").await);

        db.execute("DROP TABLE IF EXISTS non_existent_table", &[]).await;
        db.commit().await.unwrap();
        assert!(!db.table_exists("non_existent_table").await);
    }

    #[tokio::test]
    async fn test_fetch_paginates_and_counts_all_rows() {
        let mut db = create_test_db().await;
        let inserted = db
            .insert(
                "test_fetch",
                vec![
                    record! { "id" => 1, "name" => "Alpha" },
                    record! { "id" => 2, "name" => "Beta" },
                    record! { "id" => 3, "name" => "Gamma" },
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted.count, 3);

        let page = db
            .fetch("SELECT * FROM test_fetch ORDER BY id", &[], Some(2), None)
            .await;
        assert!(page.is_ok());
        assert_eq!(page.len(), 2);
        assert_eq!(page.count, 3);
        assert_eq!(page.limit, Some(2));
        assert_eq!(page[0]["name"], CellValue::from("Alpha"));
        assert_eq!(page[1]["name"], CellValue::from("Beta"));

        let second = db
            .fetch("SELECT * FROM test_fetch ORDER BY id", &[], Some(2), Some(2))
            .await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["name"], CellValue::from("Gamma"));

        let all = db.fetch("SELECT id FROM test_fetch", &[], None, None).await;
        assert_eq!(all.count, 3);
        assert_eq!(all.columns, vec!["id"]);
    }

    #[tokio::test]
    async fn test_fetch_skip_without_limit() {
        let mut db = create_test_db().await;
        seed_three_rows(&mut db).await;

        let tail = db
            .fetch("SELECT * FROM test_fetch ORDER BY id", &[], None, Some(2))
            .await;
        assert!(tail.is_ok());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0]["name"], CellValue::from("Gamma"));
        assert_eq!(tail.count, 3);
        assert_eq!(tail.limit, None);
        assert_eq!(tail.skip, Some(2));
    }

    #[tokio::test]
    async fn test_fetch_one() {
        let mut db = create_test_db().await;
        db.insert_one("test_fetch", record! { "id" => 1, "name" => "Alpha" })
            .await
            .unwrap();

        let record = db
            .fetch_one("SELECT * FROM test_fetch WHERE id = ?", &sql_params![1])
            .await
            .unwrap();
        assert_eq!(record["name"], CellValue::from("Alpha"));

        assert!(db
            .fetch_one("SELECT * FROM test_fetch WHERE id = ?", &sql_params![999])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_execute_insert_update_delete() {
        let mut db = create_test_db().await;
        let inserted = db
            .execute(
                "INSERT INTO test_fetch (id, name) VALUES (?, ?)",
                &sql_params![3, "Gamma"],
            )
            .await;
        assert!(inserted.error.is_none());
        assert_eq!(inserted.count, 1);

        let updated = db
            .execute("UPDATE test_fetch SET name = ? WHERE id = ?", &sql_params!["Updated", 3])
            .await;
        assert!(updated.error.is_none());

        let deleted = db
            .execute("DELETE FROM test_fetch WHERE id = ?", &sql_params![3])
            .await;
        assert!(deleted.error.is_none());
        assert_eq!(deleted.count, 1);
    }

    #[tokio::test]
    async fn test_execute_many() {
        let mut db = create_test_db().await;
        let result = db
            .execute_many(
                "INSERT INTO test_fetch (id, name) VALUES (?, ?)",
                &[sql_params![1, "Alpha"], sql_params![2, "Beta"]],
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(result.count, 2);
    }

    #[tokio::test]
    async fn test_invalid_sql_is_reported_as_data() {
        let mut db = create_test_db().await;
        assert!(db.fetch("SELECT * FROM does_not_exist", &[], None, None).await.error.is_some());
        assert!(db.execute("INVALID SQL", &[]).await.error.is_some());
        assert!(db.fetch_one("SELECT * FROM does_not_exist", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let mut db = create_test_db().await;

        db.start_transaction().await.unwrap();
        db.insert("test_fetch", record! { "id" => 4, "name" => "Temp" }).await.unwrap();
        db.commit().await.unwrap();
        let record = db.fetch_one("SELECT * FROM test_fetch WHERE id = 4", &[]).await.unwrap();
        assert_eq!(record["name"], CellValue::from("Temp"));

        db.start_transaction().await.unwrap();
        assert!(matches!(
            db.start_transaction().await.unwrap_err(),
            DatabaseError::TransactionActive
        ));
        db.insert("test_fetch", record! { "id" => 5, "name" => "ShouldNotExist" })
            .await
            .unwrap();
        db.rollback().await.unwrap();
        assert!(db.fetch_one("SELECT * FROM test_fetch WHERE id = 5", &[]).await.is_none());
        assert!(!db.in_transaction());
    }

    #[tokio::test]
    async fn test_writes_wait_for_commit() {
        let mut db = create_test_db().await;
        assert!(!db.in_transaction());

        let inserted = db
            .execute("INSERT INTO test_fetch (id, name) VALUES (?, ?)", &sql_params![1, "x"])
            .await;
        assert!(inserted.is_ok());
        assert!(db.in_transaction());
        db.rollback().await.unwrap();
        assert!(db
            .fetch_one("SELECT * FROM test_fetch WHERE id = ?", &sql_params![1])
            .await
            .is_none());

        db.insert_one("test_fetch", record! { "id" => 2, "name" => "Kept" })
            .await
            .unwrap();
        db.start_transaction().await.unwrap();
        db.insert_one("test_fetch", record! { "id" => 3, "name" => "AlsoKept" })
            .await
            .unwrap();
        db.commit().await.unwrap();
        assert!(!db.in_transaction());
        assert_eq!(db.get_next_id("test_fetch").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_commit_survives_reopen() {
        let mut db = create_test_db().await;
        db.insert_one("test_fetch", record! { "id" => 1, "name" => "Durable" })
            .await
            .unwrap();
        db.commit().await.unwrap();
        db.insert_one("test_fetch", record! { "id" => 2, "name" => "Pending" })
            .await
            .unwrap();

        db.close().await;
        db.check_connected().await;
        assert!(db.is_connected());
        assert!(!db.in_transaction());

        let durable = db
            .fetch_one("SELECT name FROM test_fetch WHERE id = ?", &sql_params![1])
            .await
            .unwrap();
        assert_eq!(durable["name"], CellValue::from("Durable"));
        assert!(db
            .fetch_one("SELECT name FROM test_fetch WHERE id = ?", &sql_params![2])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_check_connected_keeps_live_connection() {
        let mut db = create_test_db().await;
        db.insert_one("test_fetch", record! { "id" => 1, "name" => "Pending" })
            .await
            .unwrap();

        db.check_connected().await;
        assert!(db.in_transaction());
        assert!(db
            .fetch_one("SELECT * FROM test_fetch WHERE id = ?", &sql_params![1])
            .await
            .is_some());
        db.rollback().await.unwrap();
        assert!(db
            .fetch_one("SELECT * FROM test_fetch WHERE id = ?", &sql_params![1])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_datetime_reads_back_as_iso_text() {
        let mut db = create_test_db().await;
        db.execute("CREATE TABLE test_dates (id INTEGER, created TIMESTAMP)", &[]).await;
        let now = chrono::Local::now().naive_local();
        let result = db
            .execute(
                "INSERT INTO test_dates (id, created) VALUES (?, ?)",
                &sql_params![1, now],
            )
            .await;
        assert!(result.is_ok());

        let record = db
            .fetch_one("SELECT * FROM test_dates WHERE id = ?", &sql_params![1])
            .await
            .unwrap();
        assert!(record["created"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_insert_update_delete_helpers() {
        let mut db = create_test_db().await;
        let result = db
            .insert("test_fetch", record! { "id" => 6, "name" => "InsertAPI" })
            .await
            .unwrap();
        assert!(result.error.is_none());

        assert!(db.update("test_fetch", &record! { "id" => 6, "name" => "UpdatedAPI" }).await);
        let record = db.fetch_one("SELECT name FROM test_fetch WHERE id = 6", &[]).await.unwrap();
        assert_eq!(record["name"], CellValue::from("UpdatedAPI"));

        assert!(db.delete("test_fetch", &record! { "id" => 6 }).await);
        assert!(db.fetch_one("SELECT * FROM test_fetch WHERE id = 6", &[]).await.is_none());

        // zero matching rows is still a successful statement
        assert!(db.update("test_fetch", &record! { "id" => 999, "name" => "Ghost" }).await);
        assert!(db.delete("test_fetch", &record! { "id" => 999 }).await);

        // no key, nothing to target
        assert!(!db.update("test_fetch", &record! { "name" => "NoKey" }).await);
        assert!(!db.delete_by("test_fetch", &record! { "id" => 1 }, "name").await);
    }

    #[tokio::test]
    async fn test_insert_rejects_malformed_input() {
        let mut db = create_test_db().await;
        assert!(db.insert_json("test_fetch", json!("invalid_input")).await.is_none());
        assert!(db.insert_json("test_fetch", json!([{"id": 1}, 2])).await.is_none());
        assert!(db.insert("test_fetch", Record::new()).await.is_none());
        assert!(db.insert("test_fetch", Vec::<Record>::new()).await.is_none());
        assert!(db.insert("test_fetch; DROP", record! { "id" => 1 }).await.is_none());
        assert!(db.insert("test_fetch", record! { "bad col" => 1 }).await.is_none());

        let from_json = db
            .insert_json("test_fetch", json!([{"id": 7, "name": "Json"}]))
            .await
            .unwrap();
        assert_eq!(from_json.count, 1);
    }

    #[tokio::test]
    async fn test_get_next_id() {
        let mut db = create_test_db().await;
        db.execute("CREATE TABLE next_id_test (id INTEGER PRIMARY KEY)", &[]).await;
        assert_eq!(db.get_next_id("next_id_test").await.unwrap(), 1);

        db.insert("next_id_test", record! { "id" => 10 }).await.unwrap();
        assert_eq!(db.get_next_id("next_id_test").await.unwrap(), 11);

        db.execute("DELETE FROM next_id_test", &[]).await;
        assert_eq!(db.get_next_id("next_id_test").await.unwrap(), 1);
        assert!(db.get_next_id("missing_table").await.is_err());
    }

    #[tokio::test]
    async fn test_close_and_check_connected() {
        let mut db = create_test_db().await;
        db.close().await;
        db.close().await;
        assert!(!db.is_connected());

        let result = db.fetch("SELECT * FROM test_fetch", &[], None, None).await;
        assert_eq!(result.error(), Some(DatabaseError::Closed.to_string().as_str()));
        assert!(!db.update("test_fetch", &record! { "id" => 1, "name" => "x" }).await);

        db.check_connected().await;
        assert!(db.is_connected());
        assert!(db.table_exists("test_fetch").await);
    }

    struct UnreachableDriver;

    #[async_trait::async_trait]
    impl DatabaseDriver for UnreachableDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }

        async fn connect(&self, _config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(UnreachableDriver)).await;
        let result =
            Database::connect_with_registry("sqlite3::memory:", None, None, Arc::new(registry)).await;
        assert!(matches!(result.err(), Some(DatabaseError::ConnectionFailed(_))));
    }
}
