//! Driver abstraction over the supported dialects.
//!
//! Each dialect lives in its own module and implements [`DatabaseDriver`];
//! quoting, pagination, catalog queries and error classification stay inside
//! the variant. MySQL and MariaDB share one implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Column, Either, Row, TypeInfo};
use tracing::{debug, warn};

use crate::config::PoolSettings;
use crate::error::{CoreError, Result, SqlErrorKind};
use crate::models::{
    ColumnMetadata, ConnectionTestResult, DatabaseConnection, DbType, FieldDescriptor, TableInfo,
};

pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

/// Raw result of running one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    Rows {
        fields: Vec<FieldDescriptor>,
        rows: Vec<Vec<Value>>,
    },
    Affected(u64),
}

/// Columns of one table plus anything that could not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDescription {
    pub columns: Vec<ColumnMetadata>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Open physical connections.
    pub size: u32,
    /// Connections sitting idle in the pool.
    pub idle: u32,
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn db_type(&self) -> DbType;
    async fn list_tables(&self) -> Result<Vec<TableInfo>>;
    async fn describe_table(&self, table: &str) -> Result<TableDescription>;
    /// Run arbitrary SQL; `limit` caps the number of rows collected.
    async fn run_query(&self, sql: &str, limit: Option<usize>) -> Result<StatementOutput>;
    /// `SELECT *` over a table with bound limit/offset parameters.
    async fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<StatementOutput>;
    async fn count_rows(&self, table: &str) -> Result<u64>;
    async fn ping(&self) -> Result<()>;
    fn pool_status(&self) -> PoolStatus;
    async fn close(&self);
}

/// Builds pooled drivers for connection records.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(
        &self,
        conn: &DatabaseConnection,
        pool: &PoolSettings,
    ) -> Result<Arc<dyn DatabaseDriver>>;
}

/// Factory for the real dialect drivers. Pools are created lazily; the first
/// physical connection is opened by the first statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDriverFactory;

#[async_trait]
impl DriverFactory for NativeDriverFactory {
    async fn connect(
        &self,
        conn: &DatabaseConnection,
        pool: &PoolSettings,
    ) -> Result<Arc<dyn DatabaseDriver>> {
        conn.validate()?;
        let driver: Arc<dyn DatabaseDriver> = match conn.db_type {
            DbType::Postgres => Arc::new(postgres::PostgresDriver::connect_lazy(conn, pool)),
            DbType::Mysql | DbType::Mariadb => {
                Arc::new(mysql::MySqlDriver::connect_lazy(conn, pool))
            }
            DbType::Mssql => Arc::new(mssql::MssqlDriver::connect_lazy(conn, pool)),
            DbType::Sqlite => Arc::new(sqlite::SqliteDriver::connect_lazy(conn, pool)?),
        };
        Ok(driver)
    }
}

/// Check a connection record without registering it.
///
/// Never fails: every problem is reported through `ok = false`.
pub async fn test_connection(
    factory: &dyn DriverFactory,
    conn: &DatabaseConnection,
    timeout: Duration,
) -> ConnectionTestResult {
    let conn = conn.clone().with_default_port();
    if let Err(e) = conn.validate() {
        return ConnectionTestResult::failed(e.to_string());
    }

    let check_pool = PoolSettings {
        max_connections: 1,
        acquire_timeout_secs: timeout.as_secs().max(1),
        ..PoolSettings::default()
    };

    let driver = match factory.connect(&conn, &check_pool).await {
        Ok(driver) => driver,
        Err(e) => return ConnectionTestResult::failed(e.to_string()),
    };

    let outcome = tokio::time::timeout(timeout, driver.ping()).await;
    driver.close().await;

    match outcome {
        Ok(Ok(())) => {
            debug!("Connection test succeeded: {}", conn.display_target());
            ConnectionTestResult::ok(format!("Connected to {}", conn.display_target()))
        }
        Ok(Err(e)) => {
            warn!("Connection test failed for {}: {}", conn.display_target(), e);
            ConnectionTestResult::failed(e.to_string())
        }
        Err(_) => ConnectionTestResult::failed(format!(
            "Connection to {} timed out after {:?}",
            conn.display_target(),
            timeout
        )),
    }
}

/// Key/index membership gathered by a dialect's secondary catalog query.
#[derive(Debug, Default)]
pub(crate) struct KeyFlags {
    primary: HashSet<String>,
    unique: HashSet<String>,
    indexed: HashSet<String>,
    foreign: HashSet<String>,
}

impl KeyFlags {
    /// Record one `(column, kind)` row; kind is primary, unique, index or foreign.
    pub(crate) fn mark(&mut self, column: String, kind: &str) {
        match kind {
            "primary" => {
                self.indexed.insert(column.clone());
                self.primary.insert(column);
            }
            "unique" => {
                self.indexed.insert(column.clone());
                self.unique.insert(column);
            }
            "foreign" => {
                self.foreign.insert(column);
            }
            _ => {
                self.indexed.insert(column);
            }
        }
    }

    pub(crate) fn apply(&self, columns: &mut [ColumnMetadata]) {
        for col in columns {
            col.is_primary |= self.primary.contains(&col.name);
            col.is_unique |= self.unique.contains(&col.name);
            col.is_index |= self.indexed.contains(&col.name) || col.is_primary;
            col.is_foreign |= self.foreign.contains(&col.name);
        }
    }
}

/// Make result column names unique (`id`, `id_1`, ...) so rows keyed by name
/// keep one entry per field.
pub(crate) fn dedupe_field_names(fields: &mut [FieldDescriptor]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let taken: HashSet<String> = fields.iter().map(|f| f.name.clone()).collect();
    for field in fields.iter_mut() {
        let count = seen.entry(field.name.clone()).or_insert(0);
        if *count > 0 {
            let mut candidate = format!("{}_{}", field.name, count);
            while taken.contains(&candidate) {
                *count += 1;
                candidate = format!("{}_{}", field.name, count);
            }
            *count += 1;
            field.name = candidate;
        } else {
            *count = 1;
        }
    }
}

/// Split `schema.table` into its parts, rejecting empty segments.
pub(crate) fn split_qualified(name: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = name.split('.').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(CoreError::Validation(format!("invalid table name '{}'", name)));
    }
    Ok(parts)
}

/// Leading keyword of a statement, upper-cased, skipping comments.
pub(crate) fn leading_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = stripped.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = stripped.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            break;
        }
    }
    rest.split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
        .to_uppercase()
}

/// Map a sqlx error onto the taxonomy, keeping the database's own message.
pub(crate) fn sqlx_error(
    err: sqlx::Error,
    classify: impl Fn(&dyn sqlx::error::DatabaseError) -> SqlErrorKind,
) -> CoreError {
    let kind = match &err {
        sqlx::Error::Database(db_err) => classify(db_err.as_ref()),
        sqlx::Error::PoolTimedOut => SqlErrorKind::Timeout,
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SqlErrorKind::ConnectionLost,
        _ => SqlErrorKind::Other,
    };
    let message = match &err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        other => other.to_string(),
    };
    CoreError::sql(kind, message)
}

/// Stream one raw statement through a sqlx pool, collecting at most `limit`
/// rows. A statement that returns no rows is described so an empty SELECT
/// still reports its columns; anything else counts as affected rows.
pub(crate) async fn run_statement<'p, DB>(
    pool: &'p sqlx::Pool<DB>,
    sql: &'p str,
    limit: Option<usize>,
    map_value: fn(&DB::Row, usize) -> Value,
    rows_affected: fn(&DB::QueryResult) -> u64,
) -> std::result::Result<StatementOutput, sqlx::Error>
where
    DB: sqlx::Database,
    &'p sqlx::Pool<DB>: sqlx::Executor<'p, Database = DB>,
{
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut affected_rows = 0;
    let mut fields = Vec::new();
    let mut saw_rows = false;

    let mut stream = sqlx::raw_sql(sql).fetch_many(pool);
    while let Some(result) = stream.next().await {
        match result? {
            Either::Left(res) => {
                affected_rows += rows_affected(&res);
            }
            Either::Right(row) => {
                if !saw_rows {
                    saw_rows = true;
                    fields = row_fields(&row);
                }
                if limit.map_or(true, |l| rows.len() < l) {
                    rows.push((0..row.columns().len()).map(|i| map_value(&row, i)).collect());
                } else {
                    break;
                }
            }
        }
    }
    // release the connection before describing
    drop(stream);

    if saw_rows {
        return Ok(StatementOutput::Rows { fields, rows });
    }

    let described = describe_fields(pool, sql).await;
    if !described.is_empty() {
        return Ok(StatementOutput::Rows {
            fields: described,
            rows,
        });
    }

    Ok(StatementOutput::Affected(affected_rows))
}

/// Columns the server reports for a prepared statement. Empty when the
/// statement returns nothing or cannot be described.
pub(crate) async fn describe_fields<'p, DB>(
    pool: &'p sqlx::Pool<DB>,
    sql: &'p str,
) -> Vec<FieldDescriptor>
where
    DB: sqlx::Database,
    &'p sqlx::Pool<DB>: sqlx::Executor<'p, Database = DB>,
{
    match sqlx::Executor::describe(pool, sql).await {
        Ok(described) => column_fields(described.columns()),
        Err(e) => {
            debug!("Could not describe statement: {}", e);
            Vec::new()
        }
    }
}

pub(crate) fn row_fields<R: Row>(row: &R) -> Vec<FieldDescriptor> {
    column_fields(row.columns())
}

fn column_fields<C: Column>(columns: &[C]) -> Vec<FieldDescriptor> {
    columns
        .iter()
        .map(|c| FieldDescriptor {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
        })
        .collect()
}

/// Render raw bytes for a JSON cell: text when valid UTF-8, a size tag otherwise.
pub(crate) fn bytes_to_json(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> FieldDescriptor {
        FieldDescriptor {
            name: name.into(),
            type_name: "TEXT".into(),
        }
    }

    #[test]
    fn test_dedupe_field_names() {
        let mut fields = vec![field("id"), field("name"), field("id"), field("id_1")];
        dedupe_field_names(&mut fields);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "id_2", "id_1"]);
    }

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  select 1"), "SELECT");
        assert_eq!(leading_keyword("-- note\nUPDATE t SET a = 1"), "UPDATE");
        assert_eq!(leading_keyword("/* x */ with cte as (select 1) select * from cte"), "WITH");
        assert_eq!(leading_keyword(""), "");
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("users").unwrap(), vec!["users"]);
        assert_eq!(split_qualified("dbo.users").unwrap(), vec!["dbo", "users"]);
        assert!(split_qualified("a..b").is_err());
        assert!(split_qualified("a.b.c").is_err());
    }

    #[test]
    fn test_key_flags_apply() {
        let mut flags = KeyFlags::default();
        flags.mark("id".into(), "primary");
        flags.mark("email".into(), "unique");
        flags.mark("org_id".into(), "index");
        flags.mark("org_id".into(), "foreign");

        let mut cols = vec![
            ColumnMetadata::new("id", "int"),
            ColumnMetadata::new("email", "varchar(100)"),
            ColumnMetadata::new("org_id", "int"),
            ColumnMetadata::new("note", "text"),
        ];
        flags.apply(&mut cols);

        assert!(cols[0].is_primary && cols[0].is_index);
        assert!(cols[1].is_unique && cols[1].is_index);
        assert!(cols[2].is_foreign && cols[2].is_index && !cols[2].is_unique);
        assert!(!cols[3].is_index && !cols[3].is_primary);
    }

    #[test]
    fn test_bytes_to_json() {
        assert_eq!(bytes_to_json(b"abc"), Value::String("abc".into()));
        assert_eq!(bytes_to_json(&[0xff, 0xfe]), Value::String("<2 bytes>".into()));
    }
}
