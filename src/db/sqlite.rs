//! SQLite driver. File-based; the database must already exist.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{Row, ValueRef};
use tracing::{debug, info};

use crate::config::PoolSettings;
use crate::db::{
    bytes_to_json, describe_fields, row_fields, run_statement, sqlx_error, split_qualified,
    DatabaseDriver, KeyFlags, PoolStatus, StatementOutput, TableDescription,
};
use crate::error::{CoreError, Result, SqlErrorKind};
use crate::models::{ColumnMetadata, DatabaseConnection, DbType, TableInfo};

pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    pub fn connect_lazy(config: &DatabaseConnection, settings: &PoolSettings) -> Result<Self> {
        let filename = config
            .filename
            .as_deref()
            .ok_or_else(|| CoreError::Validation("sqlite connections require a filename".into()))?;

        if !Path::new(filename).exists() {
            return Err(CoreError::Connection(format!(
                "database file {} does not exist",
                filename
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(filename)
            .create_if_missing(false)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .idle_timeout(settings.idle_timeout())
            .connect_lazy_with(options);

        info!("Created sqlite pool for {}", config.display_target());
        Ok(Self { pool })
    }
}

fn sqlite_error(err: sqlx::Error) -> CoreError {
    sqlx_error(err, |db_err| {
        if db_err.message().contains("syntax error") {
            return SqlErrorKind::Syntax;
        }
        // extended result codes carry the primary code in the low byte
        let primary = db_err
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|c| c & 0xff)
            .unwrap_or_default();
        match primary {
            3 | 8 | 23 => SqlErrorKind::Permission,
            5 | 6 => SqlErrorKind::Timeout,
            14 | 26 => SqlErrorKind::ConnectionLost,
            _ => SqlErrorKind::Other,
        }
    })
}

fn quote_ident(name: &str) -> Result<String> {
    Ok(split_qualified(name)?
        .into_iter()
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join("."))
}

const COLUMNS_SQL: &str = r#"
    SELECT name, type, "notnull", dflt_value, pk
    FROM pragma_table_info(?1)
    ORDER BY cid
"#;

const KEYS_SQL: &str = r#"
    SELECT ii.name AS column_name,
        CASE WHEN il.origin = 'pk' THEN 'primary'
             WHEN il."unique" = 1 THEN 'unique'
             ELSE 'index' END AS kind
    FROM pragma_index_list(?1) AS il, pragma_index_info(il.name) AS ii
    WHERE ii.name IS NOT NULL
    UNION ALL
    SELECT "from" AS column_name, 'foreign' AS kind
    FROM pragma_foreign_key_list(?1)
"#;

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlite_error)?;

        // SQLite has no table comments
        Ok(rows
            .iter()
            .map(|row| TableInfo {
                table_name: row.get("name"),
                table_comment: String::new(),
            })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let rows: Vec<SqliteRow> = sqlx::query(COLUMNS_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::introspection(table, sqlite_error(e)))?;

        if rows.is_empty() {
            return Err(CoreError::introspection(table, "table not found"));
        }

        let pk_count = rows
            .iter()
            .filter(|row| row.get::<i64, _>("pk") > 0)
            .count();

        let mut columns: Vec<ColumnMetadata> = rows
            .iter()
            .map(|row| {
                let native_type: String = row.try_get("type").unwrap_or_default();
                let is_primary = row.get::<i64, _>("pk") > 0;
                // a lone INTEGER primary key aliases the rowid
                let is_auto_increment =
                    is_primary && pk_count == 1 && native_type.eq_ignore_ascii_case("integer");
                ColumnMetadata {
                    name: row.get("name"),
                    nullable: row.get::<i64, _>("notnull") == 0 && !is_primary,
                    default_value: row.try_get("dflt_value").ok().flatten(),
                    is_primary,
                    is_unique: false,
                    is_index: is_primary,
                    is_foreign: false,
                    is_auto_increment,
                    comment: String::new(),
                    native_type,
                }
            })
            .collect();

        let mut warnings = Vec::new();
        match sqlx::query(KEYS_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await
        {
            Ok(key_rows) => {
                let mut flags = KeyFlags::default();
                for row in &key_rows {
                    flags.mark(row.get("column_name"), row.get::<&str, _>("kind"));
                }
                flags.apply(&mut columns);
            }
            Err(e) => warnings.push(format!(
                "key metadata for {} unavailable: {}",
                table,
                sqlite_error(e)
            )),
        }

        debug!("Described {} ({} columns)", table, columns.len());
        Ok(TableDescription { columns, warnings })
    }

    async fn run_query(&self, sql: &str, limit: Option<usize>) -> Result<StatementOutput> {
        run_statement(
            &self.pool,
            sql,
            limit,
            map_sqlite_value,
            SqliteQueryResult::rows_affected,
        )
        .await
        .map_err(sqlite_error)
    }

    async fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<StatementOutput> {
        let sql = format!("SELECT * FROM {} LIMIT ?1 OFFSET ?2", quote_ident(table)?);
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlite_error)?;

        let fields = match rows.first() {
            Some(row) => row_fields(row),
            // past the end or an empty table
            None => describe_fields(&self.pool, &sql).await,
        };
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| map_sqlite_value(row, i))
                    .collect()
            })
            .collect();
        Ok(StatementOutput::Rows { fields, rows })
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlite_error)?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Connection(sqlite_error(e).to_string()))?;
        Ok(())
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite is dynamically typed, so decode by storage class rather than the
/// declared column type.
fn map_sqlite_value(row: &SqliteRow, index: usize) -> serde_json::Value {
    match row.try_get_raw(index) {
        Ok(v) if !v.is_null() => {}
        _ => return serde_json::Value::Null,
    }

    if let Ok(v) = row.try_get::<i64, _>(index) {
        serde_json::json!(v)
    } else if let Ok(v) = row.try_get::<f64, _>(index) {
        serde_json::json!(v)
    } else if let Ok(v) = row.try_get::<String, _>(index) {
        serde_json::Value::String(v)
    } else if let Ok(bytes) = row.try_get::<Vec<u8>, _>(index) {
        bytes_to_json(&bytes)
    } else {
        serde_json::Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionStatus;

    async fn seeded_driver(dir: &tempfile::TempDir) -> SqliteDriver {
        let path = dir.path().join("app.db");
        let setup = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true),
            )
            .await
            .unwrap();
        sqlx::raw_sql(
            "CREATE TABLE org (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);
             CREATE TABLE member (
                 id INTEGER PRIMARY KEY,
                 org_id INTEGER REFERENCES org(id),
                 email VARCHAR(120) NOT NULL,
                 score REAL DEFAULT 0,
                 avatar BLOB
             );
             CREATE INDEX idx_member_email ON member(email);
             INSERT INTO org (id, name) VALUES (1, 'acme');
             INSERT INTO member (org_id, email, score) VALUES (1, 'a@acme.io', 1.5);",
        )
        .execute(&setup)
        .await
        .unwrap();
        setup.close().await;

        let conn = DatabaseConnection {
            id: "local".into(),
            name: "local".into(),
            db_type: DbType::Sqlite,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            filename: Some(path.to_string_lossy().into_owned()),
            ssl: false,
            status: ConnectionStatus::Enabled,
            is_system: false,
        };
        SqliteDriver::connect_lazy(&conn, &PoolSettings::default()).unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("main.users").unwrap(), "\"main\".\"users\"");
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let conn = DatabaseConnection {
            id: "x".into(),
            name: "x".into(),
            db_type: DbType::Sqlite,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            filename: Some(dir.path().join("nope.db").to_string_lossy().into_owned()),
            ssl: false,
            status: ConnectionStatus::Enabled,
            is_system: false,
        };
        let err = SqliteDriver::connect_lazy(&conn, &PoolSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Connection(_)));
    }

    #[tokio::test]
    async fn test_describe_table_flags() {
        let dir = tempfile::tempdir().unwrap();
        let driver = seeded_driver(&dir).await;

        let desc = driver.describe_table("member").await.unwrap();
        assert!(desc.warnings.is_empty());
        let by_name = |n: &str| desc.columns.iter().find(|c| c.name == n).unwrap();

        let id = by_name("id");
        assert!(id.is_primary && id.is_auto_increment && !id.nullable);
        assert!(by_name("org_id").is_foreign);
        let email = by_name("email");
        assert!(email.is_index && !email.is_unique && !email.nullable);
        assert_eq!(email.native_type, "VARCHAR(120)");
        assert_eq!(by_name("score").default_value.as_deref(), Some("0"));

        let org = driver.describe_table("org").await.unwrap();
        assert!(org.columns.iter().any(|c| c.name == "name" && c.is_unique));
    }

    #[tokio::test]
    async fn test_describe_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let driver = seeded_driver(&dir).await;
        let err = driver.describe_table("ghost").await.unwrap_err();
        assert!(matches!(err, CoreError::SchemaIntrospection { .. }));
    }

    #[tokio::test]
    async fn test_run_query_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        let driver = seeded_driver(&dir).await;

        let tables = driver.list_tables().await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["member", "org"]);

        match driver
            .run_query("SELECT id, email, score FROM member", Some(10))
            .await
            .unwrap()
        {
            StatementOutput::Rows { fields, rows } => {
                assert_eq!(fields.len(), 3);
                assert_eq!(rows[0][1], serde_json::json!("a@acme.io"));
                assert_eq!(rows[0][2], serde_json::json!(1.5));
            }
            other => panic!("expected rows, got {:?}", other),
        }

        let affected = driver
            .run_query("UPDATE member SET score = 2 WHERE org_id = 1", None)
            .await
            .unwrap();
        assert_eq!(affected, StatementOutput::Affected(1));

        assert_eq!(driver.count_rows("member").await.unwrap(), 1);
        match driver.fetch_page("member", 10, 1).await.unwrap() {
            StatementOutput::Rows { fields, rows } => {
                assert!(rows.is_empty());
                let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, vec!["id", "org_id", "email", "score", "avatar"]);
            }
            other => panic!("expected rows, got {:?}", other),
        }

        let err = driver.run_query("SELEC 1", None).await.unwrap_err();
        assert_eq!(err.sql_kind(), Some(SqlErrorKind::Syntax));
    }
}
