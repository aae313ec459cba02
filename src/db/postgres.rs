use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgQueryResult, PgRow, PgSslMode};
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::PoolSettings;
use crate::db::{
    bytes_to_json, describe_fields, row_fields, run_statement, sqlx_error, split_qualified,
    DatabaseDriver, KeyFlags, PoolStatus, StatementOutput, TableDescription,
};
use crate::error::{CoreError, Result, SqlErrorKind};
use crate::models::{ColumnMetadata, DatabaseConnection, DbType, TableInfo};

pub struct PostgresDriver {
    pool: sqlx::PgPool,
}

impl PostgresDriver {
    pub fn connect_lazy(config: &DatabaseConnection, settings: &PoolSettings) -> Self {
        let mut options = PgConnectOptions::new()
            .host(config.host.as_deref().unwrap_or("localhost"))
            .port(config.port_or_default())
            .username(config.username.as_deref().unwrap_or_default())
            .password(config.password_str())
            .ssl_mode(if config.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });
        if let Some(database) = &config.database {
            options = options.database(database);
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .idle_timeout(settings.idle_timeout())
            .connect_lazy_with(options);

        info!("Created PostgreSQL pool for {}", config.display_target());
        Self { pool }
    }
}

fn pg_error(err: sqlx::Error) -> CoreError {
    sqlx_error(err, |db_err| {
        let code = db_err.code().unwrap_or_default();
        match code.as_ref() {
            "42601" => SqlErrorKind::Syntax,
            "42501" | "28000" | "28P01" => SqlErrorKind::Permission,
            "57014" => SqlErrorKind::Timeout,
            "57P01" | "57P02" | "57P03" => SqlErrorKind::ConnectionLost,
            c if c.starts_with("08") => SqlErrorKind::ConnectionLost,
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
    SELECT
        a.attname::text AS column_name,
        format_type(a.atttypid, a.atttypmod) AS data_type,
        NOT a.attnotnull AS nullable,
        pg_get_expr(d.adbin, d.adrelid) AS default_value,
        (a.attidentity <> '' OR COALESCE(pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%') AS is_identity,
        COALESCE(col_description(c.oid, a.attnum), '') AS comment
    FROM pg_attribute a
    JOIN pg_class c ON a.attrelid = c.oid
    JOIN pg_namespace n ON c.relnamespace = n.oid
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = current_schema() AND c.relname = $1
      AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const KEYS_SQL: &str = r#"
    SELECT
        a.attname::text AS column_name,
        CASE WHEN i.indisprimary THEN 'primary'
             WHEN i.indisunique THEN 'unique'
             ELSE 'index' END AS kind
    FROM pg_index i
    JOIN pg_class c ON c.oid = i.indrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey::int[])
    WHERE n.nspname = current_schema() AND c.relname = $1
    UNION ALL
    SELECT a.attname::text, 'foreign'
    FROM pg_constraint f
    JOIN pg_class c ON c.oid = f.conrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(f.conkey)
    WHERE f.contype = 'f' AND n.nspname = current_schema() AND c.relname = $1
"#;

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT c.relname::text AS table_name, \
             COALESCE(obj_description(c.oid, 'pg_class'), '') AS table_comment \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p') \
             ORDER BY c.relname",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error)?;

        Ok(rows
            .iter()
            .map(|row| TableInfo {
                table_name: row.get("table_name"),
                table_comment: row.get("table_comment"),
            })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::introspection(table, pg_error(e)))?;

        if rows.is_empty() {
            return Err(CoreError::introspection(table, "table not found"));
        }

        let mut columns: Vec<ColumnMetadata> = rows
            .iter()
            .map(|row| ColumnMetadata {
                name: row.get("column_name"),
                native_type: row.get("data_type"),
                nullable: row.get("nullable"),
                default_value: row.try_get("default_value").ok().flatten(),
                is_primary: false,
                is_unique: false,
                is_index: false,
                is_foreign: false,
                is_auto_increment: row.get("is_identity"),
                comment: row.get("comment"),
            })
            .collect();

        let mut warnings = Vec::new();
        match sqlx::query(KEYS_SQL).bind(table).fetch_all(&self.pool).await {
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
                pg_error(e)
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
            map_postgres_value,
            PgQueryResult::rows_affected,
        )
        .await
        .map_err(pg_error)
    }

    async fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<StatementOutput> {
        let sql = format!("SELECT * FROM {} LIMIT $1 OFFSET $2", quote_ident(table)?);
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(pg_error)?;

        let fields = match rows.first() {
            Some(row) => row_fields(row),
            // past the end or an empty table
            None => describe_fields(&self.pool, &sql).await,
        };
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| map_postgres_value(row, i))
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
            .map_err(pg_error)?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Connection(pg_error(e).to_string()))?;
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

fn map_postgres_value(row: &PgRow, index: usize) -> serde_json::Value {
    let value_ref = match row.try_get_raw(index) {
        Ok(v) => v,
        Err(_) => return serde_json::Value::Null,
    };

    if value_ref.is_null() {
        return serde_json::Value::Null;
    }

    let type_info = value_ref.type_info();
    let type_name = type_info.name();

    match type_name {
        "BOOL" => {
            let v: Option<bool> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT2" => {
            let v: Option<i16> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT4" => {
            let v: Option<i32> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT8" => {
            let v: Option<i64> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "FLOAT4" => {
            let v: Option<f32> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "FLOAT8" => {
            let v: Option<f64> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "BPCHAR" => {
            let v: Option<String> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "UUID" => {
            let v: Option<uuid::Uuid> = row.try_get(index).ok();
            serde_json::json!(v.map(|u| u.to_string()))
        }
        "TIMESTAMPTZ" => {
            let v: Option<DateTime<Utc>> = row.try_get(index).ok();
            serde_json::json!(v.map(|t| t.to_rfc3339()))
        }
        "TIMESTAMP" => {
            let v: Option<NaiveDateTime> = row.try_get(index).ok();
            serde_json::json!(v.map(|t| t.to_string()))
        }
        "DATE" => {
            let v: Option<NaiveDate> = row.try_get(index).ok();
            serde_json::json!(v.map(|d| d.to_string()))
        }
        "TIME" => {
            let v: Option<NaiveTime> = row.try_get(index).ok();
            serde_json::json!(v.map(|t| t.to_string()))
        }
        "NUMERIC" => {
            let v: Option<sqlx::types::BigDecimal> = row.try_get(index).ok();
            serde_json::json!(v.map(|d| d.to_string()))
        }
        "MONEY" => {
            // MONEY is a 64-bit integer count of cents on the wire
            match value_ref.as_bytes() {
                Ok(bytes) if bytes.len() == 8 => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    let cents = i64::from_be_bytes(buf);
                    serde_json::Value::String(format!("{:.2}", cents as f64 / 100.0))
                }
                Ok(bytes) => bytes_to_json(bytes),
                Err(_) => serde_json::Value::Null,
            }
        }
        "JSON" | "JSONB" => {
            let v: Option<serde_json::Value> = row.try_get(index).ok();
            v.unwrap_or(serde_json::Value::Null)
        }
        "BYTEA" => {
            let v: Option<Vec<u8>> = row.try_get(index).ok();
            v.map(|b| bytes_to_json(&b)).unwrap_or(serde_json::Value::Null)
        }
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "_text" | "_varchar" => {
            let v: Option<Vec<String>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT4[]" | "_int4" => {
            let v: Option<Vec<i32>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT8[]" | "_int8" => {
            let v: Option<Vec<i64>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "BOOL[]" | "_bool" => {
            let v: Option<Vec<bool>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        _ => {
            let v_str: Option<String> = row.try_get(index).ok();
            if let Some(s) = v_str {
                serde_json::Value::String(s)
            } else {
                match value_ref.as_bytes() {
                    Ok(bytes) => bytes_to_json(bytes),
                    Err(_) => serde_json::Value::String(format!("<{}>", type_name)),
                }
            }
        }
    }
}
