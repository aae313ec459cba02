//! MySQL and MariaDB driver. Both speak the same protocol and catalog; the
//! flavor is only carried for reporting.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{
    MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlQueryResult,
    MySqlRow, MySqlSslMode,
};
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::PoolSettings;
use crate::db::{
    bytes_to_json, describe_fields, row_fields, run_statement, sqlx_error, split_qualified,
    DatabaseDriver, KeyFlags, PoolStatus, StatementOutput, TableDescription,
};
use crate::error::{CoreError, Result, SqlErrorKind};
use crate::models::{ColumnMetadata, DatabaseConnection, DbType, TableInfo};

pub struct MySqlDriver {
    pool: MySqlPool,
    flavor: DbType,
}

impl MySqlDriver {
    pub fn connect_lazy(config: &DatabaseConnection, settings: &PoolSettings) -> Self {
        let mut options = MySqlConnectOptions::new()
            .host(config.host.as_deref().unwrap_or("localhost"))
            .port(config.port_or_default())
            .username(config.username.as_deref().unwrap_or_default())
            .password(config.password_str())
            .ssl_mode(if config.ssl {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Preferred
            });
        if let Some(database) = &config.database {
            options = options.database(database);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .idle_timeout(settings.idle_timeout())
            .connect_lazy_with(options);

        info!(
            "Created {} pool for {}",
            config.db_type,
            config.display_target()
        );
        Self {
            pool,
            flavor: config.db_type,
        }
    }
}

fn mysql_error(err: sqlx::Error) -> CoreError {
    sqlx_error(err, |db_err| {
        let number = db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|e| e.number())
            .unwrap_or_default();
        match number {
            1064 | 1149 => SqlErrorKind::Syntax,
            1044 | 1045 | 1142 | 1143 | 1227 => SqlErrorKind::Permission,
            2006 | 2013 => SqlErrorKind::ConnectionLost,
            1205 | 3024 => SqlErrorKind::Timeout,
            _ => SqlErrorKind::Other,
        }
    })
}

fn quote_ident(name: &str) -> Result<String> {
    Ok(split_qualified(name)?
        .into_iter()
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join("."))
}

// information_schema returns binary-collated strings on some servers; CAST keeps them text
const COLUMNS_SQL: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
        CAST(COLUMN_TYPE AS CHAR(255)) AS column_type,
        IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable,
        CAST(COLUMN_DEFAULT AS CHAR(1024)) AS column_default,
        IF(EXTRA LIKE '%auto_increment%', 1, 0) AS is_identity,
        CAST(COLUMN_COMMENT AS CHAR(1024)) AS column_comment
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const KEYS_SQL: &str = r#"
    SELECT
        CAST(s.COLUMN_NAME AS CHAR(255)) AS column_name,
        CAST(CASE WHEN s.INDEX_NAME = 'PRIMARY' THEN 'primary'
                  WHEN s.NON_UNIQUE = 0 THEN 'unique'
                  ELSE 'index' END AS CHAR(16)) AS kind
    FROM INFORMATION_SCHEMA.STATISTICS s
    WHERE s.TABLE_SCHEMA = DATABASE() AND s.TABLE_NAME = ?
    UNION ALL
    SELECT CAST(k.COLUMN_NAME AS CHAR(255)), CAST('foreign' AS CHAR(16))
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
    WHERE k.TABLE_SCHEMA = DATABASE() AND k.TABLE_NAME = ?
      AND k.REFERENCED_TABLE_NAME IS NOT NULL
"#;

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn db_type(&self) -> DbType {
        self.flavor
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR(255)) AS table_name, \
             CAST(COALESCE(TABLE_COMMENT, '') AS CHAR(2048)) AS table_comment \
             FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(mysql_error)?;

        Ok(rows
            .iter()
            .map(|row| TableInfo {
                table_name: row.get("table_name"),
                table_comment: row.get("table_comment"),
            })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let rows: Vec<MySqlRow> = sqlx::query(COLUMNS_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::introspection(table, mysql_error(e)))?;

        if rows.is_empty() {
            return Err(CoreError::introspection(table, "table not found"));
        }

        let mut columns: Vec<ColumnMetadata> = rows
            .iter()
            .map(|row| ColumnMetadata {
                name: row.get("column_name"),
                native_type: row.get("column_type"),
                nullable: row.get::<i64, _>("is_nullable") == 1,
                default_value: row.try_get("column_default").ok().flatten(),
                is_primary: false,
                is_unique: false,
                is_index: false,
                is_foreign: false,
                is_auto_increment: row.get::<i64, _>("is_identity") == 1,
                comment: row
                    .try_get::<Option<String>, _>("column_comment")
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
            })
            .collect();

        let mut warnings = Vec::new();
        match sqlx::query(KEYS_SQL)
            .bind(table)
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
                mysql_error(e)
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
            map_mysql_value,
            MySqlQueryResult::rows_affected,
        )
        .await
        .map_err(mysql_error)
    }

    async fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<StatementOutput> {
        let sql = format!("SELECT * FROM {} LIMIT ? OFFSET ?", quote_ident(table)?);
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(mysql_error)?;

        let fields = match rows.first() {
            Some(row) => row_fields(row),
            // past the end or an empty table
            None => describe_fields(&self.pool, &sql).await,
        };
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| map_mysql_value(row, i))
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
            .map_err(mysql_error)?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Connection(mysql_error(e).to_string()))?;
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

fn map_mysql_value(row: &MySqlRow, index: usize) -> serde_json::Value {
    let value_ref = match row.try_get_raw(index) {
        Ok(v) => v,
        Err(_) => return serde_json::Value::Null,
    };

    if value_ref.is_null() {
        return serde_json::Value::Null;
    }

    let type_info = value_ref.type_info();
    let type_name = type_info.name().to_uppercase();

    if type_name.ends_with("UNSIGNED") {
        if let Ok(v) = row.try_get::<u64, _>(index) {
            return serde_json::json!(v);
        }
    }

    match type_name.as_str() {
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(|v| serde_json::json!(v))
            .unwrap_or(serde_json::Value::Null),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<i64, _>(index)
            .map(|v| serde_json::json!(v))
            .unwrap_or(serde_json::Value::Null),
        "FLOAT" => row
            .try_get::<f32, _>(index)
            .map(|v| serde_json::json!(v))
            .unwrap_or(serde_json::Value::Null),
        "DOUBLE" => row
            .try_get::<f64, _>(index)
            .map(|v| serde_json::json!(v))
            .unwrap_or(serde_json::Value::Null),
        "DECIMAL" => row
            .try_get::<sqlx::types::BigDecimal, _>(index)
            .map(|v| serde_json::Value::String(v.to_string()))
            .unwrap_or(serde_json::Value::Null),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|v| serde_json::Value::String(v.to_string()))
            .unwrap_or(serde_json::Value::Null),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|v| serde_json::Value::String(v.to_string()))
            .unwrap_or(serde_json::Value::Null),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|v| serde_json::Value::String(v.to_string()))
            .unwrap_or(serde_json::Value::Null),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|v| serde_json::Value::String(v.to_rfc3339()))
            .unwrap_or(serde_json::Value::Null),
        "JSON" => row
            .try_get::<serde_json::Value, _>(index)
            .unwrap_or(serde_json::Value::Null),
        _ => {
            if let Ok(s) = row.try_get::<String, _>(index) {
                serde_json::Value::String(s)
            } else if let Ok(bytes) = row.try_get::<Vec<u8>, _>(index) {
                bytes_to_json(&bytes)
            } else {
                serde_json::Value::String(format!("<{}>", type_name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users").unwrap(), "`users`");
        assert_eq!(quote_ident("app.users").unwrap(), "`app`.`users`");
        assert_eq!(quote_ident("we`ird").unwrap(), "`we``ird`");
    }
}
