//! SQL Server driver on tiberius, pooled with bb8.

use std::sync::RwLock;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::PoolSettings;
use crate::db::{
    bytes_to_json, leading_keyword, split_qualified, DatabaseDriver, KeyFlags, PoolStatus,
    StatementOutput, TableDescription,
};
use crate::error::{CoreError, Result, SqlErrorKind};
use crate::models::{ColumnMetadata, DatabaseConnection, DbType, FieldDescriptor, TableInfo};

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    host: String,
    port: u16,
    database: Option<String>,
    username: String,
    password: String,
    ssl: bool,
}

impl TiberiusConnectionManager {
    fn from_connection(conn: &DatabaseConnection) -> Self {
        Self {
            host: conn.host.clone().unwrap_or_else(|| "localhost".to_string()),
            port: conn.port_or_default(),
            database: conn.database.clone(),
            username: conn.username.clone().unwrap_or_default(),
            password: conn.password_str().to_string(),
            ssl: conn.ssl,
        }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        if let Some(database) = &self.database {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));

        if self.ssl {
            config.trust_cert();
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub struct MssqlDriver {
    /// `None` once closed. Checked-out connections hold their own pool
    /// handle, so bb8 tears the pool down when the last of them returns.
    pool: RwLock<Option<Pool<TiberiusConnectionManager>>>,
}

impl MssqlDriver {
    pub fn connect_lazy(config: &DatabaseConnection, settings: &PoolSettings) -> Self {
        let manager = TiberiusConnectionManager::from_connection(config);
        let pool = Pool::builder()
            .max_size(settings.max_connections)
            .connection_timeout(settings.acquire_timeout())
            .idle_timeout(Some(settings.idle_timeout()))
            .build_unchecked(manager);

        info!("Created mssql pool for {}", config.display_target());
        Self {
            pool: RwLock::new(Some(pool)),
        }
    }

    fn handle(&self) -> Result<Pool<TiberiusConnectionManager>> {
        self.pool
            .read()
            .map_err(|_| CoreError::Connection("mssql pool lock poisoned".into()))?
            .clone()
            .ok_or_else(|| CoreError::sql(SqlErrorKind::ConnectionLost, "pool is closed"))
    }

    async fn client(&self) -> Result<PooledConnection<'static, TiberiusConnectionManager>> {
        self.handle()?.get_owned().await.map_err(|e| match e {
            RunError::User(err) => mssql_error(err),
            RunError::TimedOut => {
                CoreError::sql(SqlErrorKind::Timeout, "timed out waiting for a connection")
            }
        })
    }
}

fn mssql_error(err: tiberius::error::Error) -> CoreError {
    use tiberius::error::Error;

    let kind = match &err {
        Error::Server(token) => match token.code() {
            102 | 156 | 170 => SqlErrorKind::Syntax,
            229 | 230 | 262 | 297 | 300 | 18456 => SqlErrorKind::Permission,
            1222 => SqlErrorKind::Timeout,
            _ => SqlErrorKind::Other,
        },
        Error::Io { .. } | Error::Tls(_) | Error::Routing { .. } => SqlErrorKind::ConnectionLost,
        _ => SqlErrorKind::Other,
    };
    let message = match &err {
        Error::Server(token) => token.message().to_string(),
        other => other.to_string(),
    };
    CoreError::sql(kind, message)
}

fn quote_ident(name: &str) -> Result<String> {
    Ok(split_qualified(name)?
        .into_iter()
        .map(|part| format!("[{}]", part.replace(']', "]]")))
        .collect::<Vec<_>>()
        .join("."))
}

/// `(schema, table)` where an empty schema means the login's default.
fn schema_and_table(name: &str) -> Result<(String, String)> {
    let parts = split_qualified(name)?;
    Ok(match parts.as_slice() {
        [schema, table] => (schema.to_string(), table.to_string()),
        _ => (String::new(), parts[0].to_string()),
    })
}

const TABLES_SQL: &str = r#"
    SELECT
        t.name AS table_name,
        CAST(ISNULL(ep.value, '') AS NVARCHAR(4000)) AS table_comment
    FROM sys.tables t
    LEFT JOIN sys.extended_properties ep
        ON ep.major_id = t.object_id AND ep.minor_id = 0 AND ep.name = 'MS_Description'
    WHERE t.schema_id = SCHEMA_ID()
    ORDER BY t.name
"#;

const COLUMNS_SQL: &str = r#"
    SELECT
        c.COLUMN_NAME AS column_name,
        CASE
            WHEN c.CHARACTER_MAXIMUM_LENGTH = -1 THEN c.DATA_TYPE + '(max)'
            WHEN c.CHARACTER_MAXIMUM_LENGTH IS NOT NULL
                THEN c.DATA_TYPE + '(' + CAST(c.CHARACTER_MAXIMUM_LENGTH AS VARCHAR(10)) + ')'
            WHEN c.DATA_TYPE IN ('decimal', 'numeric')
                THEN c.DATA_TYPE + '(' + CAST(c.NUMERIC_PRECISION AS VARCHAR(10)) + ','
                     + CAST(c.NUMERIC_SCALE AS VARCHAR(10)) + ')'
            ELSE c.DATA_TYPE
        END AS native_type,
        CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS is_nullable,
        c.COLUMN_DEFAULT AS column_default,
        CAST(ISNULL(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
            c.COLUMN_NAME, 'IsIdentity'), 0) AS INT) AS is_identity,
        CAST(ISNULL(ep.value, '') AS NVARCHAR(4000)) AS column_comment
    FROM INFORMATION_SCHEMA.COLUMNS c
    LEFT JOIN sys.extended_properties ep
        ON ep.major_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME))
        AND ep.minor_id = COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
            c.COLUMN_NAME, 'ColumnId')
        AND ep.name = 'MS_Description'
    WHERE c.TABLE_SCHEMA = ISNULL(NULLIF(@P1, ''), SCHEMA_NAME()) AND c.TABLE_NAME = @P2
    ORDER BY c.ORDINAL_POSITION
"#;

const KEYS_SQL: &str = r#"
    SELECT
        c.name AS column_name,
        CASE WHEN i.is_primary_key = 1 THEN 'primary'
             WHEN i.is_unique = 1 THEN 'unique'
             ELSE 'index' END AS kind
    FROM sys.indexes i
    JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
    JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
    WHERE i.object_id = OBJECT_ID(QUOTENAME(ISNULL(NULLIF(@P1, ''), SCHEMA_NAME())) + '.' + QUOTENAME(@P2))
    UNION ALL
    SELECT c.name, 'foreign'
    FROM sys.foreign_key_columns fkc
    JOIN sys.columns c ON c.object_id = fkc.parent_object_id AND c.column_id = fkc.parent_column_id
    WHERE fkc.parent_object_id = OBJECT_ID(QUOTENAME(ISNULL(NULLIF(@P1, ''), SCHEMA_NAME())) + '.' + QUOTENAME(@P2))
"#;

/// Statements that report a row count rather than a result set.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE",
];

fn text(row: &Row, column: &str) -> String {
    row.try_get::<&str, _>(column)
        .ok()
        .flatten()
        .unwrap_or_default()
        .to_string()
}

fn flag(row: &Row, column: &str) -> bool {
    row.try_get::<i32, _>(column).ok().flatten().unwrap_or(0) == 1
}

#[async_trait]
impl DatabaseDriver for MssqlDriver {
    fn db_type(&self) -> DbType {
        DbType::Mssql
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let mut client = self.client().await?;
        let rows = client
            .simple_query(TABLES_SQL)
            .await
            .map_err(mssql_error)?
            .into_first_result()
            .await
            .map_err(mssql_error)?;

        Ok(rows
            .iter()
            .map(|row| TableInfo {
                table_name: text(row, "table_name"),
                table_comment: text(row, "table_comment"),
            })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let (schema, name) = schema_and_table(table)?;
        let mut client = self.client().await?;

        let mut query = Query::new(COLUMNS_SQL);
        query.bind(schema.as_str());
        query.bind(name.as_str());
        let rows = query
            .query(&mut client)
            .await
            .map_err(|e| CoreError::introspection(table, mssql_error(e)))?
            .into_first_result()
            .await
            .map_err(|e| CoreError::introspection(table, mssql_error(e)))?;

        if rows.is_empty() {
            return Err(CoreError::introspection(table, "table not found"));
        }

        let mut columns: Vec<ColumnMetadata> = rows
            .iter()
            .map(|row| ColumnMetadata {
                name: text(row, "column_name"),
                native_type: text(row, "native_type"),
                nullable: flag(row, "is_nullable"),
                default_value: row
                    .try_get::<&str, _>("column_default")
                    .ok()
                    .flatten()
                    .map(str::to_string),
                is_primary: false,
                is_unique: false,
                is_index: false,
                is_foreign: false,
                is_auto_increment: flag(row, "is_identity"),
                comment: text(row, "column_comment"),
            })
            .collect();

        let mut warnings = Vec::new();
        let mut keys = Query::new(KEYS_SQL);
        keys.bind(schema.as_str());
        keys.bind(name.as_str());
        let key_rows = match keys.query(&mut client).await {
            Ok(stream) => stream.into_first_result().await,
            Err(e) => Err(e),
        };
        match key_rows {
            Ok(key_rows) => {
                let mut flags = KeyFlags::default();
                for row in &key_rows {
                    flags.mark(text(row, "column_name"), &text(row, "kind"));
                }
                flags.apply(&mut columns);
            }
            Err(e) => warnings.push(format!(
                "key metadata for {} unavailable: {}",
                table,
                mssql_error(e)
            )),
        }

        debug!("Described {} ({} columns)", table, columns.len());
        Ok(TableDescription { columns, warnings })
    }

    async fn run_query(&self, sql: &str, limit: Option<usize>) -> Result<StatementOutput> {
        let mut client = self.client().await?;

        if WRITE_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
            let result = client.execute(sql, &[]).await.map_err(mssql_error)?;
            return Ok(StatementOutput::Affected(result.total()));
        }

        let mut stream = client.simple_query(sql).await.map_err(mssql_error)?;
        let fields = stream
            .columns()
            .await
            .map_err(mssql_error)?
            .map(describe_columns);

        let Some(fields) = fields else {
            // no result set: drain so the connection goes back clean
            stream.into_results().await.map_err(mssql_error)?;
            return Ok(StatementOutput::Affected(0));
        };

        let mut rows = Vec::new();
        let mut row_stream = stream.into_row_stream();
        while let Some(row) = row_stream.try_next().await.map_err(mssql_error)? {
            // keep reading past the limit; tiberius needs the stream drained
            if limit.map_or(false, |l| rows.len() >= l) {
                continue;
            }
            rows.push(map_mssql_row(row));
        }

        Ok(StatementOutput::Rows { fields, rows })
    }

    async fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<StatementOutput> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY (SELECT NULL) OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY",
            quote_ident(table)?
        );
        let mut client = self.client().await?;
        let mut query = Query::new(sql);
        query.bind(offset as i64);
        query.bind(limit as i64);

        let mut stream = query.query(&mut client).await.map_err(mssql_error)?;
        let fields = stream
            .columns()
            .await
            .map_err(mssql_error)?
            .map(describe_columns)
            .unwrap_or_default();
        let rows = stream
            .into_first_result()
            .await
            .map_err(mssql_error)?
            .into_iter()
            .map(map_mssql_row)
            .collect();

        Ok(StatementOutput::Rows { fields, rows })
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", quote_ident(table)?);
        let mut client = self.client().await?;
        let row = client
            .simple_query(sql)
            .await
            .map_err(mssql_error)?
            .into_row()
            .await
            .map_err(mssql_error)?;
        let count = row
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self
            .client()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| CoreError::Connection(mssql_error(e).to_string()))?
            .into_row()
            .await
            .map_err(|e| CoreError::Connection(mssql_error(e).to_string()))?;
        Ok(())
    }

    fn pool_status(&self) -> PoolStatus {
        match self.handle() {
            Ok(pool) => {
                let state = pool.state();
                PoolStatus {
                    size: state.connections,
                    idle: state.idle_connections,
                }
            }
            Err(_) => PoolStatus::default(),
        }
    }

    async fn close(&self) {
        let released = match self.pool.write() {
            Ok(mut pool) => pool.take(),
            Err(_) => None,
        };
        if let Some(pool) = released {
            debug!("Closing mssql pool ({} open)", pool.state().connections);
        }
    }
}

fn describe_columns(columns: &[tiberius::Column]) -> Vec<FieldDescriptor> {
    columns
        .iter()
        .map(|c| FieldDescriptor {
            name: c.name().to_string(),
            type_name: format!("{:?}", c.column_type()),
        })
        .collect()
}

fn map_mssql_row(row: Row) -> Vec<Value> {
    row.into_iter().map(|data| map_mssql_value(&data)).collect()
}

fn map_mssql_value(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(Some(v)) => serde_json::json!(v),
        ColumnData::I16(Some(v)) => serde_json::json!(v),
        ColumnData::I32(Some(v)) => serde_json::json!(v),
        ColumnData::I64(Some(v)) => serde_json::json!(v),
        ColumnData::F32(Some(v)) => serde_json::json!(v),
        ColumnData::F64(Some(v)) => serde_json::json!(v),
        ColumnData::Bit(Some(v)) => serde_json::json!(v),
        ColumnData::String(Some(v)) => Value::String(v.to_string()),
        ColumnData::Guid(Some(v)) => Value::String(v.to_string()),
        ColumnData::Binary(Some(v)) => bytes_to_json(v),
        ColumnData::Numeric(Some(v)) => Value::String(v.to_string()),
        ColumnData::Xml(Some(v)) => Value::String(v.clone().into_owned().into_string()),
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => NaiveDateTime::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Date(Some(_)) => NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Time(Some(_)) => NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::DateTimeOffset(Some(_)) => DateTime::<FixedOffset>::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionStatus;
    use std::borrow::Cow;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users").unwrap(), "[users]");
        assert_eq!(quote_ident("dbo.users").unwrap(), "[dbo].[users]");
        assert_eq!(quote_ident("od]d").unwrap(), "[od]]d]");
    }

    #[test]
    fn test_schema_and_table() {
        assert_eq!(
            schema_and_table("sales.orders").unwrap(),
            ("sales".to_string(), "orders".to_string())
        );
        assert_eq!(
            schema_and_table("orders").unwrap(),
            (String::new(), "orders".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_releases_pool() {
        let conn = DatabaseConnection {
            id: "mssql".into(),
            name: "mssql".into(),
            db_type: DbType::Mssql,
            host: Some("127.0.0.1".into()),
            port: Some(1433),
            username: Some("sa".into()),
            password: None,
            database: Some("master".into()),
            filename: None,
            ssl: false,
            status: ConnectionStatus::Enabled,
            is_system: false,
        };
        let driver = MssqlDriver::connect_lazy(&conn, &PoolSettings::default());
        assert!(driver.handle().is_ok());

        driver.close().await;
        assert_eq!(driver.pool_status(), PoolStatus::default());
        let err = driver.ping().await.unwrap_err();
        assert!(matches!(err, CoreError::Connection(_)));
        assert!(err.to_string().contains("pool is closed"));

        // closing twice is harmless
        driver.close().await;
    }

    #[test]
    fn test_map_mssql_value() {
        assert_eq!(map_mssql_value(&ColumnData::I32(Some(7))), serde_json::json!(7));
        assert_eq!(map_mssql_value(&ColumnData::I32(None)), Value::Null);
        assert_eq!(map_mssql_value(&ColumnData::Bit(Some(true))), serde_json::json!(true));
        assert_eq!(
            map_mssql_value(&ColumnData::String(Some(Cow::Borrowed("abc")))),
            serde_json::json!("abc")
        );
    }
}
