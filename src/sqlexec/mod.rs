//! SQL execution engine: arbitrary statements and paged table browsing.
//!
//! Every call is bounded by a deadline. A timed-out or cancelled call drops the
//! in-flight driver future, which hands its pooled client back to the pool.

use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{dedupe_field_names, DatabaseDriver, StatementOutput};
use crate::error::{CoreError, Result, SqlErrorKind};
use crate::models::{AffectedRows, FieldDescriptor, QueryResult, SqlOutcome, TablePage};

pub const MAX_PAGE_SIZE: u32 = 1000;

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

async fn with_deadline<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::sql(
            SqlErrorKind::Timeout,
            format!("statement exceeded {}ms", timeout.as_millis()),
        )),
    }
}

/// Key each row by field name. Names are made unique first so no row loses a
/// value to a repeated column name.
fn into_result(
    mut fields: Vec<FieldDescriptor>,
    rows: Vec<Vec<Value>>,
    execution_time: u64,
) -> QueryResult {
    dedupe_field_names(&mut fields);
    let rows: Vec<Map<String, Value>> = rows
        .into_iter()
        .map(|row| {
            fields
                .iter()
                .map(|f| f.name.clone())
                .zip(row.into_iter().chain(std::iter::repeat(Value::Null)))
                .collect()
        })
        .collect();
    QueryResult {
        row_count: rows.len(),
        fields,
        rows,
        execution_time,
    }
}

fn shape(output: StatementOutput, execution_time: u64) -> SqlOutcome {
    match output {
        StatementOutput::Rows { fields, rows } => {
            SqlOutcome::Rows(into_result(fields, rows, execution_time))
        }
        StatementOutput::Affected(affected_rows) => SqlOutcome::Affected(AffectedRows {
            affected_rows,
            execution_time,
        }),
    }
}

/// Run one statement and classify the outcome as a row set or an affected count.
pub async fn execute_sql(
    driver: &dyn DatabaseDriver,
    sql: &str,
    timeout: Duration,
) -> Result<SqlOutcome> {
    if sql.trim().is_empty() {
        return Err(CoreError::Validation("sql is required".into()));
    }
    let start = Instant::now();
    let output = with_deadline(timeout, driver.run_query(sql, None))
        .await
        .map_err(|e| {
            warn!("Statement failed after {}ms: {}", elapsed_ms(start), e);
            e
        })?;
    let outcome = shape(output, elapsed_ms(start));
    info!(
        "Executed statement on {} in {}ms",
        driver.db_type(),
        outcome.execution_time()
    );
    Ok(outcome)
}

/// [`execute_sql`] that also stops when `cancel` fires.
pub async fn execute_sql_cancellable(
    driver: &dyn DatabaseDriver,
    sql: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<SqlOutcome> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Statement cancelled by caller");
            Err(CoreError::Cancelled)
        }
        result = execute_sql(driver, sql, timeout) => result,
    }
}

/// One page of `table`, 1-based. `page_size` is clamped to 1..=1000 and the
/// table must exist; limit and offset go to the driver as bound values.
pub async fn get_table_data(
    driver: &dyn DatabaseDriver,
    table: &str,
    page: u32,
    page_size: u32,
    timeout: Duration,
) -> Result<TablePage> {
    let table = table.trim();
    if table.is_empty() {
        return Err(CoreError::Validation("table name is required".into()));
    }
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    let start = Instant::now();
    let tables = with_deadline(timeout, driver.list_tables()).await?;
    if !tables.iter().any(|t| t.table_name == table) {
        return Err(CoreError::not_found("table", table));
    }

    let offset = (page as u64 - 1) * page_size as u64;
    let output = with_deadline(timeout, driver.fetch_page(table, page_size as u64, offset)).await?;
    let total = with_deadline(timeout, driver.count_rows(table)).await?;

    let result = match output {
        StatementOutput::Rows { fields, rows } => into_result(fields, rows, elapsed_ms(start)),
        StatementOutput::Affected(_) => into_result(Vec::new(), Vec::new(), elapsed_ms(start)),
    };
    debug!(
        "Fetched page {} of {} ({} rows of {})",
        page, table, result.row_count, total
    );

    Ok(TablePage {
        result,
        total,
        page,
        page_size,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{ColumnMetadata, TableInfo};
    use crate::state::testing::FakeDriver;

    fn driver() -> FakeDriver {
        FakeDriver::new(vec![(
            TableInfo {
                table_name: "member".into(),
                table_comment: String::new(),
            },
            vec![ColumnMetadata::new("n", "int")],
        )])
    }

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_select_yields_rows() {
        let driver = driver();
        let outcome = execute_sql(&driver, "SELECT a.id, a.name, b.id FROM a, b", DEADLINE)
            .await
            .unwrap();
        let SqlOutcome::Rows(result) = outcome else {
            panic!("expected rows");
        };
        let names: Vec<_> = result.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "id_1"]);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[1]["id"], Value::from(2));
        assert_eq!(result.rows[1]["id_1"], Value::from(20));
        assert!(result.rows.iter().all(|r| r.len() == 3));
    }

    #[tokio::test]
    async fn test_dml_yields_affected_rows() {
        let driver = driver();
        let outcome = execute_sql(&driver, "UPDATE member SET n = 1", DEADLINE)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SqlOutcome::Affected(AffectedRows { affected_rows: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_syntax_error_keeps_message() {
        let driver = driver();
        let err = execute_sql(&driver, "SELEC 1", DEADLINE).await.unwrap_err();
        assert_eq!(err.sql_kind(), Some(SqlErrorKind::Syntax));
        assert!(err.to_string().contains("error in your SQL syntax"));
    }

    #[tokio::test]
    async fn test_empty_sql_rejected() {
        let driver = driver();
        assert!(matches!(
            execute_sql(&driver, "  ", DEADLINE).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_returns_client_to_pool() {
        let driver = driver();
        let err = execute_sql(&driver, "HANG", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.sql_kind(), Some(SqlErrorKind::Timeout));
        assert_eq!(driver.pool_status().idle, 2);
    }

    #[tokio::test]
    async fn test_cancel_returns_client_to_pool() {
        let driver = Arc::new(driver());
        let token = CancellationToken::new();

        let task = {
            let driver = driver.clone();
            let token = token.clone();
            tokio::spawn(async move {
                execute_sql_cancellable(driver.as_ref(), "HANG", DEADLINE, &token).await
            })
        };
        // wait until the statement holds its permit
        while driver.pool_status().idle == 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert_eq!(driver.pool_status().idle, 2);
    }

    #[tokio::test]
    async fn test_table_page() {
        let driver = driver();
        let page = get_table_data(&driver, "member", 3, 10, DEADLINE)
            .await
            .unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.page, 3);
        assert_eq!(page.result.row_count, 5);
        assert_eq!(page.result.rows[0]["n"], Value::from(20));
    }

    #[tokio::test]
    async fn test_table_page_clamps_arguments() {
        let driver = driver();
        let page = get_table_data(&driver, "member", 0, 0, DEADLINE)
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 1);
        assert_eq!(page.result.row_count, 1);

        let page = get_table_data(&driver, "member", 1, 50_000, DEADLINE)
            .await
            .unwrap();
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert_eq!(page.result.row_count, 25);
    }

    #[tokio::test]
    async fn test_unknown_table_is_not_found() {
        let driver = driver();
        let err = get_table_data(&driver, "member; DROP TABLE x", 1, 10, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "table", .. }));
    }
}
