//! Schema introspection: tables and column drafts through a driver.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::DatabaseDriver;
use crate::error::{CoreError, Result};
use crate::models::{CodeGeneratorColumn, ColumnMetadata, TableInfo};
use crate::typemap;

/// Column drafts for one table, in ordinal order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedTable {
    pub table_name: String,
    /// Raw structure the drafts were built from.
    pub metadata: Vec<ColumnMetadata>,
    pub columns: Vec<CodeGeneratorColumn>,
    pub warnings: Vec<String>,
}

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CoreError::Timeout(timeout))?
}

pub async fn list_tables(driver: &dyn DatabaseDriver, timeout: Duration) -> Result<Vec<TableInfo>> {
    let tables = bounded(timeout, driver.list_tables()).await?;
    debug!("Listed {} tables ({})", tables.len(), driver.db_type());
    Ok(tables)
}

/// Describe `table` and turn every column into a defaulted draft. Drafts are
/// not attached to any generator.
pub async fn import_columns(
    driver: &dyn DatabaseDriver,
    table: &str,
    timeout: Duration,
) -> Result<ImportedTable> {
    if table.trim().is_empty() {
        return Err(CoreError::Validation("table name is required".into()));
    }

    let description = bounded(timeout, driver.describe_table(table)).await?;
    for warning in &description.warnings {
        warn!("{}", warning);
    }

    let dialect = driver.db_type();
    let columns = description
        .columns
        .iter()
        .enumerate()
        .map(|(i, meta)| typemap::draft_column(dialect, meta, i as i32 + 1))
        .collect();

    Ok(ImportedTable {
        table_name: table.to_string(),
        metadata: description.columns,
        columns,
        warnings: description.warnings,
    })
}
