//! Column reconciliation.
//!
//! Merges a generator's persisted columns `C` with a fresh introspection `S`,
//! keyed by column name:
//!
//! * in both: the stored row wins, except `columnType`, `isPk`,
//!   `isIncrement` and `isRequired`, which follow the live schema. The
//!   mapped type follows a native type change. Curated fields (`isQuery`,
//!   `queryType`, `htmlType`, `dictType`, `isList`, `isInsert`, `isEdit`,
//!   `sort`) are kept as stored.
//! * only in `S`: a defaulted draft, sorted after the current maximum.
//! * only in `C`: dropped.
//!
//! [`reconcile`] is pure; [`sync_generator`] wraps it in one read-merge-write
//! against the store, guarded by the snapshot revision.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::db::DatabaseDriver;
use crate::error::{CoreError, Result};
use crate::introspect::{self, ImportedTable};
use crate::models::{CodeGeneratorColumn, CodeGeneratorConfig, ColumnMetadata, DbType};
use crate::storage::MetadataStore;
use crate::typemap;

/// Persisted result of a sync plus what changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub columns: Vec<CodeGeneratorColumn>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub warnings: Vec<String>,
    /// False when the merge reproduced the stored set and nothing was written.
    pub changed: bool,
}

/// Outcome of the pure merge, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub columns: Vec<CodeGeneratorColumn>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn reconcile(
    dialect: DbType,
    current: &[CodeGeneratorColumn],
    live: &[ColumnMetadata],
) -> Merged {
    let mut existing: HashMap<&str, &CodeGeneratorColumn> = HashMap::new();
    for col in current {
        existing.entry(col.column_name.as_str()).or_insert(col);
    }
    let live_names: HashSet<&str> = live.iter().map(|m| m.name.as_str()).collect();

    let mut next_sort = current.iter().map(|c| c.sort).max().unwrap_or(0);
    let mut columns = Vec::with_capacity(live.len());
    let mut added = Vec::new();
    let mut warnings = Vec::new();

    for (i, meta) in live.iter().enumerate() {
        let draft = typemap::draft_column(dialect, meta, i as i32 + 1);

        match existing.get(meta.name.as_str()) {
            Some(&stored) => {
                let mut col = stored.clone();
                let pk_changed = col.is_pk != meta.is_primary;

                let retyped_from = if col.column_type != meta.native_type {
                    let old = std::mem::replace(&mut col.column_type, meta.native_type.clone());
                    col.mapped_type = draft.mapped_type.clone();
                    Some(old)
                } else {
                    None
                };
                if col.column_comment.trim().is_empty() {
                    col.column_comment = meta.comment.clone();
                }
                if pk_changed {
                    // inclusion flags were derived from the old key status
                    col.is_insert = draft.is_insert;
                    col.is_edit = draft.is_edit;
                    col.is_list = draft.is_list;
                    col.is_query = draft.is_query;
                }
                typemap::apply_structural_flags(&mut col, meta);

                if let Some(old) = retyped_from {
                    let family = typemap::type_family(dialect, &meta.native_type);
                    if !family.accepts(col.html_type) {
                        warnings.push(format!(
                            "column {}: type changed from {} to {} ({}); htmlType {} kept",
                            col.column_name, old, meta.native_type, family, col.html_type
                        ));
                    }
                }
                columns.push(col);
            }
            None => {
                next_sort += 1;
                added.push(draft.column_name.clone());
                columns.push(CodeGeneratorColumn {
                    sort: next_sort,
                    ..draft
                });
            }
        }
    }

    let removed = current
        .iter()
        .filter(|c| !live_names.contains(c.column_name.as_str()))
        .map(|c| c.column_name.clone())
        .collect();

    columns.sort_by(|a, b| {
        a.sort
            .cmp(&b.sort)
            .then_with(|| a.column_name.cmp(&b.column_name))
    });

    Merged {
        columns,
        added,
        removed,
        warnings,
    }
}

/// Read `C`, introspect `S`, merge, and write the result in one step.
///
/// The write is conditional on the revision read at the start; an edit that
/// lands in between turns into `ReconciliationConflict` and `C` stays as the
/// editor left it. Callers serialise syncs per generator.
pub async fn sync_generator(
    store: &dyn MetadataStore,
    driver: &dyn DatabaseDriver,
    generator: &CodeGeneratorConfig,
    timeout: Duration,
) -> Result<SyncReport> {
    let snapshot = store.load_columns(&generator.id).await?;
    let ImportedTable {
        metadata, warnings, ..
    } = introspect::import_columns(driver, &generator.table_name, timeout).await?;

    if metadata.is_empty() {
        return Err(CoreError::introspection(
            &generator.table_name,
            "live table reported no columns; refusing to drop every column",
        ));
    }

    let mut merged = reconcile(driver.db_type(), &snapshot.columns, &metadata);
    let mut all_warnings = warnings;
    all_warnings.append(&mut merged.warnings);
    merged.warnings = all_warnings;

    if merged.columns == snapshot.columns {
        return Ok(SyncReport {
            columns: snapshot.columns,
            added: merged.added,
            removed: merged.removed,
            warnings: merged.warnings,
            changed: false,
        });
    }

    let saved = store
        .replace_columns(&generator.id, snapshot.revision, merged.columns)
        .await
        .map_err(|e| match e {
            conflict @ CoreError::ReconciliationConflict { .. } => conflict,
            other => CoreError::conflict(&generator.id, other.to_string()),
        })?;

    info!(
        "Synced generator {} against {}: {} added, {} removed, {} columns",
        generator.id,
        generator.table_name,
        merged.added.len(),
        merged.removed.len(),
        saved.columns.len()
    );

    Ok(SyncReport {
        columns: saved.columns,
        added: merged.added,
        removed: merged.removed,
        warnings: merged.warnings,
        changed: true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{GeneratorOptions, HtmlType, QueryType, TableInfo};
    use crate::state::testing::FakeDriver;
    use crate::storage::{ColumnSnapshot, MemoryStore};

    fn meta(name: &str, native: &str) -> ColumnMetadata {
        ColumnMetadata::new(name, native)
    }

    fn pk(name: &str) -> ColumnMetadata {
        let mut m = ColumnMetadata::new(name, "int");
        m.is_primary = true;
        m.is_auto_increment = true;
        m.nullable = false;
        m
    }

    fn drafts(live: &[ColumnMetadata]) -> Vec<CodeGeneratorColumn> {
        reconcile(DbType::Mysql, &[], live).columns
    }

    #[test]
    fn test_preserves_curation() {
        let mut current = drafts(&[meta("age", "int")]);
        current[0].is_query = true;
        current[0].query_type = QueryType::BETWEEN;
        current[0].dict_type = Some("sys_age_range".into());

        let merged = reconcile(DbType::Mysql, &current, &[meta("age", "int")]);
        let age = &merged.columns[0];
        assert!(age.is_query);
        assert_eq!(age.query_type, QueryType::BETWEEN);
        assert_eq!(age.dict_type.as_deref(), Some("sys_age_range"));
        assert!(merged.added.is_empty() && merged.removed.is_empty());
    }

    #[test]
    fn test_new_and_removed_columns() {
        let current = drafts(&[meta("a", "int"), meta("b", "int")]);
        let merged = reconcile(DbType::Mysql, &current, &[meta("a", "int"), meta("c", "varchar(10)")]);

        let names: Vec<_> = merged.columns.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(merged.added, vec!["c"]);
        assert_eq!(merged.removed, vec!["b"]);
        // appended after the old maximum (b had sort 2)
        assert_eq!(merged.columns[1].sort, 3);
        assert_eq!(merged.columns[1].query_type, QueryType::LIKE);
    }

    #[test]
    fn test_structural_fields_refresh() {
        let mut current = drafts(&[meta("code", "varchar(10)")]);
        current[0].is_list = false;
        current[0].html_type = HtmlType::Textarea;

        let mut live = meta("code", "int");
        live.nullable = false;
        let merged = reconcile(DbType::Mysql, &current, &[live]);
        let code = &merged.columns[0];

        assert_eq!(code.column_type, "int");
        assert_eq!(code.mapped_type, "number");
        assert!(code.is_required);
        assert!(!code.is_list);
        assert_eq!(code.html_type, HtmlType::Textarea);
        assert_eq!(merged.warnings.len(), 1);
        assert!(merged.warnings[0].contains("textarea"));
    }

    #[test]
    fn test_pk_change_reapplies_key_defaults() {
        let current = drafts(&[meta("id", "int")]);
        assert!(current[0].is_insert);

        let merged = reconcile(DbType::Mysql, &current, &[pk("id")]);
        let id = &merged.columns[0];
        assert!(id.is_pk && id.is_increment && id.is_list);
        assert!(!id.is_insert && !id.is_edit && !id.is_query);
    }

    #[test]
    fn test_natural_key_curation_survives_sync() {
        let mut code = meta("code", "varchar(20)");
        code.is_primary = true;
        code.nullable = false;
        let mut current = drafts(&[code.clone()]);
        assert!(!current[0].is_insert && current[0].is_list);
        current[0].is_insert = true;
        current[0].is_query = true;
        current[0].is_list = false;

        let merged = reconcile(DbType::Mysql, &current, &[code]);
        let code = &merged.columns[0];
        assert!(code.is_pk && !code.is_increment && code.is_required);
        assert!(code.is_insert && code.is_query);
        assert!(!code.is_list);
        assert_eq!(merged.columns, current);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let live = vec![pk("id"), meta("name", "varchar(20)"), meta("born", "date")];
        let mut current = drafts(&live[..2]);
        current[1].html_type = HtmlType::Select;
        current[1].dict_type = Some("names".into());

        let once = reconcile(DbType::Mysql, &current, &live);
        let twice = reconcile(DbType::Mysql, &once.columns, &live);
        assert_eq!(once.columns, twice.columns);
        assert!(twice.added.is_empty() && twice.removed.is_empty());
    }

    fn generator() -> CodeGeneratorConfig {
        CodeGeneratorConfig {
            id: "g1".into(),
            name: "users".into(),
            table_name: "users".into(),
            module_name: "system".into(),
            business_name: "user".into(),
            connection_id: None,
            options: GeneratorOptions::default(),
            remark: None,
        }
    }

    fn users_driver(columns: Vec<ColumnMetadata>) -> FakeDriver {
        FakeDriver::new(vec![(
            TableInfo {
                table_name: "users".into(),
                table_comment: String::new(),
            },
            columns,
        )])
    }

    #[tokio::test]
    async fn test_sync_generator_twice_is_stable() {
        let store = MemoryStore::new();
        let driver = users_driver(vec![pk("id"), meta("name", "varchar(20)")]);
        let timeout = Duration::from_secs(1);

        let first = sync_generator(&store, &driver, &generator(), timeout)
            .await
            .unwrap();
        assert!(first.changed);
        assert_eq!(first.added, vec!["id", "name"]);

        let second = sync_generator(&store, &driver, &generator(), timeout)
            .await
            .unwrap();
        assert!(!second.changed);
        assert_eq!(first.columns, second.columns);
        assert_eq!(store.load_columns("g1").await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_empty_live_schema_is_refused() {
        let store = MemoryStore::new();
        store
            .replace_columns("g1", 0, drafts(&[meta("a", "int")]))
            .await
            .unwrap();
        let driver = users_driver(Vec::new());

        let err = sync_generator(&store, &driver, &generator(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaIntrospection { .. }));
        assert_eq!(store.load_columns("g1").await.unwrap().columns.len(), 1);
    }

    /// Store that lets an operator edit land between the sync's read and write.
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl MetadataStore for RacingStore {
        async fn get_connection(&self, id: &str) -> Result<crate::models::DatabaseConnection> {
            self.inner.get_connection(id).await
        }
        async fn list_connections(&self) -> Result<Vec<crate::models::DatabaseConnection>> {
            self.inner.list_connections().await
        }
        async fn save_connection(
            &self,
            conn: crate::models::DatabaseConnection,
        ) -> Result<crate::models::DatabaseConnection> {
            self.inner.save_connection(conn).await
        }
        async fn delete_connection(&self, id: &str) -> Result<()> {
            self.inner.delete_connection(id).await
        }
        async fn get_generator(&self, id: &str) -> Result<CodeGeneratorConfig> {
            self.inner.get_generator(id).await
        }
        async fn list_generators(&self) -> Result<Vec<CodeGeneratorConfig>> {
            self.inner.list_generators().await
        }
        async fn save_generator(&self, config: CodeGeneratorConfig) -> Result<CodeGeneratorConfig> {
            self.inner.save_generator(config).await
        }
        async fn delete_generator(&self, id: &str) -> Result<()> {
            self.inner.delete_generator(id).await
        }
        async fn load_columns(&self, generator_id: &str) -> Result<ColumnSnapshot> {
            let snapshot = self.inner.load_columns(generator_id).await?;
            if let Some(first) = snapshot.columns.first() {
                let mut edited = first.clone();
                edited.dict_type = Some("edited".into());
                self.inner.save_column(edited).await?;
            }
            Ok(snapshot)
        }
        async fn replace_columns(
            &self,
            generator_id: &str,
            expected_revision: u64,
            columns: Vec<CodeGeneratorColumn>,
        ) -> Result<ColumnSnapshot> {
            self.inner
                .replace_columns(generator_id, expected_revision, columns)
                .await
        }
        async fn save_column(&self, column: CodeGeneratorColumn) -> Result<CodeGeneratorColumn> {
            self.inner.save_column(column).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_edit_is_a_conflict() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
        });
        store
            .inner
            .replace_columns("g1", 0, drafts(&[meta("a", "int")]))
            .await
            .unwrap();
        let driver = users_driver(vec![meta("a", "int"), meta("b", "int")]);

        let err = sync_generator(store.as_ref(), &driver, &generator(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ReconciliationConflict { .. }));

        let after = store.inner.load_columns("g1").await.unwrap();
        assert_eq!(after.columns.len(), 1);
        assert_eq!(after.columns[0].dict_type.as_deref(), Some("edited"));
    }
}
