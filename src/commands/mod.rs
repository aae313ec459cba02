//! Operations exposed to the surrounding CRUD/HTTP layer and the CLI.
//!
//! Every command resolves its records through the metadata store and its
//! driver through the connection registry; none of them hold a driver past
//! the end of the call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codegen;
use crate::db::{self, DatabaseDriver};
use crate::error::{CoreError, Result};
use crate::introspect::{self, ImportedTable};
use crate::models::{
    CodeGeneratorColumn, CodeGeneratorConfig, ConnectionStatus, ConnectionSummary,
    ConnectionTestResult, DatabaseConnection, GeneratedArchive, GeneratedFile, SqlOutcome,
    TableInfo, TablePage,
};
use crate::sqlexec;
use crate::state::AppState;
use crate::sync::{self, SyncReport};

async fn driver_for(state: &AppState, connection_id: &str) -> Result<Arc<dyn DatabaseDriver>> {
    let conn = state.store.get_connection(connection_id).await?;
    state.registry.acquire(&conn).await
}

/// Connection a generator introspects: its own, else the configured default.
fn generator_connection(state: &AppState, generator: &CodeGeneratorConfig) -> Result<String> {
    generator
        .connection_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .or_else(|| state.config.default_connection_id.clone())
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "generator '{}' names no connection and no default connection is configured",
                generator.id
            ))
        })
}

// ---- connections ----

pub async fn list_connections(state: &AppState) -> Result<Vec<ConnectionSummary>> {
    let connections = state.store.list_connections().await?;
    Ok(connections.iter().map(ConnectionSummary::from).collect())
}

pub async fn create_connection(
    state: &AppState,
    conn: DatabaseConnection,
) -> Result<ConnectionSummary> {
    let conn = conn.with_default_port();
    conn.validate()?;
    let saved = state.store.save_connection(conn).await?;
    info!("Created connection {} ({})", saved.id, saved.display_target());
    Ok(ConnectionSummary::from(&saved))
}

/// Replace a stored connection. An omitted password keeps the stored one.
/// System connections refuse changes to `type`, `host` and `filename`.
pub async fn update_connection(
    state: &AppState,
    mut conn: DatabaseConnection,
) -> Result<ConnectionSummary> {
    let existing = state.store.get_connection(&conn.id).await?;
    if existing.is_system {
        let locked = [
            ("type", existing.db_type != conn.db_type),
            ("host", existing.host != conn.host),
            ("filename", existing.filename != conn.filename),
        ];
        if let Some((field, _)) = locked.iter().find(|(_, changed)| *changed) {
            return Err(CoreError::ProtectedConnection(
                existing.name.clone(),
                format!("'{}' cannot be changed", field),
            ));
        }
    }
    conn.is_system = existing.is_system;
    if conn.password.is_none() && !conn.db_type.is_file_based() {
        conn.password = existing.password.clone();
    }

    let conn = conn.with_default_port();
    conn.validate()?;
    let saved = state.store.save_connection(conn).await?;

    if !saved.same_endpoint(&existing) || !saved.is_enabled() {
        state.registry.dispose(&saved.id).await?;
    }
    Ok(ConnectionSummary::from(&saved))
}

pub async fn delete_connection(state: &AppState, id: &str) -> Result<()> {
    let existing = state.store.get_connection(id).await?;
    if existing.is_system {
        return Err(CoreError::ProtectedConnection(
            existing.name,
            "system connections cannot be deleted".into(),
        ));
    }
    state.store.delete_connection(id).await?;
    state.registry.dispose(id).await?;
    info!("Deleted connection {}", id);
    Ok(())
}

/// Enable or disable a connection; allowed on system connections too.
pub async fn set_connection_status(
    state: &AppState,
    id: &str,
    status: ConnectionStatus,
) -> Result<ConnectionSummary> {
    let mut conn = state.store.get_connection(id).await?;
    conn.status = status;
    let saved = state.store.save_connection(conn).await?;
    if status == ConnectionStatus::Disabled {
        state.registry.dispose(id).await?;
    }
    Ok(ConnectionSummary::from(&saved))
}

/// Check an unsaved descriptor. Never fails; see [`ConnectionTestResult`].
pub async fn test_connection(state: &AppState, conn: &DatabaseConnection) -> ConnectionTestResult {
    db::test_connection(
        state.factory.as_ref(),
        conn,
        state.config.timeouts.connect(),
    )
    .await
}

// ---- introspection ----

pub async fn list_tables(state: &AppState, connection_id: &str) -> Result<Vec<TableInfo>> {
    let driver = driver_for(state, connection_id).await?;
    introspect::list_tables(driver.as_ref(), state.config.timeouts.introspection()).await
}

/// Column drafts for `table`; nothing is persisted.
pub async fn import_columns(
    state: &AppState,
    connection_id: &str,
    table: &str,
) -> Result<ImportedTable> {
    let driver = driver_for(state, connection_id).await?;
    introspect::import_columns(driver.as_ref(), table, state.config.timeouts.introspection()).await
}

/// Import the generator's table and store the drafts as its first column set.
/// A generator that already has columns must use [`sync_columns`].
pub async fn attach_imported_columns(
    state: &AppState,
    generator_id: &str,
) -> Result<Vec<CodeGeneratorColumn>> {
    let generator = state.store.get_generator(generator_id).await?;
    let lock = state.sync_lock(generator_id)?;
    let _guard = lock.lock().await;

    let snapshot = state.store.load_columns(generator_id).await?;
    if !snapshot.columns.is_empty() {
        return Err(CoreError::Validation(format!(
            "generator '{}' already has {} columns; sync them instead",
            generator_id,
            snapshot.columns.len()
        )));
    }

    let connection_id = generator_connection(state, &generator)?;
    let imported = import_columns(state, &connection_id, &generator.table_name).await?;
    for warning in &imported.warnings {
        warn!("Generator {}: {}", generator_id, warning);
    }
    let saved = state
        .store
        .replace_columns(generator_id, snapshot.revision, imported.columns)
        .await?;
    info!(
        "Attached {} columns from {} to generator {}",
        saved.columns.len(),
        generator.table_name,
        generator_id
    );
    Ok(saved.columns)
}

pub async fn sync_columns(state: &AppState, generator_id: &str) -> Result<SyncReport> {
    let generator = state.store.get_generator(generator_id).await?;
    let lock = state.sync_lock(generator_id)?;
    let _guard = lock.lock().await;

    let connection_id = generator_connection(state, &generator)?;
    let driver = driver_for(state, &connection_id).await?;
    sync::sync_generator(
        state.store.as_ref(),
        driver.as_ref(),
        &generator,
        state.config.timeouts.introspection(),
    )
    .await
}

/// Delete a generator and its columns once any sync in flight has finished.
pub async fn delete_generator(state: &AppState, generator_id: &str) -> Result<()> {
    let lock = state.sync_lock(generator_id)?;
    let outcome = {
        let _guard = lock.lock().await;
        state.store.delete_generator(generator_id).await
    };
    state.forget_sync_lock(generator_id);
    outcome?;
    info!("Deleted generator {}", generator_id);
    Ok(())
}

// ---- generation ----

pub async fn preview_code(state: &AppState, generator_id: &str) -> Result<Vec<GeneratedFile>> {
    let generator = state.store.get_generator(generator_id).await?;
    let snapshot = state.store.load_columns(generator_id).await?;
    codegen::render(&generator, &snapshot.columns)
}

pub async fn generate_code(state: &AppState, generator_id: &str) -> Result<GeneratedArchive> {
    let files = preview_code(state, generator_id).await?;
    codegen::package(&files)
}

// ---- execution ----

pub async fn execute_sql(state: &AppState, connection_id: &str, sql: &str) -> Result<SqlOutcome> {
    let driver = driver_for(state, connection_id).await?;
    sqlexec::execute_sql(driver.as_ref(), sql, state.config.timeouts.query()).await
}

pub async fn execute_sql_cancellable(
    state: &AppState,
    connection_id: &str,
    sql: &str,
    cancel: &CancellationToken,
) -> Result<SqlOutcome> {
    let driver = driver_for(state, connection_id).await?;
    sqlexec::execute_sql_cancellable(driver.as_ref(), sql, state.config.timeouts.query(), cancel)
        .await
}

pub async fn get_table_data(
    state: &AppState,
    connection_id: &str,
    table: &str,
    page: u32,
    page_size: u32,
) -> Result<TablePage> {
    let driver = driver_for(state, connection_id).await?;
    sqlexec::get_table_data(
        driver.as_ref(),
        table,
        page,
        page_size,
        state.config.timeouts.query(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use secrecy::SecretString;

    use super::*;
    use crate::config::CoreConfig;
    use crate::models::{ColumnMetadata, DbType, GeneratorOptions, QueryType};
    use crate::state::testing::{FakeDriver, FakeFactory};
    use crate::storage::MemoryStore;

    fn users() -> (TableInfo, Vec<ColumnMetadata>) {
        let mut id = ColumnMetadata::new("id", "int");
        id.is_primary = true;
        id.is_auto_increment = true;
        id.nullable = false;
        let mut name = ColumnMetadata::new("user_name", "varchar(30)");
        name.nullable = false;
        (
            TableInfo {
                table_name: "sys_user".into(),
                table_comment: "accounts".into(),
            },
            vec![id, name, ColumnMetadata::new("created_at", "datetime")],
        )
    }

    fn setup() -> (AppState, Arc<FakeFactory>) {
        let driver = Arc::new(FakeDriver::new(vec![users()]));
        let factory = Arc::new(FakeFactory::new(driver));
        let state = AppState::new(
            CoreConfig::default(),
            Arc::new(MemoryStore::new()),
            factory.clone(),
        );
        (state, factory)
    }

    fn conn(name: &str) -> DatabaseConnection {
        DatabaseConnection {
            id: String::new(),
            name: name.into(),
            db_type: DbType::Mysql,
            host: Some("db.local".into()),
            port: None,
            username: Some("app".into()),
            password: Some(SecretString::new("pw".into())),
            database: Some("app".into()),
            filename: None,
            ssl: false,
            status: ConnectionStatus::Enabled,
            is_system: false,
        }
    }

    async fn seeded_generator(state: &AppState, connection_id: Option<String>) -> String {
        let saved = state
            .store
            .save_generator(CodeGeneratorConfig {
                id: String::new(),
                name: "User".into(),
                table_name: "sys_user".into(),
                module_name: "system".into(),
                business_name: "user".into(),
                connection_id,
                options: GeneratorOptions {
                    generate_api: true,
                    generate_crud: true,
                    generate_routes: false,
                    generate_test: false,
                },
                remark: None,
            })
            .await
            .unwrap();
        saved.id
    }

    #[tokio::test]
    async fn test_create_fills_port_and_hides_password() {
        let (state, _) = setup();
        let summary = create_connection(&state, conn("main")).await.unwrap();
        assert_eq!(summary.port, Some(3306));
        assert!(summary.has_password);
        assert!(!summary.id.is_empty());

        let json = serde_json::to_string(&list_connections(&state).await.unwrap()).unwrap();
        assert!(!json.contains("pw"));
    }

    #[tokio::test]
    async fn test_create_rejects_sqlite_with_host() {
        let (state, _) = setup();
        let mut c = conn("file");
        c.db_type = DbType::Sqlite;
        c.filename = Some("app.db".into());
        assert!(matches!(
            create_connection(&state, c).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_system_connection_protections() {
        let (state, _) = setup();
        let mut c = conn("seeded");
        c.is_system = true;
        let saved = state.store.save_connection(c).await.unwrap();

        let err = delete_connection(&state, &saved.id).await.unwrap_err();
        assert!(matches!(err, CoreError::ProtectedConnection(..)));

        let mut moved = saved.clone();
        moved.host = Some("elsewhere".into());
        let err = update_connection(&state, moved).await.unwrap_err();
        assert!(err.to_string().contains("host"));

        let mut renamed = saved.clone();
        renamed.name = "seeded db".into();
        renamed.is_system = false;
        let summary = update_connection(&state, renamed).await.unwrap();
        assert!(summary.is_system);

        let summary = set_connection_status(&state, &saved.id, ConnectionStatus::Disabled)
            .await
            .unwrap();
        assert_eq!(summary.status, ConnectionStatus::Disabled);
    }

    #[tokio::test]
    async fn test_update_keeps_password_and_disposes_changed_pool() {
        let (state, factory) = setup();
        let id = create_connection(&state, conn("main")).await.unwrap().id;
        list_tables(&state, &id).await.unwrap();
        assert!(state.registry.is_registered(&id));

        let mut edited = state.store.get_connection(&id).await.unwrap();
        edited.password = None;
        edited.database = Some("other".into());
        update_connection(&state, edited).await.unwrap();

        let stored = state.store.get_connection(&id).await.unwrap();
        assert_eq!(stored.password_str(), "pw");
        assert!(!state.registry.is_registered(&id));
        assert_eq!(factory.driver.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_connection_refuses_work() {
        let (state, _) = setup();
        let id = create_connection(&state, conn("main")).await.unwrap().id;
        set_connection_status(&state, &id, ConnectionStatus::Disabled)
            .await
            .unwrap();
        assert!(matches!(
            list_tables(&state, &id).await,
            Err(CoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_test_connection_reports_instead_of_failing() {
        let (state, _) = setup();
        let mut c = conn("candidate");
        c.host = Some("unreachable".into());
        let result = test_connection(&state, &c).await;
        assert!(!result.ok);
        assert!(result.message.contains("refused"));

        assert!(test_connection(&state, &conn("candidate")).await.ok);
    }

    #[tokio::test]
    async fn test_attach_sync_and_generate() {
        let (state, factory) = setup();
        let conn_id = create_connection(&state, conn("main")).await.unwrap().id;
        let gen_id = seeded_generator(&state, Some(conn_id)).await;

        let columns = attach_imported_columns(&state, &gen_id).await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns.iter().all(|c| c.generator_id.as_deref() == Some(gen_id.as_str())));
        assert!(matches!(
            attach_imported_columns(&state, &gen_id).await,
            Err(CoreError::Validation(_))
        ));

        // operator curation survives a sync that adds a column
        let mut name = columns[1].clone();
        name.is_query = true;
        name.query_type = QueryType::LIKE;
        state.store.save_column(name).await.unwrap();
        let (_, mut live) = users();
        live.push(ColumnMetadata::new("email", "varchar(100)"));
        factory.driver.set_columns("sys_user", live);

        let report = sync_columns(&state, &gen_id).await.unwrap();
        assert_eq!(report.added, vec!["email".to_string()]);
        let user_name = report
            .columns
            .iter()
            .find(|c| c.column_name == "user_name")
            .unwrap();
        assert_eq!(user_name.query_type, QueryType::LIKE);

        let again = sync_columns(&state, &gen_id).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.columns, report.columns);

        let files = preview_code(&state, &gen_id).await.unwrap();
        assert_eq!(files.len(), 8);
        let archive = generate_code(&state, &gen_id).await.unwrap();
        assert_eq!(archive.filename, "generated-code.zip");
        assert!(!archive.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_sync_locks_follow_generators() {
        let (state, _) = setup();
        let conn_id = create_connection(&state, conn("main")).await.unwrap().id;

        // unknown ids never get a lock
        assert!(matches!(
            sync_columns(&state, "ghost").await,
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(state.tracked_sync_locks(), 0);

        let gen_id = seeded_generator(&state, Some(conn_id)).await;
        attach_imported_columns(&state, &gen_id).await.unwrap();
        sync_columns(&state, &gen_id).await.unwrap();
        assert_eq!(state.tracked_sync_locks(), 1);

        delete_generator(&state, &gen_id).await.unwrap();
        assert_eq!(state.tracked_sync_locks(), 0);
        assert!(state.store.load_columns(&gen_id).await.unwrap().columns.is_empty());
        assert!(matches!(
            delete_generator(&state, &gen_id).await,
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(state.tracked_sync_locks(), 0);
    }

    #[tokio::test]
    async fn test_generator_falls_back_to_default_connection() {
        let (mut state, _) = setup();
        let conn_id = create_connection(&state, conn("main")).await.unwrap().id;
        let gen_id = seeded_generator(&state, None).await;

        assert!(matches!(
            sync_columns(&state, &gen_id).await,
            Err(CoreError::Validation(_))
        ));

        state.config.default_connection_id = Some(conn_id);
        let report = sync_columns(&state, &gen_id).await.unwrap();
        assert_eq!(report.columns.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let (state, _) = setup();
        assert!(matches!(
            preview_code(&state, "nope").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            execute_sql(&state, "nope", "SELECT 1").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_and_browse() {
        let (state, _) = setup();
        let id = create_connection(&state, conn("main")).await.unwrap().id;
        let outcome = execute_sql(&state, &id, "SELECT * FROM sys_user").await.unwrap();
        assert!(matches!(outcome, SqlOutcome::Rows(_)));

        let page = get_table_data(&state, &id, "sys_user", 2, 10).await.unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.result.row_count, 10);

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            execute_sql_cancellable(&state, &id, "HANG", &token).await,
            Err(CoreError::Cancelled)
        ));
    }
}
