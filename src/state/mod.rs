//! Connection registry (one pooled driver per connection id) and the shared
//! application state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::{CoreConfig, PoolSettings};
use crate::db::{DatabaseDriver, DriverFactory, NativeDriverFactory, PoolStatus};
use crate::error::{CoreError, Result};
use crate::models::DatabaseConnection;
use crate::storage::{JsonFileStore, MetadataStore};

struct RegisteredDriver {
    /// Parameters the pool was built from.
    params: DatabaseConnection,
    driver: Arc<dyn DatabaseDriver>,
}

pub struct ConnectionRegistry {
    factory: Arc<dyn DriverFactory>,
    pool: PoolSettings,
    connections: Mutex<HashMap<String, RegisteredDriver>>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn DriverFactory>, pool: PoolSettings) -> Self {
        Self {
            factory,
            pool,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RegisteredDriver>>> {
        self.connections
            .lock()
            .map_err(|_| CoreError::Connection("connection registry poisoned".into()))
    }

    /// Driver for a stored connection, creating its pool on first use.
    ///
    /// A record whose parameters no longer match the live pool gets a fresh
    /// pool; the stale one is closed.
    pub async fn acquire(&self, conn: &DatabaseConnection) -> Result<Arc<dyn DatabaseDriver>> {
        if !conn.is_enabled() {
            return Err(CoreError::Connection(format!(
                "connection '{}' is disabled",
                conn.name
            )));
        }

        let stale = {
            let mut connections = self.lock()?;
            match connections.get(&conn.id) {
                Some(entry) if entry.params.same_endpoint(conn) => {
                    return Ok(entry.driver.clone());
                }
                Some(_) => connections.remove(&conn.id).map(|e| e.driver),
                None => None,
            }
        };
        if let Some(driver) = stale {
            info!("Connection {} changed, replacing pool", conn.id);
            driver.close().await;
        }

        // connect outside the lock so slow handshakes don't block other ids
        let driver = self.factory.connect(conn, &self.pool).await?;

        let (winner, loser) = {
            let mut connections = self.lock()?;
            match connections.get(&conn.id) {
                Some(entry) if entry.params.same_endpoint(conn) => {
                    (entry.driver.clone(), Some(driver))
                }
                _ => {
                    connections.insert(
                        conn.id.clone(),
                        RegisteredDriver {
                            params: conn.clone(),
                            driver: driver.clone(),
                        },
                    );
                    (driver, None)
                }
            }
        };
        if let Some(loser) = loser {
            loser.close().await;
        }

        debug!("Registered driver for {}", conn.display_target());
        Ok(winner)
    }

    /// Close and forget the pool for `id`, if any.
    pub async fn dispose(&self, id: &str) -> Result<bool> {
        let removed = self.lock()?.remove(id);
        match removed {
            Some(entry) => {
                info!("Disposing pool for connection {}", id);
                entry.driver.close().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.lock().map(|c| c.contains_key(id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pool_status(&self, id: &str) -> Option<PoolStatus> {
        self.lock()
            .ok()?
            .get(id)
            .map(|entry| entry.driver.pool_status())
    }

    pub async fn close_all(&self) {
        let drained: Vec<RegisteredDriver> = match self.lock() {
            Ok(mut connections) => connections.drain().map(|(_, e)| e).collect(),
            Err(_) => return,
        };
        for entry in drained {
            entry.driver.close().await;
        }
    }
}

/// Shared services behind every command.
pub struct AppState {
    pub config: CoreConfig,
    pub store: Arc<dyn MetadataStore>,
    pub registry: ConnectionRegistry,
    pub factory: Arc<dyn DriverFactory>,
    /// One lock per existing generator so syncs of the same generator run one
    /// at a time. Entries go away with the generator.
    sync_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        config: CoreConfig,
        store: Arc<dyn MetadataStore>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(factory.clone(), config.pool.clone()),
            config,
            store,
            factory,
            sync_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Native drivers over the JSON store at `config.store.path`.
    pub fn open(config: CoreConfig) -> Result<Self> {
        let store = JsonFileStore::open(&config.store.path)?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(NativeDriverFactory),
        ))
    }

    pub(crate) fn sync_lock(&self, generator_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .sync_locks
            .lock()
            .map_err(|_| CoreError::Store("sync lock table poisoned".into()))?;
        Ok(locks
            .entry(generator_id.to_string())
            .or_default()
            .clone())
    }

    pub(crate) fn forget_sync_lock(&self, generator_id: &str) {
        if let Ok(mut locks) = self.sync_locks.lock() {
            locks.remove(generator_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_sync_locks(&self) -> usize {
        self.sync_locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process driver used by registry, sync and execution tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::db::{StatementOutput, TableDescription};
    use crate::models::{ColumnMetadata, DbType, FieldDescriptor, TableInfo};

    /// Fake driver over a fixed table set. A statement of `HANG` parks on a
    /// pool permit until cancelled.
    pub struct FakeDriver {
        pub tables: StdMutex<Vec<(TableInfo, Vec<ColumnMetadata>)>>,
        pub permits: Arc<Semaphore>,
        pub capacity: usize,
        pub closed: AtomicUsize,
    }

    impl FakeDriver {
        pub fn new(tables: Vec<(TableInfo, Vec<ColumnMetadata>)>) -> Self {
            Self {
                tables: StdMutex::new(tables),
                permits: Arc::new(Semaphore::new(2)),
                capacity: 2,
                closed: AtomicUsize::new(0),
            }
        }

        pub fn set_columns(&self, table: &str, columns: Vec<ColumnMetadata>) {
            let mut tables = self.tables.lock().unwrap();
            if let Some(entry) = tables.iter_mut().find(|(t, _)| t.table_name == table) {
                entry.1 = columns;
            }
        }

        fn columns(&self, table: &str) -> Option<Vec<ColumnMetadata>> {
            self.tables
                .lock()
                .unwrap()
                .iter()
                .find(|(t, _)| t.table_name == table)
                .map(|(_, c)| c.clone())
        }
    }

    #[async_trait]
    impl DatabaseDriver for FakeDriver {
        fn db_type(&self) -> DbType {
            DbType::Mysql
        }

        async fn list_tables(&self) -> Result<Vec<TableInfo>> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _)| t.clone())
                .collect())
        }

        async fn describe_table(&self, table: &str) -> Result<TableDescription> {
            let columns = self
                .columns(table)
                .ok_or_else(|| CoreError::introspection(table, "table not found"))?;
            Ok(TableDescription {
                columns,
                warnings: Vec::new(),
            })
        }

        async fn run_query(&self, sql: &str, limit: Option<usize>) -> Result<StatementOutput> {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| CoreError::Connection(e.to_string()))?;

            let trimmed = sql.trim();
            if trimmed == "HANG" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if trimmed.to_uppercase().starts_with("SELECT") {
                let fields = vec![
                    FieldDescriptor {
                        name: "id".into(),
                        type_name: "INT".into(),
                    },
                    FieldDescriptor {
                        name: "name".into(),
                        type_name: "VARCHAR".into(),
                    },
                    FieldDescriptor {
                        name: "id".into(),
                        type_name: "INT".into(),
                    },
                ];
                let mut rows: Vec<Vec<Value>> = (1..=3)
                    .map(|i| vec![Value::from(i), Value::from(format!("n{}", i)), Value::from(i * 10)])
                    .collect();
                if let Some(limit) = limit {
                    rows.truncate(limit);
                }
                return Ok(StatementOutput::Rows { fields, rows });
            }
            if trimmed.to_uppercase().starts_with("SELEC") {
                return Err(CoreError::sql(
                    crate::error::SqlErrorKind::Syntax,
                    "You have an error in your SQL syntax",
                ));
            }
            Ok(StatementOutput::Affected(2))
        }

        async fn fetch_page(
            &self,
            _table: &str,
            limit: u64,
            offset: u64,
        ) -> Result<StatementOutput> {
            let fields = vec![FieldDescriptor {
                name: "n".into(),
                type_name: "INT".into(),
            }];
            let rows = (offset..25)
                .take(limit as usize)
                .map(|n| vec![Value::from(n)])
                .collect();
            Ok(StatementOutput::Rows { fields, rows })
        }

        async fn count_rows(&self, _table: &str) -> Result<u64> {
            Ok(25)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn pool_status(&self) -> PoolStatus {
            PoolStatus {
                size: self.capacity as u32,
                idle: self.permits.available_permits() as u32,
            }
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Hands out one shared [`FakeDriver`] and counts connects.
    pub struct FakeFactory {
        pub driver: Arc<FakeDriver>,
        pub connects: AtomicUsize,
    }

    impl FakeFactory {
        pub fn new(driver: Arc<FakeDriver>) -> Self {
            Self {
                driver,
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DriverFactory for FakeFactory {
        async fn connect(
            &self,
            conn: &DatabaseConnection,
            _pool: &PoolSettings,
        ) -> Result<Arc<dyn DatabaseDriver>> {
            conn.validate()?;
            if conn.host.as_deref() == Some("unreachable") {
                return Err(CoreError::Connection("connection refused".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.driver.clone())
        }
    }
}
