//! Metadata store for connections, generator configs and curated columns.
//!
//! Column sets carry a revision number. `replace_columns` succeeds only when
//! the caller saw the current revision, which is how a sync detects an
//! operator edit that landed between its read and its write.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{CodeGeneratorColumn, CodeGeneratorConfig, DatabaseConnection};

const CONNECTIONS_FILE: &str = "connections.json";
const GENERATORS_FILE: &str = "generators.json";
const COLUMNS_FILE: &str = "columns.json";

/// A generator's column set at one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub revision: u64,
    pub columns: Vec<CodeGeneratorColumn>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_connection(&self, id: &str) -> Result<DatabaseConnection>;
    async fn list_connections(&self) -> Result<Vec<DatabaseConnection>>;
    /// Insert or replace by id; an empty id gets a fresh UUID.
    async fn save_connection(&self, conn: DatabaseConnection) -> Result<DatabaseConnection>;
    async fn delete_connection(&self, id: &str) -> Result<()>;

    async fn get_generator(&self, id: &str) -> Result<CodeGeneratorConfig>;
    async fn list_generators(&self) -> Result<Vec<CodeGeneratorConfig>>;
    async fn save_generator(&self, config: CodeGeneratorConfig) -> Result<CodeGeneratorConfig>;
    /// Removes the generator and its columns.
    async fn delete_generator(&self, id: &str) -> Result<()>;

    /// Current column set; an untouched generator is revision 0 with no columns.
    async fn load_columns(&self, generator_id: &str) -> Result<ColumnSnapshot>;
    /// Swap the whole column set in one step. Fails with
    /// `ReconciliationConflict` and changes nothing when `expected_revision`
    /// is stale.
    async fn replace_columns(
        &self,
        generator_id: &str,
        expected_revision: u64,
        columns: Vec<CodeGeneratorColumn>,
    ) -> Result<ColumnSnapshot>;
    /// Single operator edit; bumps the revision.
    async fn save_column(&self, column: CodeGeneratorColumn) -> Result<CodeGeneratorColumn>;
}

/// Which persisted collection a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Connections,
    Generators,
    Columns,
}

/// In-memory image of every collection.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    connections: Vec<DatabaseConnection>,
    generators: Vec<CodeGeneratorConfig>,
    columns: BTreeMap<String, ColumnSnapshot>,
}

/// Where a store writes committed collections.
pub trait Persist: Send + Sync {
    fn persist(&self, collection: Collection, data: &Collections) -> Result<()>;
}

/// Keeps nothing beyond the process.
#[derive(Debug, Default)]
pub struct Volatile;

impl Persist for Volatile {
    fn persist(&self, _collection: Collection, _data: &Collections) -> Result<()> {
        Ok(())
    }
}

/// One pretty-printed JSON document per collection under a directory.
#[derive(Debug)]
pub struct JsonFiles {
    dir: PathBuf,
}

impl Persist for JsonFiles {
    fn persist(&self, collection: Collection, data: &Collections) -> Result<()> {
        match collection {
            Collection::Connections => {
                write_json(&self.dir.join(CONNECTIONS_FILE), &data.connections)
            }
            Collection::Generators => write_json(&self.dir.join(GENERATORS_FILE), &data.generators),
            Collection::Columns => write_json(&self.dir.join(COLUMNS_FILE), &data.columns),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| store_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| store_error(path, e))?;
    Ok(())
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).map_err(|e| store_error(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| CoreError::Store(format!("{} is corrupt: {}", path.display(), e)))
}

fn store_error(path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Store(format!("{}: {}", path.display(), err))
}

/// Store over [`Collections`]; every mutation is applied to a copy, persisted,
/// and only then made visible.
pub struct CollectionStore<P: Persist> {
    data: Mutex<Collections>,
    backing: P,
}

pub type MemoryStore = CollectionStore<Volatile>;
pub type JsonFileStore = CollectionStore<JsonFiles>;

impl CollectionStore<Volatile> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Collections::default()),
            backing: Volatile,
        }
    }
}

impl Default for CollectionStore<Volatile> {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore<JsonFiles> {
    /// Open (creating if needed) a store directory and load what it holds.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| store_error(&dir, e))?;

        let data = Collections {
            connections: read_json(&dir.join(CONNECTIONS_FILE))?,
            generators: read_json(&dir.join(GENERATORS_FILE))?,
            columns: read_json(&dir.join(COLUMNS_FILE))?,
        };
        debug!(
            "Opened metadata store {} ({} connections, {} generators)",
            dir.display(),
            data.connections.len(),
            data.generators.len()
        );

        Ok(Self {
            data: Mutex::new(data),
            backing: JsonFiles { dir },
        })
    }
}

impl<P: Persist> CollectionStore<P> {
    async fn commit<T>(
        &self,
        collection: Collection,
        apply: impl FnOnce(&mut Collections) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.data.lock().await;
        let mut next = guard.clone();
        let out = apply(&mut next)?;
        self.backing.persist(collection, &next)?;
        *guard = next;
        Ok(out)
    }
}

fn ensure_id(id: &mut String) {
    if id.trim().is_empty() {
        *id = Uuid::new_v4().to_string();
    }
}

#[async_trait]
impl<P: Persist> MetadataStore for CollectionStore<P> {
    async fn get_connection(&self, id: &str) -> Result<DatabaseConnection> {
        let data = self.data.lock().await;
        data.connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("connection", id))
    }

    async fn list_connections(&self) -> Result<Vec<DatabaseConnection>> {
        Ok(self.data.lock().await.connections.clone())
    }

    async fn save_connection(&self, mut conn: DatabaseConnection) -> Result<DatabaseConnection> {
        ensure_id(&mut conn.id);
        self.commit(Collection::Connections, |data| {
            // Replace if exists (by id) or add
            if let Some(pos) = data.connections.iter().position(|c| c.id == conn.id) {
                data.connections[pos] = conn.clone();
            } else {
                data.connections.push(conn.clone());
            }
            Ok(conn)
        })
        .await
    }

    async fn delete_connection(&self, id: &str) -> Result<()> {
        self.commit(Collection::Connections, |data| {
            let before = data.connections.len();
            data.connections.retain(|c| c.id != id);
            if data.connections.len() == before {
                return Err(CoreError::not_found("connection", id));
            }
            Ok(())
        })
        .await
    }

    async fn get_generator(&self, id: &str) -> Result<CodeGeneratorConfig> {
        let data = self.data.lock().await;
        data.generators
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("generator", id))
    }

    async fn list_generators(&self) -> Result<Vec<CodeGeneratorConfig>> {
        Ok(self.data.lock().await.generators.clone())
    }

    async fn save_generator(&self, mut config: CodeGeneratorConfig) -> Result<CodeGeneratorConfig> {
        ensure_id(&mut config.id);
        self.commit(Collection::Generators, |data| {
            if let Some(pos) = data.generators.iter().position(|g| g.id == config.id) {
                data.generators[pos] = config.clone();
            } else {
                data.generators.push(config.clone());
            }
            Ok(config)
        })
        .await
    }

    async fn delete_generator(&self, id: &str) -> Result<()> {
        self.commit(Collection::Generators, |data| {
            let before = data.generators.len();
            data.generators.retain(|g| g.id != id);
            if data.generators.len() == before {
                return Err(CoreError::not_found("generator", id));
            }
            Ok(())
        })
        .await?;

        self.commit(Collection::Columns, |data| {
            data.columns.remove(id);
            Ok(())
        })
        .await
    }

    async fn load_columns(&self, generator_id: &str) -> Result<ColumnSnapshot> {
        let data = self.data.lock().await;
        Ok(data.columns.get(generator_id).cloned().unwrap_or_default())
    }

    async fn replace_columns(
        &self,
        generator_id: &str,
        expected_revision: u64,
        columns: Vec<CodeGeneratorColumn>,
    ) -> Result<ColumnSnapshot> {
        self.commit(Collection::Columns, |data| {
            let current = data.columns.get(generator_id).map_or(0, |s| s.revision);
            if current != expected_revision {
                return Err(CoreError::conflict(
                    generator_id,
                    format!(
                        "column set changed (revision {} expected, found {})",
                        expected_revision, current
                    ),
                ));
            }

            let columns = columns
                .into_iter()
                .map(|mut col| {
                    col.generator_id = Some(generator_id.to_string());
                    if col.id.is_none() {
                        col.id = Some(Uuid::new_v4().to_string());
                    }
                    col
                })
                .collect();
            let snapshot = ColumnSnapshot {
                revision: current + 1,
                columns,
            };
            data.columns
                .insert(generator_id.to_string(), snapshot.clone());
            Ok(snapshot)
        })
        .await
    }

    async fn save_column(&self, mut column: CodeGeneratorColumn) -> Result<CodeGeneratorColumn> {
        let generator_id = column
            .generator_id
            .clone()
            .ok_or_else(|| CoreError::Validation("column has no generator".into()))?;

        self.commit(Collection::Columns, |data| {
            let snapshot = data.columns.entry(generator_id).or_default();
            match column.id.as_deref() {
                Some(id) => {
                    let slot = snapshot
                        .columns
                        .iter_mut()
                        .find(|c| c.id.as_deref() == Some(id))
                        .ok_or_else(|| CoreError::not_found("column", id))?;
                    *slot = column.clone();
                }
                None => {
                    if snapshot
                        .columns
                        .iter()
                        .any(|c| c.column_name == column.column_name)
                    {
                        return Err(CoreError::Validation(format!(
                            "column {} already exists",
                            column.column_name
                        )));
                    }
                    column.id = Some(Uuid::new_v4().to_string());
                    snapshot.columns.push(column.clone());
                }
            }
            snapshot.revision += 1;
            Ok(column)
        })
        .await
    }
}
