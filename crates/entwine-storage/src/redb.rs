//! ReDB storage backend

use crate::error::{StorageError, StorageResult};
use crate::migration::Migratable;
use entwine_core::{Change, ChangeSet, Entity, EntityId, EntityKey, EntityType, PersistenceAdapter};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

// Table definitions
const ENTITIES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("entities");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
const META: TableDefinition<&str, u32> = TableDefinition::new("meta");

const VERSION_KEY: &str = "schema_version";

/// ReDB storage backend
///
/// Entities are stored as JSON under `(type, id)`, so a type scan is a single
/// ordered range read.
pub struct RedbStorage {
    db: Mutex<Database>,
    path: PathBuf,
}

impl RedbStorage {
    /// Open or create a ReDB database at the given path and bring its
    /// layout up to date
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(|e| StorageError::Database(e.to_string()))?;
        let storage = Self {
            db: Mutex::new(db),
            path,
        };
        storage.migrate_to_latest()?;
        tracing::debug!("Opened redb store at {}", storage.path.display());
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self) -> StorageResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))
    }

    /// Number of stored entities across all types
    pub fn len(&self) -> StorageResult<usize> {
        let db = self.db()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        let len = table.len()?;
        Ok(len as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn decode(key: &EntityKey, bytes: &[u8]) -> StorageResult<Entity> {
        let entity: Entity = serde_json::from_slice(bytes)?;
        if entity.key().as_ref() != Some(key) {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                reason: format!(
                    "row holds {}",
                    entity
                        .key()
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "a transient entity".to_string())
                ),
            });
        }
        Ok(entity)
    }

    fn load_entity(&self, key: &EntityKey) -> StorageResult<Option<Entity>> {
        let db = self.db()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;

        let entity = match table.get((key.entity_type.as_str(), key.id.0))? {
            Some(value) => Some(Self::decode(key, value.value())?),
            None => None,
        };
        Ok(entity)
    }

    fn scan_type(&self, entity_type: &EntityType) -> StorageResult<Vec<Entity>> {
        let ty = entity_type.as_str();
        let db = self.db()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;

        let mut entities = Vec::new();
        for entry in table.range((ty, 0u64)..=(ty, u64::MAX))? {
            let (key, value) = entry?;
            let key = EntityKey::new(entity_type.clone(), key.value().1);
            entities.push(Self::decode(&key, value.value())?);
        }
        Ok(entities)
    }

    fn reserve_id(&self, entity_type: &EntityType) -> StorageResult<EntityId> {
        let db = self.db()?;
        let write_txn = db.begin_write()?;
        let next = {
            let mut table = write_txn.open_table(SEQUENCES)?;
            let current = table.get(entity_type.as_str())?.map(|v| v.value()).unwrap_or(0);
            table.insert(entity_type.as_str(), current + 1)?;
            current + 1
        };
        write_txn.commit()?;
        Ok(EntityId(next))
    }

    fn apply_changes(&self, changes: ChangeSet) -> StorageResult<()> {
        let count = changes.len();
        let db = self.db()?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITIES)?;
            for change in changes {
                match change {
                    Change::Put(entity) => {
                        let Some(key) = entity.key() else {
                            continue;
                        };
                        let value = serde_json::to_vec(&entity)?;
                        table.insert((key.entity_type.as_str(), key.id.0), value.as_slice())?;
                    }
                    Change::Erase(key) => {
                        table.remove((key.entity_type.as_str(), key.id.0))?;
                    }
                }
            }
        }
        write_txn.commit()?;
        tracing::debug!("Applied {} changes in single transaction", count);
        Ok(())
    }
}

impl Migratable for RedbStorage {
    fn get_schema_version(&self) -> StorageResult<u32> {
        let db = self.db()?;
        let read_txn = db.begin_read()?;
        let table = match read_txn.open_table(META) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let version = table.get(VERSION_KEY)?.map(|v| v.value()).unwrap_or(0);
        Ok(version)
    }

    fn set_schema_version(&self, version: u32) -> StorageResult<()> {
        let db = self.db()?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(META)?;
            table.insert(VERSION_KEY, version)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn run_migration(&self, version: u32) -> StorageResult<()> {
        match version {
            1 => {
                let db = self.db()?;
                let write_txn = db.begin_write()?;
                {
                    write_txn.open_table(ENTITIES)?;
                    write_txn.open_table(SEQUENCES)?;
                    write_txn.open_table(META)?;
                }
                write_txn.commit()?;
                Ok(())
            }
            other => Err(StorageError::Migration(format!(
                "no migration defined for version {}",
                other
            ))),
        }
    }
}

impl PersistenceAdapter for RedbStorage {
    fn load(&self, key: &EntityKey) -> entwine_core::Result<Option<Entity>> {
        Ok(self.load_entity(key)?)
    }

    fn scan(&self, entity_type: &EntityType) -> entwine_core::Result<Vec<Entity>> {
        Ok(self.scan_type(entity_type)?)
    }

    fn next_id(&self, entity_type: &EntityType) -> entwine_core::Result<EntityId> {
        Ok(self.reserve_id(entity_type)?)
    }

    fn apply(&self, changes: ChangeSet) -> entwine_core::Result<()> {
        // Reject the whole set before opening a write transaction
        for change in changes.iter() {
            if let Change::Put(entity) = change {
                if entity.key().is_none() {
                    return Err(entwine_core::Error::InvalidArgument(format!(
                        "cannot store a transient {} entity",
                        entity.entity_type()
                    )));
                }
            }
        }
        Ok(self.apply_changes(changes)?)
    }
}
