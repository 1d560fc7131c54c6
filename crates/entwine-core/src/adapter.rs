//! Persistence adapter trait and the in-memory reference implementation

use crate::entity::{Entity, EntityId, EntityKey, EntityType};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A single staged write
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put(Entity),
    Erase(EntityKey),
}

/// Writes collected by one transaction, applied atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put; the entity must already carry its identifier
    pub fn put(&mut self, entity: Entity) {
        self.changes.push(Change::Put(entity));
    }

    pub fn erase(&mut self, key: EntityKey) {
        self.changes.push(Change::Erase(key));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Durability seam of the graph manager
///
/// Implementations only move entities in and out; every relationship
/// invariant is enforced by the manager before a change set reaches
/// [`apply`](PersistenceAdapter::apply).
pub trait PersistenceAdapter: Send + Sync {
    /// Load one entity; `None` when absent
    fn load(&self, key: &EntityKey) -> Result<Option<Entity>>;

    /// All entities of one type, ascending by identifier
    fn scan(&self, entity_type: &EntityType) -> Result<Vec<Entity>>;

    /// Reserve the next identifier for `entity_type`
    ///
    /// Identifiers are never handed out twice, even when the transaction that
    /// reserved one is rolled back.
    fn next_id(&self, entity_type: &EntityType) -> Result<EntityId>;

    /// Apply every change or none of them
    fn apply(&self, changes: ChangeSet) -> Result<()>;

    /// Store a single entity, assigning an identifier when it has none
    fn store(&self, mut entity: Entity) -> Result<EntityId> {
        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = self.next_id(entity.entity_type())?;
                entity.assign_id(id);
                id
            }
        };
        let mut changes = ChangeSet::new();
        changes.put(entity);
        self.apply(changes)?;
        Ok(id)
    }

    /// Erase a single entity
    fn erase(&self, key: &EntityKey) -> Result<()> {
        if self.load(key)?.is_none() {
            return Err(Error::not_found(key));
        }
        let mut changes = ChangeSet::new();
        changes.erase(key.clone());
        self.apply(changes)
    }
}

/// In-memory storage backend
///
/// Maps `(type, id)` to entity. Useful for tests and short-lived graphs.
pub struct MemoryAdapter {
    entities: RwLock<BTreeMap<EntityKey, Entity>>,
    sequences: RwLock<BTreeMap<EntityType, u64>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            sequences: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored entities across all types
    pub fn len(&self) -> Result<usize> {
        let entities = self
            .entities
            .read()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))?;
        Ok(entities.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn load(&self, key: &EntityKey) -> Result<Option<Entity>> {
        let entities = self
            .entities
            .read()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))?;
        Ok(entities.get(key).cloned())
    }

    fn scan(&self, entity_type: &EntityType) -> Result<Vec<Entity>> {
        let entities = self
            .entities
            .read()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))?;
        // BTreeMap order is (type, id), so each type is one ascending run
        Ok(entities
            .iter()
            .filter(|(key, _)| key.entity_type == *entity_type)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn next_id(&self, entity_type: &EntityType) -> Result<EntityId> {
        let mut sequences = self
            .sequences
            .write()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))?;
        let next = sequences.entry(entity_type.clone()).or_insert(0);
        *next += 1;
        Ok(EntityId(*next))
    }

    fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))?;

        // Validate first so a bad change leaves the map untouched
        for change in changes.iter() {
            if let Change::Put(entity) = change {
                if entity.key().is_none() {
                    return Err(Error::InvalidArgument(format!(
                        "cannot store a transient {} entity",
                        entity.entity_type()
                    )));
                }
            }
        }

        for change in changes {
            match change {
                Change::Put(entity) => {
                    if let Some(key) = entity.key() {
                        entities.insert(key, entity);
                    }
                }
                Change::Erase(key) => {
                    entities.remove(&key);
                }
            }
        }
        Ok(())
    }
}
