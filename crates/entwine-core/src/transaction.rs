//! Staged writes over a persistence adapter
//!
//! A [`Transaction`] reads through to the adapter and keeps its own writes in
//! a staging map until the graph manager commits them as one
//! [`ChangeSet`]. Every public operation is atomic within the transaction:
//! when it fails, staging is restored to what it was before the call.

use crate::adapter::{ChangeSet, PersistenceAdapter};
use crate::cascade::CascadeWalker;
use crate::entity::{Attribute, Entity, EntityId, EntityKey, EntityType, Reference, Slot};
use crate::error::{Error, Result};
use crate::graph::DeleteReport;
use crate::schema::{AttributeKind, Binding, CascadeOp, EntityTypeDef, Schema};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use ulid::Ulid;

/// Transaction identifier, carried on tracing spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub Ulid);

impl TxId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference written into a cascaded child before it is saved
struct BackRef {
    slot: String,
    many: bool,
    parent: EntityKey,
}

impl BackRef {
    fn attach(self, child: &mut Entity) {
        let (present, empty) = match child.get_slot(&self.slot) {
            Some(slot) => (slot.contains(&self.parent), slot.is_empty()),
            None => (false, true),
        };
        if present {
            return;
        }
        if empty {
            child.set_slot(self.slot, Slot::from_keys(vec![self.parent], self.many));
        } else if self.many {
            child.add_to(self.slot, self.parent);
        }
        // An occupied single slot is left alone; linking then reports the conflict
    }
}

/// A unit of work against the graph
///
/// Obtained from [`GraphManager::transaction`](crate::GraphManager::transaction).
pub struct Transaction<'g, A: PersistenceAdapter + ?Sized> {
    id: TxId,
    schema: &'g Schema,
    adapter: &'g A,
    /// `None` marks an erased entity
    staged: BTreeMap<EntityKey, Option<Entity>>,
}

impl<'g, A: PersistenceAdapter + ?Sized> Transaction<'g, A> {
    pub(crate) fn new(schema: &'g Schema, adapter: &'g A) -> Self {
        Self {
            id: TxId::new(),
            schema,
            adapter,
            staged: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    /// Number of entities written or erased so far
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    pub(crate) fn into_changes(self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for (key, staged) in self.staged {
            match staged {
                Some(entity) => changes.put(entity),
                None => changes.erase(key),
            }
        }
        changes
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Current state of an entity as seen by this transaction
    pub fn get(&self, key: &EntityKey) -> Result<Option<Entity>> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.adapter.load(key),
        }
    }

    fn require(&self, key: &EntityKey) -> Result<Entity> {
        self.get(key)?.ok_or_else(|| Error::not_found(key))
    }

    pub fn find_by_id(&self, entity_type: &EntityType, id: EntityId) -> Result<Entity> {
        self.require(&EntityKey::new(entity_type.clone(), id))
    }

    /// Every entity of `entity_type`, ascending by identifier
    pub fn find_all(&self, entity_type: &EntityType) -> Result<Vec<Entity>> {
        let mut by_id: BTreeMap<EntityId, Entity> = self
            .adapter
            .scan(entity_type)?
            .into_iter()
            .filter_map(|e| e.id().map(|id| (id, e)))
            .collect();
        for (key, staged) in self.staged.iter().filter(|(k, _)| k.entity_type == *entity_type) {
            match staged {
                Some(entity) => {
                    by_id.insert(key.id, entity.clone());
                }
                None => {
                    by_id.remove(&key.id);
                }
            }
        }
        Ok(by_id.into_values().collect())
    }

    /// Entities referenced from `holder.slot` that still exist
    pub fn resolve(&self, holder: &Entity, slot: &str) -> Result<Vec<Entity>> {
        let ty = holder.entity_type();
        if self.schema.binding(ty, slot).is_none() {
            return Err(unknown_slot(ty, slot));
        }
        let mut found = Vec::new();
        for key in holder.slot_keys(slot) {
            if let Some(entity) = self.get(&key)? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Save `entity` and every transient entity reachable through slots that
    /// cascade saves; returns the stored root
    pub fn save(&mut self, entity: Entity) -> Result<Entity> {
        self.atomically(|tx| {
            let mut visited = HashSet::new();
            let key = tx.save_entity(entity, None, &mut visited)?;
            tracing::debug!("Saved {} ({} entities in tx {})", key, visited.len(), tx.id);
            tx.require(&key)
        })
    }

    /// Delete `key` together with everything its delete cascade reaches
    pub fn delete(&mut self, key: &EntityKey) -> Result<DeleteReport> {
        self.atomically(|tx| tx.delete_entity(key))
    }

    /// Add `to` to `from.slot`, mirroring the inverse side
    pub fn link(&mut self, from: &EntityKey, slot: &str, to: &EntityKey) -> Result<()> {
        self.atomically(|tx| {
            let binding = tx.checked_binding(from, slot, to)?;
            let holder = tx.require(from)?;
            tx.require(to)?;

            let mut keys = holder.slot_keys(slot);
            if keys.contains(to) {
                return Ok(());
            }
            if !binding.is_many() {
                if let Some(current) = keys.first() {
                    if tx.get(current)?.is_some() {
                        return Err(Error::CardinalityViolation(format!(
                            "{}.{} already references {}",
                            from, slot, current
                        )));
                    }
                    keys.clear();
                }
            }
            keys.push(to.clone());
            tx.write_slot(from, binding, keys)
        })
    }

    /// Remove `to` from `from.slot`, mirroring the inverse side
    pub fn unlink(&mut self, from: &EntityKey, slot: &str, to: &EntityKey) -> Result<()> {
        self.atomically(|tx| {
            let binding = tx.checked_binding(from, slot, to)?;
            let holder = tx.require(from)?;
            let mut keys = holder.slot_keys(slot);
            if !keys.contains(to) {
                return Err(Error::NotFound(format!(
                    "{} is not linked to {} through {}",
                    from, to, slot
                )));
            }
            keys.retain(|k| k != to);
            if binding.is_required() && keys.is_empty() {
                return Err(required_slot(binding));
            }
            tx.write_slot(from, binding, keys)
        })
    }

    /// Drop the dangling references of `key` and clear its repair flag
    pub fn repair(&mut self, key: &EntityKey) -> Result<Entity> {
        self.atomically(|tx| {
            let schema = tx.schema;
            let mut entity = tx.require(key)?;
            let dangling = entity.take_dangling();
            if dangling.is_empty() {
                return Ok(entity);
            }
            for binding in schema.bindings(entity.entity_type()) {
                let keys = entity.slot_keys(binding.slot());
                let kept: Vec<EntityKey> =
                    keys.iter().filter(|k| !dangling.contains(k)).cloned().collect();
                if kept.len() == keys.len() {
                    continue;
                }
                if binding.is_required() && kept.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "{}.{} is required; save {} with a replacement instead",
                        binding.holder(),
                        binding.slot(),
                        key
                    )));
                }
                entity.set_slot(binding.slot(), Slot::from_keys(kept, binding.is_many()));
            }
            tracing::info!("Repaired {} ({} dangling references dropped)", key, dangling.len());
            tx.stage(entity.clone());
            Ok(entity)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn atomically<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.staged.clone();
        let result = op(self);
        if result.is_err() {
            self.staged = snapshot;
        }
        result
    }

    fn stage(&mut self, entity: Entity) {
        if let Some(key) = entity.key() {
            self.staged.insert(key, Some(entity));
        }
    }

    fn checked_binding(&self, from: &EntityKey, slot: &str, to: &EntityKey) -> Result<Binding<'g>> {
        let binding = self
            .schema
            .binding(&from.entity_type, slot)
            .ok_or_else(|| unknown_slot(&from.entity_type, slot))?;
        if to.entity_type != *binding.target() {
            return Err(Error::TypeMismatch(format!(
                "{}.{} holds {} entities, not {}",
                from.entity_type,
                slot,
                binding.target(),
                to.entity_type
            )));
        }
        Ok(binding)
    }

    fn type_def(&self, ty: &EntityType) -> Result<&'g EntityTypeDef> {
        self.schema
            .type_def(ty)
            .ok_or_else(|| Error::TypeMismatch(format!("entity type {} is not registered", ty)))
    }

    fn check_attributes(&self, def: &EntityTypeDef, entity: &Entity) -> Result<()> {
        for (name, value) in entity.attributes() {
            let declared = def.attribute(name).ok_or_else(|| {
                Error::TypeMismatch(format!("{} has no attribute {}", def.name, name))
            })?;
            let kind_matches = matches!(
                (declared.kind, value),
                (AttributeKind::Scalar, Attribute::Scalar(_))
                    | (AttributeKind::Embedded, Attribute::Embedded(_))
            );
            if !kind_matches {
                let expected = match declared.kind {
                    AttributeKind::Scalar => "a scalar",
                    AttributeKind::Embedded => "an embedded value object",
                };
                return Err(Error::TypeMismatch(format!(
                    "{}.{} must be {}",
                    def.name, name, expected
                )));
            }
        }
        for declared in def.attributes.iter().filter(|a| a.required) {
            match entity.get_attribute(&declared.name) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "{}.{} is required",
                        def.name, declared.name
                    )))
                }
            }
        }
        let holder = entity.key();
        for declared in def.attributes.iter().filter(|a| a.unique) {
            let Some(value) = entity.get_attribute(&declared.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = self.find_all(&def.name)?.into_iter().find(|other| {
                other.key() != holder && other.get_attribute(&declared.name) == Some(value)
            });
            if let Some(other) = taken.and_then(|e| e.key()) {
                return Err(Error::InvalidArgument(format!(
                    "{}.{} must be unique; {} already holds that value",
                    def.name, declared.name, other
                )));
            }
        }
        Ok(())
    }

    /// Give a freshly loaded or created entity an empty value for every slot
    /// its type carries
    fn materialize(&self, entity: &mut Entity) {
        for binding in self.schema.bindings(entity.entity_type()) {
            if entity.get_slot(binding.slot()).is_none() {
                entity.set_slot(binding.slot(), Slot::from_keys(Vec::new(), binding.is_many()));
            }
        }
    }

    fn save_entity(
        &mut self,
        mut entity: Entity,
        back_ref: Option<BackRef>,
        visited: &mut HashSet<EntityKey>,
    ) -> Result<EntityKey> {
        let schema = self.schema;
        let ty = entity.entity_type().clone();
        let def = self.type_def(&ty)?;
        self.check_attributes(def, &entity)?;
        if let Some(name) = entity
            .slots()
            .keys()
            .find(|name| schema.binding(&ty, name).is_none())
        {
            return Err(unknown_slot(&ty, name));
        }
        if let Some(back_ref) = back_ref {
            back_ref.attach(&mut entity);
        }

        let key = match entity.id() {
            Some(id) => {
                let key = EntityKey::new(ty.clone(), id);
                if visited.contains(&key) {
                    return Ok(key);
                }
                let mut stored = self.require(&key)?;
                self.materialize(&mut stored);
                self.stage(stored);
                key
            }
            None => {
                let id = self.adapter.next_id(&ty)?;
                let mut shell = Entity::new(ty.clone());
                shell.assign_id(id);
                self.materialize(&mut shell);
                self.stage(shell);
                EntityKey::new(ty.clone(), id)
            }
        };
        visited.insert(key.clone());

        let mut payload = entity.take_slots();
        for binding in schema.bindings(&ty) {
            let Some(slot) = payload.remove(binding.slot()) else {
                continue;
            };
            let refs = slot.into_refs();
            if !binding.is_many() && refs.len() > 1 {
                return Err(Error::CardinalityViolation(format!(
                    "{}.{} is single-valued but was given {} references",
                    ty,
                    binding.slot(),
                    refs.len()
                )));
            }

            let mut keys: Vec<EntityKey> = Vec::with_capacity(refs.len());
            for reference in refs {
                if reference.entity_type() != binding.target() {
                    return Err(Error::TypeMismatch(format!(
                        "{}.{} holds {} entities, not {}",
                        ty,
                        binding.slot(),
                        binding.target(),
                        reference.entity_type()
                    )));
                }
                let target = match reference {
                    Reference::Key(target) => {
                        self.check_target(&key, binding, &target)?;
                        target
                    }
                    Reference::Inline(child) => match child.key() {
                        Some(target) => {
                            self.check_target(&key, binding, &target)?;
                            target
                        }
                        None if binding.cascade().includes(CascadeOp::Save) => {
                            let back_ref = binding.far().map(|far| BackRef {
                                slot: far.slot().to_string(),
                                many: far.is_many(),
                                parent: key.clone(),
                            });
                            self.save_entity(*child, back_ref, visited)?
                        }
                        None => {
                            return Err(Error::InvalidArgument(format!(
                                "{}.{} references a transient {} but does not cascade saves",
                                ty,
                                binding.slot(),
                                child.entity_type()
                            )))
                        }
                    },
                };
                if !keys.contains(&target) {
                    keys.push(target);
                }
            }
            self.write_slot(&key, binding, keys)?;
        }

        let mut stored = self.require(&key)?;
        for binding in schema.bindings(&ty) {
            if binding.is_required() && stored.slot_keys(binding.slot()).is_empty() {
                return Err(required_slot(binding));
            }
        }
        stored.replace_attributes(entity.attributes().clone());
        stored.touch();
        self.stage(stored);
        Ok(key)
    }

    /// A key placed in a slot must exist, unless it is a dangling reference
    /// the holder already carries
    fn check_target(&self, holder: &EntityKey, binding: Binding<'g>, target: &EntityKey) -> Result<()> {
        if self.get(target)?.is_some() {
            return Ok(());
        }
        let kept_dangling = self.get(holder)?.is_some_and(|h| {
            h.dangling().contains(target)
                && h.get_slot(binding.slot()).is_some_and(|s| s.contains(target))
        });
        if kept_dangling {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "{} referenced from {}.{}",
                target,
                holder,
                binding.slot()
            )))
        }
    }

    /// Replace `holder.slot` with `keys` and bring the inverse side in line
    fn write_slot(&mut self, holder: &EntityKey, binding: Binding<'g>, keys: Vec<EntityKey>) -> Result<()> {
        let mut entity = self.require(holder)?;
        let previous = entity.slot_keys(binding.slot());
        entity.set_slot(binding.slot(), Slot::from_keys(keys.clone(), binding.is_many()));
        let live: BTreeSet<EntityKey> = entity.slots().values().flat_map(Slot::keys).collect();
        entity.retain_dangling(|k| live.contains(k));
        self.stage(entity);

        let Some(far) = binding.far() else {
            if !binding.far_is_many() {
                self.ensure_unclaimed(holder, binding, &previous, &keys)?;
            }
            return Ok(());
        };

        for removed in previous.iter().filter(|k| !keys.contains(k)) {
            // Dangling targets have nothing to update
            let Some(mut other) = self.get(removed)? else {
                continue;
            };
            let mut back: Vec<EntityKey> = other.slot_keys(far.slot());
            back.retain(|k| k != holder);
            if far.is_required() && back.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "{}.{} is required and would be left empty by unlinking {}",
                    removed,
                    far.slot(),
                    holder
                )));
            }
            other.set_slot(far.slot(), Slot::from_keys(back, far.is_many()));
            self.stage(other);
        }

        for added in keys.iter().filter(|k| !previous.contains(k)) {
            let mut other = self.require(added)?;
            let mut back = other.slot_keys(far.slot());
            if back.contains(holder) {
                continue;
            }
            if !far.is_many() {
                if let Some(current) = back.first().cloned() {
                    if self.get(&current)?.is_some() {
                        return Err(Error::CardinalityViolation(format!(
                            "{} is already linked to {} through {}.{}",
                            added,
                            current,
                            far.holder(),
                            far.slot()
                        )));
                    }
                    back.clear();
                    other.retain_dangling(|k| *k != current);
                }
            }
            back.push(holder.clone());
            other.set_slot(far.slot(), Slot::from_keys(back, far.is_many()));
            self.stage(other);
        }
        Ok(())
    }

    /// Without an inverse slot to consult, a target that admits a single
    /// holder is checked against every other holder of the type
    fn ensure_unclaimed(
        &self,
        holder: &EntityKey,
        binding: Binding<'g>,
        previous: &[EntityKey],
        keys: &[EntityKey],
    ) -> Result<()> {
        let added: Vec<&EntityKey> = keys.iter().filter(|k| !previous.contains(k)).collect();
        if added.is_empty() {
            return Ok(());
        }
        for other in self.find_all(binding.holder())? {
            let Some(other_key) = other.key() else {
                continue;
            };
            if other_key == *holder {
                continue;
            }
            let Some(slot) = other.get_slot(binding.slot()) else {
                continue;
            };
            if let Some(target) = added.iter().find(|t| slot.contains(t)) {
                return Err(Error::CardinalityViolation(format!(
                    "{} is already referenced from {}.{}",
                    target,
                    other_key,
                    binding.slot()
                )));
            }
        }
        Ok(())
    }

    fn delete_entity(&mut self, key: &EntityKey) -> Result<DeleteReport> {
        let schema = self.schema;
        self.require(key)?;
        let plan = {
            let this = &*self;
            CascadeWalker::walk(schema, key, CascadeOp::Delete, |k| this.get(k))?
        };

        let mut removed = Vec::with_capacity(plan.order.len());
        for doomed in &plan.order {
            if let Some(entity) = self.get(doomed)? {
                removed.push(entity);
            }
        }
        for doomed in &plan.order {
            self.staged.insert(doomed.clone(), None);
        }

        let mut requires_repair: Vec<EntityKey> = Vec::new();
        for gone in &removed {
            let Some(gone_key) = gone.key() else {
                continue;
            };
            for binding in schema.inbound(gone.entity_type()) {
                let holders: Vec<EntityKey> = match binding.far() {
                    Some(far) => gone.slot_keys(far.slot()),
                    None => self
                        .find_all(binding.holder())?
                        .iter()
                        .filter(|e| e.get_slot(binding.slot()).is_some_and(|s| s.contains(&gone_key)))
                        .filter_map(Entity::key)
                        .collect(),
                };

                for holder_key in holders {
                    if plan.contains(&holder_key) {
                        continue;
                    }
                    let Some(mut holder) = self.get(&holder_key)? else {
                        continue;
                    };
                    if !holder
                        .get_slot(binding.slot())
                        .is_some_and(|s| s.contains(&gone_key))
                    {
                        continue;
                    }
                    if binding.is_owner() {
                        tracing::warn!(
                            "{} requires repair: {}.{} references deleted {}",
                            holder_key,
                            binding.holder(),
                            binding.slot(),
                            gone_key
                        );
                        holder.flag_dangling(gone_key.clone());
                        if !requires_repair.contains(&holder_key) {
                            requires_repair.push(holder_key.clone());
                        }
                    } else {
                        let mut keys = holder.slot_keys(binding.slot());
                        keys.retain(|k| *k != gone_key);
                        holder.set_slot(binding.slot(), Slot::from_keys(keys, binding.is_many()));
                    }
                    self.stage(holder);
                }
            }
        }

        tracing::info!(
            "Deleted {} ({} entities, {} require repair)",
            key,
            plan.order.len(),
            requires_repair.len()
        );
        Ok(DeleteReport {
            deleted: plan.order,
            requires_repair,
            stats: plan.stats,
        })
    }
}

fn unknown_slot(ty: &EntityType, slot: &str) -> Error {
    Error::TypeMismatch(format!("{} has no relationship slot {}", ty, slot))
}

fn required_slot(binding: Binding<'_>) -> Error {
    Error::InvalidArgument(format!("{}.{} is required", binding.holder(), binding.slot()))
}
