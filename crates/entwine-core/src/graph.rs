//! Graph manager: the single entry point for reading and mutating the graph

use crate::adapter::{MemoryAdapter, PersistenceAdapter};
use crate::cascade::{CascadePlan, CascadeStats, CascadeWalker};
use crate::entity::{Entity, EntityId, EntityKey, EntityType};
use crate::error::{Error, Result};
use crate::query::{paginate, Page, PageRequest};
use crate::schema::{CascadeOp, RelationshipDescriptor, Schema};
use crate::transaction::Transaction;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Outcome of a delete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteReport {
    /// Deleted entities, in deletion order
    pub deleted: Vec<EntityKey>,

    /// Survivors whose owning-side slots still reference a deleted entity
    pub requires_repair: Vec<EntityKey>,

    pub stats: CascadeStats,
}

/// Owns the schema and the persistence adapter and enforces every
/// relationship invariant on the way in
pub struct GraphManager<A: PersistenceAdapter = MemoryAdapter> {
    schema: Schema,
    adapter: A,
}

impl GraphManager<MemoryAdapter> {
    /// Manager backed by a fresh in-memory store
    pub fn in_memory(schema: Schema) -> Self {
        Self::new(schema, MemoryAdapter::new())
    }
}

impl<A: PersistenceAdapter> GraphManager<A> {
    /// Take ownership of `schema` and close it
    pub fn new(mut schema: Schema, adapter: A) -> Self {
        schema.close();
        tracing::debug!(
            "Graph manager initialized with {} types and {} relationships",
            schema.types().len(),
            schema.relationships().len()
        );
        Self { schema, adapter }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Always fails: the schema is fixed once the manager owns it
    pub fn register_relationship(&mut self, descriptor: RelationshipDescriptor) -> Result<()> {
        self.schema.register(descriptor)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` in a transaction
    ///
    /// Everything `f` staged is applied in one adapter call when it returns
    /// `Ok`; on `Err` nothing reaches the store.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, A>) -> Result<T>,
    {
        let mut tx = Transaction::new(&self.schema, &self.adapter);
        let span = tracing::debug_span!("transaction", tx = %tx.id());
        let _guard = span.enter();

        match f(&mut tx) {
            Ok(value) => {
                let changes = tx.into_changes();
                let count = changes.len();
                if !changes.is_empty() {
                    self.adapter.apply(changes)?;
                }
                tracing::debug!("Committed {} changes", count);
                Ok(value)
            }
            Err(e) => {
                tracing::debug!("Rolled back {} staged changes: {}", tx.pending(), e);
                Err(e)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist `entity` with its save cascade; returns the stored entity
    pub fn save(&mut self, entity: Entity) -> Result<Entity> {
        let saved = self.transaction(|tx| tx.save(entity))?;
        tracing::info!("Saved {}", DisplayKey(&saved));
        Ok(saved)
    }

    /// Delete an entity and everything its delete cascade reaches
    pub fn delete(
        &mut self,
        entity_type: impl Into<EntityType>,
        id: impl Into<EntityId>,
    ) -> Result<DeleteReport> {
        let key = EntityKey::new(entity_type, id);
        self.transaction(|tx| tx.delete(&key))
    }

    pub fn link(&mut self, from: &EntityKey, slot: &str, to: &EntityKey) -> Result<()> {
        self.transaction(|tx| tx.link(from, slot, to))?;
        tracing::info!("Linked {}.{} -> {}", from, slot, to);
        Ok(())
    }

    pub fn unlink(&mut self, from: &EntityKey, slot: &str, to: &EntityKey) -> Result<()> {
        self.transaction(|tx| tx.unlink(from, slot, to))?;
        tracing::info!("Unlinked {}.{} -> {}", from, slot, to);
        Ok(())
    }

    /// Drop dangling references and clear the repair flag
    pub fn repair(
        &mut self,
        entity_type: impl Into<EntityType>,
        id: impl Into<EntityId>,
    ) -> Result<Entity> {
        let key = EntityKey::new(entity_type, id);
        self.transaction(|tx| tx.repair(&key))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn find_by_id(&self, entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Result<Entity> {
        let key = EntityKey::new(entity_type, id);
        self.adapter.load(&key)?.ok_or_else(|| Error::not_found(&key))
    }

    /// Every entity of a type, ascending by identifier
    pub fn find_all(&self, entity_type: impl Into<EntityType>) -> Result<Vec<Entity>> {
        let entity_type = self.known_type(entity_type)?;
        self.adapter.scan(&entity_type)
    }

    /// Entities whose scalar attribute `name` equals `value`
    pub fn find_by_attribute(
        &self,
        entity_type: impl Into<EntityType>,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<Entity>> {
        let value = value.into();
        Ok(self
            .find_all(entity_type)?
            .into_iter()
            .filter(|e| e.scalar(name) == Some(&value))
            .collect())
    }

    /// Lazy, restartable query over one type
    pub fn query<P>(&self, entity_type: impl Into<EntityType>, predicate: P) -> Result<Query<'_, A, P>>
    where
        P: Fn(&Entity) -> bool,
    {
        Ok(Query {
            adapter: &self.adapter,
            entity_type: self.known_type(entity_type)?,
            predicate,
        })
    }

    pub fn page(&self, entity_type: impl Into<EntityType>, request: &PageRequest) -> Result<Page<Entity>> {
        self.page_where(entity_type, |_| true, request)
    }

    /// Page over the entities of a type that match `predicate`; totals count
    /// matches only
    pub fn page_where<P>(
        &self,
        entity_type: impl Into<EntityType>,
        predicate: P,
        request: &PageRequest,
    ) -> Result<Page<Entity>>
    where
        P: Fn(&Entity) -> bool,
    {
        // Validate the window before touching storage
        request.window()?;
        let items = self
            .find_all(entity_type)?
            .into_iter()
            .filter(|e| predicate(e))
            .collect();
        paginate(items, request)
    }

    /// Entities referenced from `holder.slot`, skipping dangling references
    pub fn resolve(&self, holder: &Entity, slot: &str) -> Result<Vec<Entity>> {
        let ty = holder.entity_type();
        if self.schema.binding(ty, slot).is_none() {
            return Err(Error::TypeMismatch(format!(
                "{} has no relationship slot {}",
                ty, slot
            )));
        }
        let mut found = Vec::new();
        for key in holder.slot_keys(slot) {
            match self.adapter.load(&key)? {
                Some(entity) => found.push(entity),
                None => tracing::debug!("Skipping dangling reference {} in {}", key, slot),
            }
        }
        Ok(found)
    }

    /// Entities a cascade of `op` would reach from `key`, without changing anything
    pub fn cascade_plan(&self, key: &EntityKey, op: CascadeOp) -> Result<CascadePlan> {
        if self.adapter.load(key)?.is_none() {
            return Err(Error::not_found(key));
        }
        CascadeWalker::walk(&self.schema, key, op, |k| self.adapter.load(k))
    }

    fn known_type(&self, entity_type: impl Into<EntityType>) -> Result<EntityType> {
        let entity_type = entity_type.into();
        if !self.schema.contains_type(&entity_type) {
            return Err(Error::TypeMismatch(format!(
                "entity type {} is not registered",
                entity_type
            )));
        }
        Ok(entity_type)
    }
}

/// A query over the entities of one type
///
/// Holds no results: every call to [`iter`](Query::iter) reads the store
/// again, so a query observes writes made between iterations.
pub struct Query<'g, A: PersistenceAdapter, P> {
    adapter: &'g A,
    entity_type: EntityType,
    predicate: P,
}

impl<'g, A: PersistenceAdapter, P: Fn(&Entity) -> bool> Query<'g, A, P> {
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Matching entities, ascending by identifier
    pub fn iter(&self) -> Result<impl Iterator<Item = Entity> + '_> {
        let entities = self.adapter.scan(&self.entity_type)?;
        Ok(entities.into_iter().filter(|e| (self.predicate)(e)))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.iter()?.count())
    }

    pub fn first(&self) -> Result<Option<Entity>> {
        Ok(self.iter()?.next())
    }
}

struct DisplayKey<'a>(&'a Entity);

impl std::fmt::Display for DisplayKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.key() {
            Some(key) => write!(f, "{}", key),
            None => write!(f, "{} (transient)", self.0.entity_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Slot;
    use crate::presets;
    use crate::query::SortDirection;
    use crate::schema::{Cardinality, CascadePolicy, EntityTypeDef};

    fn school() -> GraphManager {
        GraphManager::in_memory(presets::school().unwrap())
    }

    fn mapping() -> GraphManager {
        GraphManager::in_memory(presets::mapping().unwrap())
    }

    fn guardian(graph: &mut GraphManager) -> Entity {
        graph
            .save(
                Entity::new("Guardian")
                    .with_attribute("name", "Nikhil")
                    .with_attribute("email", "nikhil@example.com")
                    .with_attribute("mobile", "9999999999"),
            )
            .unwrap()
    }

    fn guardian_named(graph: &mut GraphManager, name: &str) -> Entity {
        graph
            .save(Entity::new("Guardian").with_attribute("name", name))
            .unwrap()
    }

    fn student(guardian: &EntityKey, email: &str) -> Entity {
        Entity::new("Student")
            .with_attribute("name", presets::full_name("Shabbir", "", "Dawoodi"))
            .with_attribute("email", email)
            .with_one("guardian", guardian.clone())
    }

    fn key(e: &Entity) -> EntityKey {
        e.key().unwrap()
    }

    #[test]
    fn test_saved_entity_round_trips() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let saved = graph.save(student(&key(&g), "shabbir@example.com")).unwrap();

        assert_eq!(saved.id(), Some(EntityId(1)));
        assert!(saved.created_at().is_some());
        let loaded = graph.find_by_id("Student", 1u64).unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_write_is_mirrored_to_inverse_slot() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();

        let g = graph.find_by_id("Guardian", 1u64).unwrap();
        assert_eq!(g.slot_keys("students"), vec![key(&s)]);
    }

    #[test]
    fn test_one_to_one_bidirectional() {
        let mut graph = mapping();
        let passport = graph
            .save(Entity::new("Passport").with_attribute("name", presets::full_name("A", "", "B")))
            .unwrap();
        let person = graph
            .save(Entity::new("Person").with_one("passport", key(&passport)))
            .unwrap();

        let passport = graph.find_by_id("Passport", 1u64).unwrap();
        assert_eq!(passport.slot_keys("person"), vec![key(&person)]);
    }

    #[test]
    fn test_one_to_one_far_side_is_not_stolen() {
        let mut graph = mapping();
        let passport = graph.save(Entity::new("Passport")).unwrap();
        graph
            .save(Entity::new("Person").with_one("passport", key(&passport)))
            .unwrap();

        let err = graph
            .save(Entity::new("Person").with_one("passport", key(&passport)))
            .unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation(_)));
        assert_eq!(graph.find_all("Person").unwrap().len(), 1);
        let passport = graph.find_by_id("Passport", 1u64).unwrap();
        assert_eq!(passport.slot_keys("person"), vec![EntityKey::new("Person", 1)]);
    }

    #[test]
    fn test_link_then_unlink_restores_state() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();
        let c = graph
            .save(Entity::new("Course").with_attribute("name", "DSA").with_attribute("credits", 6))
            .unwrap();

        graph.link(&key(&c), "students", &key(&s)).unwrap();
        let linked = graph.find_by_id("Student", 1u64).unwrap();
        assert_eq!(linked.slot_keys("courses"), vec![key(&c)]);

        graph.unlink(&key(&c), "students", &key(&s)).unwrap();
        assert_eq!(graph.find_by_id("Student", 1u64).unwrap(), s);
        assert_eq!(graph.find_by_id("Course", 1u64).unwrap(), c);
    }

    #[test]
    fn test_link_through_inverse_side() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();
        let c = graph.save(Entity::new("Course")).unwrap();

        graph.link(&key(&s), "courses", &key(&c)).unwrap();
        let c = graph.find_by_id("Course", 1u64).unwrap();
        assert_eq!(c.slot_keys("students"), vec![key(&s)]);

        // Linking twice is a no-op
        graph.link(&key(&s), "courses", &key(&c)).unwrap();
        assert_eq!(graph.find_by_id("Course", 1u64).unwrap(), c);
    }

    #[test]
    fn test_unlink_errors() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();
        let c = graph.save(Entity::new("Course")).unwrap();

        assert!(matches!(
            graph.unlink(&key(&c), "students", &key(&s)),
            Err(Error::NotFound(_))
        ));
        // Student.guardian is required
        assert!(matches!(
            graph.unlink(&key(&s), "guardian", &key(&g)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            graph.unlink(&key(&g), "students", &key(&s)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            graph.link(&key(&c), "teacher", &key(&s)),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_cascade_delete_through_cycle() {
        let mut schema = Schema::new();
        schema.register_type(EntityTypeDef::new("Course").scalar("name")).unwrap();
        schema.register_type(EntityTypeDef::new("Teacher").scalar("name")).unwrap();
        schema
            .register(
                RelationshipDescriptor::new("Course", "teacher", "Teacher", Cardinality::ManyToOne)
                    .inverse("courses")
                    .cascade(CascadePolicy::All)
                    .inverse_cascade(CascadePolicy::All),
            )
            .unwrap();
        let mut graph = GraphManager::in_memory(schema);

        let teacher = graph
            .save(
                Entity::new("Teacher")
                    .with_attribute("name", "Shabbir")
                    .with_many("courses", vec![Entity::new("Course"), Entity::new("Course")]),
            )
            .unwrap();
        assert_eq!(teacher.slot_keys("courses").len(), 2);
        let course = graph.find_by_id("Course", 1u64).unwrap();
        assert_eq!(course.slot_keys("teacher"), vec![key(&teacher)]);

        let report = graph.delete("Course", 1u64).unwrap();
        assert_eq!(
            report.deleted,
            vec![
                EntityKey::new("Course", 1),
                EntityKey::new("Teacher", 1),
                EntityKey::new("Course", 2),
            ]
        );
        assert!(report.requires_repair.is_empty());
        assert!(graph.adapter().is_empty().unwrap());
    }

    #[test]
    fn test_page_by_id() {
        let mut graph = school();
        for i in 1..=10 {
            graph
                .save(Entity::new("Course").with_attribute("credits", i % 3))
                .unwrap();
        }
        let ids = |page: Page<Entity>| -> Vec<u64> {
            page.data.iter().filter_map(|e| e.id()).map(|id| id.0).collect()
        };

        let first = graph.page("Course", &PageRequest::new(0, 5)).unwrap();
        assert!(first.info.has_next_page);
        assert_eq!(first.info.total_count, 10);
        assert_eq!(ids(first), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(graph.page("Course", &PageRequest::new(5, 5)).unwrap()), vec![6, 7, 8, 9, 10]);

        let by_credits = PageRequest::new(0, 4).sort_by("credits", SortDirection::Desc);
        assert_eq!(ids(graph.page("Course", &by_credits).unwrap()), vec![2, 5, 8, 1]);

        assert!(matches!(
            graph.page("Course", &PageRequest::new(0, 0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            graph.page("Course", &PageRequest::new(-1, 5)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_page_over_filtered_set() {
        let mut graph = school();
        for name in ["DBA", "DSA", "DBA", "OS", "DBA"] {
            graph.save(Entity::new("Course").with_attribute("name", name)).unwrap();
        }
        let dba = |e: &Entity| e.scalar("name").and_then(Value::as_str) == Some("DBA");

        let first = graph.page_where("Course", dba, &PageRequest::new(0, 2)).unwrap();
        assert_eq!(first.info.total_count, 3);
        assert!(first.info.has_next_page);
        let ids: Vec<u64> = first.data.iter().filter_map(|e| e.id()).map(|id| id.0).collect();
        assert_eq!(ids, vec![1, 3]);

        let rest = graph.page_where("Course", dba, &PageRequest::new(2, 2)).unwrap();
        assert_eq!(rest.data.len(), 1);
        assert!(!rest.info.has_next_page);

        assert!(matches!(
            graph.page_where("Course", dba, &PageRequest::new(-1, 2)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_single_slot_given_many_references() {
        let mut graph = school();
        let g1 = guardian(&mut graph);
        let g2 = guardian_named(&mut graph, "Meera");
        let err = graph
            .save(student(&key(&g1), "a@example.com").with_many("guardian", vec![key(&g1), key(&g2)]))
            .unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation(_)));
        assert!(graph.find_all("Student").unwrap().is_empty());
    }

    #[test]
    fn test_link_into_occupied_single_slot() {
        let mut graph = mapping();
        let owner = graph.save(Entity::new("Person")).unwrap();
        let other = graph.save(Entity::new("Person")).unwrap();
        let laptop = graph
            .save(Entity::new("Laptop").with_attribute("brand", "Dell").with_one("person", key(&owner)))
            .unwrap();

        let err = graph.link(&key(&laptop), "person", &key(&other)).unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation(_)));
        let laptop = graph.find_by_id("Laptop", 1u64).unwrap();
        assert_eq!(laptop.slot_keys("person"), vec![key(&owner)]);
        assert!(graph.find_by_id("Person", 2u64).unwrap().slot_keys("laptops").is_empty());
    }

    #[test]
    fn test_many_to_one_far_side_is_not_stolen() {
        let mut graph = school();
        let g1 = guardian(&mut graph);
        let s = graph.save(student(&key(&g1), "a@example.com")).unwrap();

        let err = graph
            .save(Entity::new("Guardian").with_attribute("name", "Meera").with_many("students", vec![key(&s)]))
            .unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation(_)));
        assert_eq!(graph.find_all("Guardian").unwrap().len(), 1);
        let s = graph.find_by_id("Student", 1u64).unwrap();
        assert_eq!(s.slot_keys("guardian"), vec![key(&g1)]);
    }

    #[test]
    fn test_unidirectional_one_to_one_target_has_one_holder() {
        let mut schema = Schema::new();
        schema.register_type(EntityTypeDef::new("Person")).unwrap();
        schema.register_type(EntityTypeDef::new("Passport")).unwrap();
        schema
            .register(RelationshipDescriptor::new("Person", "passport", "Passport", Cardinality::OneToOne))
            .unwrap();
        let mut graph = GraphManager::in_memory(schema);

        let passport = graph.save(Entity::new("Passport")).unwrap();
        let first = graph
            .save(Entity::new("Person").with_one("passport", key(&passport)))
            .unwrap();
        let err = graph
            .save(Entity::new("Person").with_one("passport", key(&passport)))
            .unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation(_)));

        let second = graph.save(Entity::new("Person")).unwrap();
        assert!(matches!(
            graph.link(&key(&second), "passport", &key(&passport)),
            Err(Error::CardinalityViolation(_))
        ));

        // Re-saving the current holder is fine, and the target is free once it is gone
        graph.save(first).unwrap();
        graph.delete("Person", 1u64).unwrap();
        graph.link(&key(&second), "passport", &key(&passport)).unwrap();
        let second = graph.find_by_id("Person", key(&second).id).unwrap();
        assert_eq!(second.slot_keys("passport"), vec![key(&passport)]);
    }

    #[test]
    fn test_unique_attribute() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();

        let err = graph.save(student(&key(&g), "a@example.com")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(
            graph.find_by_attribute("Student", "email", "a@example.com").unwrap().len(),
            1
        );

        // The holder itself may keep its value
        graph.save(s).unwrap();
        graph.save(student(&key(&g), "b@example.com")).unwrap();
        assert_eq!(graph.find_all("Student").unwrap().len(), 2);
    }

    #[test]
    fn test_unregistered_slot_type_rejected() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let err = graph
            .save(
                student(&key(&g), "a@example.com")
                    .with_many("courses", vec![Entity::new("Room")]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));

        let err = graph.save(Entity::new("Room")).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
        assert_eq!(graph.adapter().len().unwrap(), 1);
    }

    #[test]
    fn test_register_after_init_fails() {
        let mut graph = school();
        let err = graph
            .register_relationship(RelationshipDescriptor::new(
                "Teacher",
                "mentor",
                "Teacher",
                Cardinality::ManyToOne,
            ))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_delete_missing_leaves_store_unchanged() {
        let mut graph = school();
        let g = guardian(&mut graph);
        assert!(matches!(graph.delete("Guardian", 42u64), Err(Error::NotFound(_))));
        assert_eq!(graph.adapter().len().unwrap(), 1);
        assert_eq!(graph.find_by_id("Guardian", 1u64).unwrap(), g);
    }

    #[test]
    fn test_save_cascade_sets_back_references() {
        let mut graph = school();
        let g = graph
            .save(
                Entity::new("Guardian")
                    .with_attribute("name", "Nikhil")
                    .with_many(
                        "students",
                        vec![
                            Entity::new("Student").with_attribute("email", "a@example.com"),
                            Entity::new("Student").with_attribute("email", "b@example.com"),
                        ],
                    ),
            )
            .unwrap();

        assert_eq!(
            g.slot_keys("students"),
            vec![EntityKey::new("Student", 1), EntityKey::new("Student", 2)]
        );
        for s in graph.find_all("Student").unwrap() {
            assert_eq!(s.slot_keys("guardian"), vec![key(&g)]);
        }
    }

    #[test]
    fn test_transient_without_save_cascade_rejected() {
        let mut graph = school();
        let err = graph
            .save(Entity::new("Course").with_one("teacher", Entity::new("Teacher")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(graph.adapter().is_empty().unwrap());
    }

    #[test]
    fn test_attribute_validation() {
        let mut graph = school();
        let g = guardian(&mut graph);

        // email is required
        let err = graph
            .save(Entity::new("Student").with_one("guardian", key(&g)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        // guardian is required
        let err = graph
            .save(Entity::new("Student").with_attribute("email", "a@example.com"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = graph
            .save(student(&key(&g), "a@example.com").with_attribute("age", 12))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));

        let err = graph
            .save(student(&key(&g), "a@example.com").with_attribute("name", "plain text"))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));

        let err = graph
            .save(student(&EntityKey::new("Guardian", 9), "a@example.com"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_delete_flags_owning_side_for_repair() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s1 = graph.save(student(&key(&g), "a@example.com")).unwrap();
        let s2 = graph.save(student(&key(&g), "b@example.com")).unwrap();
        let c = graph
            .save(Entity::new("Course").with_many("students", vec![key(&s1), key(&s2)]))
            .unwrap();

        // Course owns the join; deleting a student leaves the course pointing at it
        let report = graph.delete("Student", 1u64).unwrap();
        assert_eq!(report.deleted, vec![key(&s1)]);
        assert_eq!(report.requires_repair, vec![key(&c)]);

        let flagged = graph.find_by_id("Course", 1u64).unwrap();
        assert!(flagged.requires_repair());
        assert_eq!(flagged.slot_keys("students"), vec![key(&s1), key(&s2)]);
        assert_eq!(graph.resolve(&flagged, "students").unwrap().len(), 1);

        // Guardian.students is the inverse side and is simply updated
        let g = graph.find_by_id("Guardian", 1u64).unwrap();
        assert_eq!(g.slot_keys("students"), vec![key(&s2)]);

        let repaired = graph.repair("Course", 1u64).unwrap();
        assert!(!repaired.requires_repair());
        assert_eq!(repaired.slot_keys("students"), vec![key(&s2)]);
        assert_eq!(graph.find_by_id("Course", 1u64).unwrap(), repaired);
    }

    #[test]
    fn test_flagged_entity_can_still_be_saved() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();
        graph
            .save(Entity::new("Course").with_many("students", vec![key(&s)]))
            .unwrap();
        graph.delete("Student", 1u64).unwrap();

        let mut course = graph.find_by_id("Course", 1u64).unwrap();
        course.set_attribute("credits", 4);
        let saved = graph.save(course).unwrap();
        assert!(saved.requires_repair());

        let mut course = saved;
        course.set_slot("students", Slot::Many(Vec::new()));
        let saved = graph.save(course).unwrap();
        assert!(!saved.requires_repair());
    }

    #[test]
    fn test_delete_cascades_along_inverse_slots() {
        let mut graph = school();
        let g = guardian(&mut graph);
        let s = graph.save(student(&key(&g), "a@example.com")).unwrap();
        let teacher = graph.save(Entity::new("Teacher")).unwrap();
        let c = graph
            .save(
                Entity::new("Course")
                    .with_many("students", vec![key(&s)])
                    .with_one("teacher", key(&teacher)),
            )
            .unwrap();
        graph
            .save(
                Entity::new("CourseMaterial")
                    .with_attribute("url", "https://example.com/dsa")
                    .with_one("course", key(&c)),
            )
            .unwrap();

        let report = graph.delete("Course", 1u64).unwrap();
        assert_eq!(report.deleted, vec![key(&c), EntityKey::new("CourseMaterial", 1)]);
        assert!(report.requires_repair.is_empty());

        let s = graph.find_by_id("Student", 1u64).unwrap();
        assert!(s.slot_keys("courses").is_empty());
        let teacher = graph.find_by_id("Teacher", 1u64).unwrap();
        assert!(teacher.slot_keys("courses").is_empty());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let mut graph = school();
        let result: Result<()> = graph.transaction(|tx| {
            tx.save(Entity::new("Teacher"))?;
            tx.save(Entity::new("Course"))?;
            assert_eq!(tx.find_all(&"Course".into())?.len(), 1);
            Err(Error::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());
        assert!(graph.adapter().is_empty().unwrap());

        graph
            .transaction(|tx| {
                let t = tx.save(Entity::new("Teacher"))?;
                tx.save(Entity::new("Course").with_one("teacher", t.key().unwrap()))?;
                // A failing operation does not undo earlier ones
                assert!(tx.save(Entity::new("Room")).is_err());
                Ok(())
            })
            .unwrap();
        assert_eq!(graph.adapter().len().unwrap(), 2);
        let t = graph.find_by_id("Teacher", 2u64).unwrap();
        assert_eq!(t.slot_keys("courses"), vec![EntityKey::new("Course", 2)]);
    }

    #[test]
    fn test_query_is_restartable() {
        let mut graph = school();
        for credits in [2, 4, 6] {
            graph
                .save(Entity::new("Course").with_attribute("credits", credits))
                .unwrap();
        }
        graph.save(Entity::new("Teacher")).unwrap();

        let heavy = |e: &Entity| e.scalar("credits").and_then(Value::as_i64).is_some_and(|c| c > 3);
        assert_eq!(graph.query("Course", heavy).unwrap().count().unwrap(), 2);

        graph
            .save(Entity::new("Course").with_attribute("credits", 8))
            .unwrap();
        let query = graph.query("Course", heavy).unwrap();
        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(query.first().unwrap().and_then(|e| e.id()), Some(EntityId(2)));

        assert!(matches!(graph.query("Room", heavy), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_find_by_attribute() {
        let mut graph = school();
        let g = guardian(&mut graph);
        graph.save(student(&key(&g), "a@example.com")).unwrap();
        graph.save(student(&key(&g), "b@example.com")).unwrap();

        let found = graph
            .find_by_attribute("Student", "email", "b@example.com")
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), Some(EntityId(2)));
    }

    #[test]
    fn test_cascade_plan_is_read_only() {
        let mut graph = mapping();
        let person = graph.save(Entity::new("Person")).unwrap();
        graph
            .save(Entity::new("Laptop").with_attribute("brand", "Dell").with_one("person", key(&person)))
            .unwrap();

        let plan = graph.cascade_plan(&key(&person), CascadeOp::Delete).unwrap();
        assert_eq!(plan.order, vec![key(&person), EntityKey::new("Laptop", 1)]);
        assert_eq!(graph.adapter().len().unwrap(), 2);
    }

    #[test]
    fn test_updated_at_only_moves_on_save() {
        let mut graph = mapping();
        let person = graph.save(Entity::new("Person")).unwrap();
        let created = person.created_at();

        let resaved = graph.save(person).unwrap();
        assert_eq!(resaved.created_at(), created);
        assert!(resaved.updated_at() >= created);
    }
}
