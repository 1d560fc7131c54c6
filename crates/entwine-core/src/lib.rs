//! Entwine Core - Relationship graph manager
//!
//! Entities with value-object attributes, relationship descriptors with
//! cardinality, owning side and cascade policy, and a [`GraphManager`] that
//! keeps both sides of every relationship consistent over a pluggable
//! [`PersistenceAdapter`].

pub mod adapter;
pub mod cascade;
pub mod entity;
pub mod error;
pub mod graph;
pub mod limits;
pub mod presets;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod value;

pub use adapter::{Change, ChangeSet, MemoryAdapter, PersistenceAdapter};
pub use cascade::{CascadePlan, CascadeStats, CascadeWalker};
pub use entity::{Attribute, Entity, EntityId, EntityKey, EntityType, ParseKeyError, Reference, Slot};
pub use error::{Error, Result};
pub use graph::{DeleteReport, GraphManager, Query};
pub use query::{Page, PageInfo, PageRequest, SortDirection, ID_SORT_KEY};
pub use schema::{
    AttributeDef, AttributeKind, Binding, Cardinality, CascadeOp, CascadePolicy, EntityTypeDef,
    RelationshipDescriptor, Schema, SchemaConfig, Side,
};
pub use transaction::{Transaction, TxId};
pub use value::{Value, ValueObject};
