//! Entity (node) types and operations

use crate::value::{Value, ValueObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Identifier of an entity, unique within its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Entity type name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for EntityType {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl PartialEq<str> for EntityType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Address of a persistent entity: `(type, id)`
///
/// Rendered and parsed as `Type:id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Error parsing an [`EntityKey`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity key '{0}', expected Type:id")]
pub struct ParseKeyError(pub String);

impl FromStr for EntityKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, id) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseKeyError(s.to_string()))?;
        if ty.is_empty() {
            return Err(ParseKeyError(s.to_string()));
        }
        let id = id.parse::<u64>().map_err(|_| ParseKeyError(s.to_string()))?;
        Ok(Self::new(ty, id))
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for EntityKey {
    type Error = ParseKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// An attribute slot value: a scalar or an embedded value object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Scalar(Value),
    Embedded(ValueObject),
}

impl Attribute {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::Embedded(_) => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&ValueObject> {
        match self {
            Self::Embedded(vo) => Some(vo),
            Self::Scalar(_) => None,
        }
    }

    /// Missing in the sense of a required column: null scalars count
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Value::Null))
    }
}

macro_rules! scalar_attribute_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Attribute {
                fn from(v: $t) -> Self {
                    Self::Scalar(v.into())
                }
            }
        )*
    };
}

scalar_attribute_from!(Value, &str, String, i64, i32, f64, bool);

impl From<ValueObject> for Attribute {
    fn from(vo: ValueObject) -> Self {
        Self::Embedded(vo)
    }
}

/// A reference held in a relationship slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    /// A persistent entity
    Key(EntityKey),
    /// An entity handed over by value in the same save call
    Inline(Box<Entity>),
}

impl Reference {
    /// Key of the referenced entity, if it has one
    pub fn key(&self) -> Option<EntityKey> {
        match self {
            Self::Key(k) => Some(k.clone()),
            Self::Inline(e) => e.key(),
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        match self {
            Self::Key(k) => &k.entity_type,
            Self::Inline(e) => e.entity_type(),
        }
    }
}

impl From<EntityKey> for Reference {
    fn from(key: EntityKey) -> Self {
        Self::Key(key)
    }
}

impl From<Entity> for Reference {
    fn from(entity: Entity) -> Self {
        Self::Inline(Box::new(entity))
    }
}

/// Contents of a relationship slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    One(Option<Reference>),
    Many(Vec<Reference>),
}

impl Slot {
    pub fn refs(&self) -> Vec<&Reference> {
        match self {
            Self::One(r) => r.iter().collect(),
            Self::Many(rs) => rs.iter().collect(),
        }
    }

    /// Keys of every persistent reference, in slot order
    pub fn keys(&self) -> Vec<EntityKey> {
        self.refs().into_iter().filter_map(Reference::key).collect()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(r) => r.is_none(),
            Self::Many(rs) => rs.is_empty(),
        }
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.refs().iter().any(|r| r.key().as_ref() == Some(key))
    }

    pub(crate) fn from_keys(keys: Vec<EntityKey>, many: bool) -> Self {
        if many {
            Self::Many(keys.into_iter().map(Reference::Key).collect())
        } else {
            Self::One(keys.into_iter().next().map(Reference::Key))
        }
    }

    pub(crate) fn into_refs(self) -> Vec<Reference> {
        match self {
            Self::One(r) => r.into_iter().collect(),
            Self::Many(rs) => rs,
        }
    }
}

/// An identity-bearing record
///
/// Constructed transient (no identifier); the graph manager assigns the
/// identifier on first save and it never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    entity_type: EntityType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EntityId>,

    #[serde(default)]
    attributes: BTreeMap<String, Attribute>,

    #[serde(default)]
    slots: BTreeMap<String, Slot>,

    /// Deleted entities still referenced from an owning-side slot
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    repair: BTreeSet<EntityKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Create a new transient entity
    pub fn new(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            attributes: BTreeMap::new(),
            slots: BTreeMap::new(),
            repair: BTreeSet::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id.map(|id| EntityKey {
            entity_type: self.entity_type.clone(),
            id,
        })
    }

    pub fn is_transient(&self) -> bool {
        self.id.is_none()
    }

    pub(crate) fn assign_id(&mut self, id: EntityId) {
        debug_assert!(self.id.is_none(), "identifier is immutable once assigned");
        self.id = Some(id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attributes
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Scalar attribute value; `None` for missing or embedded attributes
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).and_then(Attribute::as_scalar)
    }

    pub fn embedded(&self, name: &str) -> Option<&ValueObject> {
        self.attributes.get(name).and_then(Attribute::as_embedded)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Attribute>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub(crate) fn replace_attributes(&mut self, attributes: BTreeMap<String, Attribute>) {
        self.attributes = attributes;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Relationship slots
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    pub fn set_slot(&mut self, name: impl Into<String>, slot: Slot) {
        self.slots.insert(name.into(), slot);
    }

    pub fn slots(&self) -> &BTreeMap<String, Slot> {
        &self.slots
    }

    pub(crate) fn take_slots(&mut self) -> BTreeMap<String, Slot> {
        std::mem::take(&mut self.slots)
    }

    /// True if any slot references `key`
    pub fn references(&self, key: &EntityKey) -> bool {
        self.slots.values().any(|s| s.contains(key))
    }

    /// Point a single-valued slot at `target`
    pub fn set_one(&mut self, slot: impl Into<String>, target: impl Into<Reference>) {
        self.slots.insert(slot.into(), Slot::One(Some(target.into())));
    }

    /// Append `target` to a collection slot
    pub fn add_to(&mut self, slot: impl Into<String>, target: impl Into<Reference>) {
        let slot = self
            .slots
            .entry(slot.into())
            .or_insert_with(|| Slot::Many(Vec::new()));
        let existing = std::mem::replace(slot, Slot::Many(Vec::new()));
        let mut refs = existing.into_refs();
        refs.push(target.into());
        *slot = Slot::Many(refs);
    }

    pub fn with_one(mut self, slot: impl Into<String>, target: impl Into<Reference>) -> Self {
        self.set_one(slot, target);
        self
    }

    pub fn with_many<I, R>(mut self, slot: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Reference>,
    {
        self.slots.insert(
            slot.into(),
            Slot::Many(targets.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Keys referenced from `slot`, empty when the slot is unset
    pub fn slot_keys(&self, slot: &str) -> Vec<EntityKey> {
        self.slots.get(slot).map(Slot::keys).unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Repair state
    // ─────────────────────────────────────────────────────────────────────────

    /// True when an owning-side slot still points at a deleted entity
    pub fn requires_repair(&self) -> bool {
        !self.repair.is_empty()
    }

    pub fn dangling(&self) -> &BTreeSet<EntityKey> {
        &self.repair
    }

    pub(crate) fn flag_dangling(&mut self, key: EntityKey) {
        self.repair.insert(key);
    }

    pub(crate) fn take_dangling(&mut self) -> BTreeSet<EntityKey> {
        std::mem::take(&mut self.repair)
    }

    pub(crate) fn retain_dangling(&mut self, keep: impl Fn(&EntityKey) -> bool) {
        self.repair.retain(|k| keep(k));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Timestamps
    // ─────────────────────────────────────────────────────────────────────────

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}
