//! Schema: entity type definitions and relationship descriptors
//!
//! A [`Schema`] is assembled at startup, either programmatically or from a
//! [`SchemaConfig`] read out of a TOML/JSON file, and is closed when a
//! [`GraphManager`](crate::GraphManager) takes ownership of it.

use crate::entity::EntityType;
use crate::error::{Error, Result};
use crate::limits::{validate_field_name, validate_type_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Multiplicity of a relationship, read from source to target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// Whether the source-side slot holds a collection
    pub fn source_is_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// Whether the target-side (inverse) slot holds a collection
    pub fn target_is_many(self) -> bool {
        matches!(self, Self::ManyToOne | Self::ManyToMany)
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OneToOne => "one-to-one",
            Self::OneToMany => "one-to-many",
            Self::ManyToOne => "many-to-one",
            Self::ManyToMany => "many-to-many",
        };
        f.write_str(s)
    }
}

/// Operation that a cascade policy may propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeOp {
    Save,
    Delete,
}

/// Which operations propagate across a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadePolicy {
    #[default]
    None,
    Save,
    Delete,
    All,
}

impl CascadePolicy {
    pub fn includes(self, op: CascadeOp) -> bool {
        matches!(
            (self, op),
            (Self::All, _) | (Self::Save, CascadeOp::Save) | (Self::Delete, CascadeOp::Delete)
        )
    }
}

/// Kind of a declared attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    #[default]
    Scalar,
    Embedded,
}

/// A declared attribute of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,

    #[serde(default)]
    pub kind: AttributeKind,

    /// Saving without a non-null value fails
    #[serde(default)]
    pub required: bool,

    /// No two entities of the type may hold the same non-null value
    #[serde(default)]
    pub unique: bool,
}

/// Definition of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: EntityType,

    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
}

impl EntityTypeDef {
    pub fn new(name: impl Into<EntityType>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind, required: bool) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            kind,
            required,
            unique: false,
        });
        self
    }

    pub fn scalar(self, name: impl Into<String>) -> Self {
        self.with_attribute(name, AttributeKind::Scalar, false)
    }

    pub fn required_scalar(self, name: impl Into<String>) -> Self {
        self.with_attribute(name, AttributeKind::Scalar, true)
    }

    pub fn embedded(self, name: impl Into<String>) -> Self {
        self.with_attribute(name, AttributeKind::Embedded, false)
    }

    /// Mark the most recently declared attribute unique
    pub fn unique(mut self) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.unique = true;
        }
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Declares a relationship between two entity types
///
/// `slot` lives on `source` and points at `target`; `inverse`, when set,
/// lives on `target` and makes the relationship bidirectional. `cascade`
/// applies when walking source → target, `inverse_cascade` when walking
/// target → source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub source: EntityType,
    pub slot: String,
    pub target: EntityType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,

    pub cardinality: Cardinality,

    /// Side that persists the foreign key / join association
    pub owning_side: EntityType,

    #[serde(default)]
    pub cascade: CascadePolicy,

    #[serde(default)]
    pub inverse_cascade: CascadePolicy,

    /// The source slot must be set (single-valued slots only)
    #[serde(default)]
    pub required: bool,
}

impl RelationshipDescriptor {
    /// New unidirectional relationship owned by `source`
    pub fn new(
        source: impl Into<EntityType>,
        slot: impl Into<String>,
        target: impl Into<EntityType>,
        cardinality: Cardinality,
    ) -> Self {
        let source = source.into();
        Self {
            owning_side: source.clone(),
            source,
            slot: slot.into(),
            target: target.into(),
            inverse: None,
            cardinality,
            cascade: CascadePolicy::None,
            inverse_cascade: CascadePolicy::None,
            required: false,
        }
    }

    pub fn inverse(mut self, slot: impl Into<String>) -> Self {
        self.inverse = Some(slot.into());
        self
    }

    pub fn owned_by(mut self, side: impl Into<EntityType>) -> Self {
        self.owning_side = side.into();
        self
    }

    pub fn cascade(mut self, policy: CascadePolicy) -> Self {
        self.cascade = policy;
        self
    }

    pub fn inverse_cascade(mut self, policy: CascadePolicy) -> Self {
        self.inverse_cascade = policy;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Resolve which side owns the association
    fn owner(&self) -> Side {
        if self.source == self.target {
            // Self-referential: the "many" side of a one-to-many holds the key
            match self.cardinality {
                Cardinality::OneToMany => Side::Target,
                _ => Side::Source,
            }
        } else if self.owning_side == self.source {
            Side::Source
        } else {
            Side::Target
        }
    }
}

/// One end of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl Side {
    fn flip(self) -> Self {
        match self {
            Self::Source => Self::Target,
            Self::Target => Self::Source,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotBinding {
    relationship: usize,
    side: Side,
}

/// A relationship slot as seen from the type that carries it
#[derive(Debug, Clone, Copy)]
pub struct Binding<'s> {
    descriptor: &'s RelationshipDescriptor,
    index: usize,
    side: Side,
    slot: &'s str,
}

impl<'s> Binding<'s> {
    fn of(descriptor: &'s RelationshipDescriptor, index: usize, side: Side) -> Option<Self> {
        let slot = match side {
            Side::Source => Some(descriptor.slot.as_str()),
            Side::Target => descriptor.inverse.as_deref(),
        }?;
        Some(Self {
            descriptor,
            index,
            side,
            slot,
        })
    }

    pub fn descriptor(&self) -> &'s RelationshipDescriptor {
        self.descriptor
    }

    /// Registration index of the relationship
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn slot(&self) -> &'s str {
        self.slot
    }

    /// Type carrying this slot
    pub fn holder(&self) -> &'s EntityType {
        match self.side {
            Side::Source => &self.descriptor.source,
            Side::Target => &self.descriptor.target,
        }
    }

    /// Type referenced from this slot
    pub fn target(&self) -> &'s EntityType {
        match self.side {
            Side::Source => &self.descriptor.target,
            Side::Target => &self.descriptor.source,
        }
    }

    pub fn is_many(&self) -> bool {
        match self.side {
            Side::Source => self.descriptor.cardinality.source_is_many(),
            Side::Target => self.descriptor.cardinality.target_is_many(),
        }
    }

    /// Cascade policy when walking out of this slot
    pub fn cascade(&self) -> CascadePolicy {
        match self.side {
            Side::Source => self.descriptor.cascade,
            Side::Target => self.descriptor.inverse_cascade,
        }
    }

    /// Whether this slot's holder persists the association
    pub fn is_owner(&self) -> bool {
        self.descriptor.owner() == self.side
    }

    pub fn is_required(&self) -> bool {
        self.side == Side::Source && self.descriptor.required
    }

    /// Whether the other side may reference many holders, inverse slot or not
    pub fn far_is_many(&self) -> bool {
        match self.side {
            Side::Source => self.descriptor.cardinality.target_is_many(),
            Side::Target => self.descriptor.cardinality.source_is_many(),
        }
    }

    /// The matching slot on the other side, if the relationship is bidirectional
    pub fn far(&self) -> Option<Binding<'s>> {
        Binding::of(self.descriptor, self.index, self.side.flip())
    }
}

/// Serializable schema description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default, rename = "types")]
    pub entity_types: Vec<EntityTypeDef>,

    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
}

/// Registry of entity types and relationships
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: Vec<EntityTypeDef>,
    type_index: BTreeMap<EntityType, usize>,
    relationships: Vec<RelationshipDescriptor>,
    /// Per-type slot bindings, in registration order
    slots: BTreeMap<EntityType, Vec<(String, SlotBinding)>>,
    closed: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a schema from its serialized form
    pub fn from_config(config: SchemaConfig) -> Result<Self> {
        let mut schema = Self::new();
        for def in config.entity_types {
            schema.register_type(def)?;
        }
        for descriptor in config.relationships {
            schema.register(descriptor)?;
        }
        Ok(schema)
    }

    pub fn to_config(&self) -> SchemaConfig {
        SchemaConfig {
            entity_types: self.types.clone(),
            relationships: self.relationships.clone(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Configuration(
                "schema is closed; types and relationships are fixed once the graph manager starts"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Register an entity type
    pub fn register_type(&mut self, def: EntityTypeDef) -> Result<()> {
        self.ensure_open()?;
        validate_type_name(def.name.as_str())?;
        if self.type_index.contains_key(&def.name) {
            return Err(Error::Configuration(format!(
                "entity type {} registered twice",
                def.name
            )));
        }
        for (i, attr) in def.attributes.iter().enumerate() {
            validate_field_name(&attr.name)?;
            if def.attributes[..i].iter().any(|a| a.name == attr.name) {
                return Err(Error::Configuration(format!(
                    "attribute {}.{} declared twice",
                    def.name, attr.name
                )));
            }
        }

        tracing::debug!("Registered entity type {}", def.name);
        self.type_index.insert(def.name.clone(), self.types.len());
        self.slots.entry(def.name.clone()).or_default();
        self.types.push(def);
        Ok(())
    }

    fn ensure_slot_free(&self, ty: &EntityType, slot: &str) -> Result<()> {
        validate_field_name(slot)?;
        let taken_by_slot = self
            .slots
            .get(ty)
            .is_some_and(|s| s.iter().any(|(name, _)| name == slot));
        let taken_by_attr = self
            .type_def(ty)
            .is_some_and(|def| def.attribute(slot).is_some());
        if taken_by_slot || taken_by_attr {
            return Err(Error::Configuration(format!(
                "{}.{} is already bound",
                ty, slot
            )));
        }
        Ok(())
    }

    /// Register a relationship between two registered types
    pub fn register(&mut self, descriptor: RelationshipDescriptor) -> Result<()> {
        self.ensure_open()?;
        let d = &descriptor;

        for ty in [&d.source, &d.target] {
            if !self.contains_type(ty) {
                return Err(Error::Configuration(format!(
                    "relationship {}.{} refers to unregistered type {}",
                    d.source, d.slot, ty
                )));
            }
        }

        if self
            .relationships
            .iter()
            .any(|r| r.source == d.source && r.target == d.target)
        {
            return Err(Error::Configuration(format!(
                "a relationship from {} to {} is already registered",
                d.source, d.target
            )));
        }

        if d.owning_side != d.source && d.owning_side != d.target {
            return Err(Error::Configuration(format!(
                "owning side {} is neither {} nor {}",
                d.owning_side, d.source, d.target
            )));
        }

        match (d.cardinality, d.owner()) {
            (Cardinality::OneToMany, Side::Source) => {
                return Err(Error::Configuration(format!(
                    "{}.{}: a one-to-many relationship is owned by its many side ({})",
                    d.source, d.slot, d.target
                )));
            }
            (Cardinality::ManyToOne, Side::Target) => {
                return Err(Error::Configuration(format!(
                    "{}.{}: a many-to-one relationship is owned by its many side ({})",
                    d.source, d.slot, d.source
                )));
            }
            _ => {}
        }

        if d.required && d.cardinality.source_is_many() {
            return Err(Error::Configuration(format!(
                "{}.{}: only single-valued slots can be required",
                d.source, d.slot
            )));
        }
        // A non-owning slot is emptied when its target is deleted
        if d.required && d.owner() != Side::Source {
            return Err(Error::Configuration(format!(
                "{}.{}: a required slot must be on the owning side",
                d.source, d.slot
            )));
        }

        self.ensure_slot_free(&d.source, &d.slot)?;
        if let Some(inverse) = &d.inverse {
            self.ensure_slot_free(&d.target, inverse)?;
            if d.source == d.target && *inverse == d.slot {
                return Err(Error::Configuration(format!(
                    "{}.{}: inverse slot must differ from the slot itself",
                    d.source, d.slot
                )));
            }
        }

        let index = self.relationships.len();
        self.slots.entry(d.source.clone()).or_default().push((
            d.slot.clone(),
            SlotBinding {
                relationship: index,
                side: Side::Source,
            },
        ));
        if let Some(inverse) = &d.inverse {
            self.slots.entry(d.target.clone()).or_default().push((
                inverse.clone(),
                SlotBinding {
                    relationship: index,
                    side: Side::Target,
                },
            ));
        }

        tracing::debug!(
            "Registered {} relationship {}.{} -> {} (owner {}, cascade {:?}/{:?})",
            d.cardinality,
            d.source,
            d.slot,
            d.target,
            d.owning_side,
            d.cascade,
            d.inverse_cascade
        );
        self.relationships.push(descriptor);
        Ok(())
    }

    /// Close the schema; later registrations fail
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn contains_type(&self, ty: &EntityType) -> bool {
        self.type_index.contains_key(ty)
    }

    pub fn type_def(&self, ty: &EntityType) -> Option<&EntityTypeDef> {
        self.type_index.get(ty).map(|&i| &self.types[i])
    }

    pub fn types(&self) -> &[EntityTypeDef] {
        &self.types
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    fn resolve(&self, binding: &SlotBinding) -> Option<Binding<'_>> {
        Binding::of(
            &self.relationships[binding.relationship],
            binding.relationship,
            binding.side,
        )
    }

    /// Binding for `ty.slot`, if one is registered
    pub fn binding(&self, ty: &EntityType, slot: &str) -> Option<Binding<'_>> {
        self.slots
            .get(ty)?
            .iter()
            .find(|(name, _)| name == slot)
            .and_then(|(_, b)| self.resolve(b))
    }

    /// All slots carried by `ty`, in registration order
    pub fn bindings(&self, ty: &EntityType) -> Vec<Binding<'_>> {
        self.slots
            .get(ty)
            .map(|slots| slots.iter().filter_map(|(_, b)| self.resolve(b)).collect())
            .unwrap_or_default()
    }

    /// Slots on any type that point at `ty`, in registration order
    pub fn inbound(&self, ty: &EntityType) -> Vec<Binding<'_>> {
        let mut found = Vec::new();
        for (index, d) in self.relationships.iter().enumerate() {
            if d.target == *ty {
                found.extend(Binding::of(d, index, Side::Source));
            }
            if d.source == *ty {
                found.extend(Binding::of(d, index, Side::Target));
            }
        }
        found
    }
}
