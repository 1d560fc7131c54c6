//! Built-in schemas
//!
//! `school` models students, guardians, courses, teachers and course
//! materials; `mapping` models people with a passport and their laptops.

use crate::error::{Error, Result};
use crate::schema::{Cardinality, CascadePolicy, EntityTypeDef, RelationshipDescriptor, Schema};
use crate::value::ValueObject;

/// Names accepted by [`by_name`]
pub const PRESET_NAMES: &[&str] = &["school", "mapping"];

/// Value object kind used for personal names
pub const FULL_NAME: &str = "FullName";

/// A `FullName` value object; empty parts are left out
pub fn full_name(first: &str, middle: &str, last: &str) -> ValueObject {
    let mut name = ValueObject::new(FULL_NAME);
    for (field, part) in [("firstname", first), ("middlename", middle), ("lastname", last)] {
        if !part.is_empty() {
            name.set(field, part);
        }
    }
    name
}

pub fn by_name(name: &str) -> Result<Schema> {
    match name {
        "school" => school(),
        "mapping" => mapping(),
        other => Err(Error::Configuration(format!(
            "unknown schema preset '{}' (expected one of: {})",
            other,
            PRESET_NAMES.join(", ")
        ))),
    }
}

pub fn school() -> Result<Schema> {
    let mut schema = Schema::new();
    schema.register_type(
        EntityTypeDef::new("Student")
            .embedded("name")
            .required_scalar("email")
            .unique(),
    )?;
    schema.register_type(
        EntityTypeDef::new("Guardian")
            .scalar("name")
            .scalar("email")
            .scalar("mobile"),
    )?;
    schema.register_type(EntityTypeDef::new("Course").scalar("name").scalar("credits"))?;
    schema.register_type(EntityTypeDef::new("Teacher").embedded("name"))?;
    schema.register_type(EntityTypeDef::new("CourseMaterial").scalar("url"))?;

    schema.register(
        RelationshipDescriptor::new("Student", "guardian", "Guardian", Cardinality::ManyToOne)
            .inverse("students")
            .inverse_cascade(CascadePolicy::All)
            .required(),
    )?;
    // Courses are shared between students, so only saves cascade from a student
    schema.register(
        RelationshipDescriptor::new("Course", "students", "Student", Cardinality::ManyToMany)
            .inverse("courses")
            .inverse_cascade(CascadePolicy::Save),
    )?;
    schema.register(
        RelationshipDescriptor::new("Course", "teacher", "Teacher", Cardinality::ManyToOne)
            .inverse("courses")
            .inverse_cascade(CascadePolicy::All),
    )?;
    schema.register(
        RelationshipDescriptor::new("CourseMaterial", "course", "Course", Cardinality::OneToOne)
            .inverse("material")
            .inverse_cascade(CascadePolicy::All),
    )?;
    Ok(schema)
}

pub fn mapping() -> Result<Schema> {
    let mut schema = Schema::new();
    schema.register_type(EntityTypeDef::new("Person").embedded("name"))?;
    schema.register_type(EntityTypeDef::new("Passport").embedded("name"))?;
    schema.register_type(
        EntityTypeDef::new("Laptop")
            .scalar("brand")
            .scalar("model")
            .scalar("price"),
    )?;

    schema.register(
        RelationshipDescriptor::new("Person", "passport", "Passport", Cardinality::OneToOne)
            .inverse("person")
            .inverse_cascade(CascadePolicy::All),
    )?;
    schema.register(
        RelationshipDescriptor::new("Laptop", "person", "Person", Cardinality::ManyToOne)
            .inverse("laptops")
            .inverse_cascade(CascadePolicy::All),
    )?;
    Ok(schema)
}
