//! Output formatting utilities

use std::str::FromStr;

use entwine_core::{Attribute, Entity, EntityKey, Page, Slot};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown output format '{}' (expected table or json)", other),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Json => f.write_str("json"),
        }
    }
}

pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

fn key_label(entity: &Entity) -> String {
    entity
        .key()
        .map(|k| k.to_string())
        .unwrap_or_else(|| format!("{}:?", entity.entity_type()))
}

fn attribute_text(attr: &Attribute) -> String {
    match attr {
        Attribute::Scalar(v) => v.to_string(),
        Attribute::Embedded(vo) => vo.to_string(),
    }
}

fn slot_text(slot: &Slot) -> String {
    let keys = slot.keys();
    if keys.is_empty() {
        "(none)".to_string()
    } else {
        keys.iter().map(EntityKey::to_string).collect::<Vec<_>>().join(", ")
    }
}

/// One-line summary: key plus attributes
pub fn entity_line(entity: &Entity) -> String {
    let attrs: Vec<String> = entity
        .attributes()
        .iter()
        .map(|(name, attr)| format!("{}={}", name, attribute_text(attr)))
        .collect();
    let mut line = key_label(entity);
    if !attrs.is_empty() {
        line.push_str("  ");
        line.push_str(&attrs.join(", "));
    }
    if entity.requires_repair() {
        line.push_str("  [requires repair]");
    }
    line
}

pub fn print_entity(entity: &Entity, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(entity);
    }

    println!("{}", key_label(entity));
    for (name, attr) in entity.attributes() {
        println!("  {}: {}", name, attribute_text(attr));
    }
    for (name, slot) in entity.slots() {
        println!("  {} -> {}", name, slot_text(slot));
    }
    if let Some(created) = entity.created_at() {
        println!("  Created: {}", created);
    }
    if let Some(updated) = entity.updated_at() {
        println!("  Updated: {}", updated);
    }
    if entity.requires_repair() {
        let dangling: Vec<String> = entity.dangling().iter().map(EntityKey::to_string).collect();
        println!("  Requires repair: {}", dangling.join(", "));
    }
    Ok(())
}

pub fn print_entities(entities: &[Entity], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&entities);
    }
    if entities.is_empty() {
        println!("No entities found");
        return Ok(());
    }
    for entity in entities {
        println!("{}", entity_line(entity));
    }
    Ok(())
}

pub fn print_page(page: &Page<Entity>, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(page);
    }
    for entity in &page.data {
        println!("{}", entity_line(entity));
    }
    let info = &page.info;
    println!(
        "Showing {} of {} (offset {}, limit {}){}",
        page.data.len(),
        info.total_count,
        info.offset,
        info.limit,
        if info.has_next_page { ", more available" } else { "" }
    );
    Ok(())
}
