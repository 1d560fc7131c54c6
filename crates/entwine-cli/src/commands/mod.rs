//! CLI command implementations

pub mod completions;
pub mod config;
pub mod entity;
pub mod relation;
pub mod schema;

use entwine_core::EntityKey;

/// Parse `name=value`
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{}'", raw));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Parse `object.field=value` for embedded attributes
pub fn parse_embed(raw: &str) -> Result<(String, String, String), String> {
    let (path, value) = parse_assignment(raw)?;
    let (object, field) = path
        .split_once('.')
        .ok_or_else(|| format!("expected object.field=value, got '{}'", raw))?;
    if object.is_empty() || field.is_empty() {
        return Err(format!("expected object.field=value, got '{}'", raw));
    }
    Ok((object.to_string(), field.to_string(), value))
}

/// Parse `slot=Type:id`
pub fn parse_link(raw: &str) -> Result<(String, EntityKey), String> {
    let (slot, target) = parse_assignment(raw)?;
    let key = target.parse::<EntityKey>().map_err(|e| e.to_string())?;
    Ok((slot, key))
}
