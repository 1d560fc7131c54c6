//! Entity commands

use std::collections::BTreeMap;

use clap::{Args, Subcommand, ValueEnum};

use super::{parse_assignment, parse_embed, parse_link};
use crate::output::{self, OutputFormat};
use crate::AppContext;
use entwine_core::{
    CascadeOp, Entity, EntityKey, EntityType, PageRequest, SortDirection, Value, ValueObject,
};

#[derive(Args)]
pub struct EntityArgs {
    #[command(subcommand)]
    pub command: EntityCommands,
}

#[derive(Subcommand)]
pub enum EntityCommands {
    /// Add a new entity
    Add {
        /// Entity type
        r#type: String,
        /// Scalar attribute (name=value)
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// Embedded value object field (object.field=value)
        #[arg(long = "embed", value_parser = parse_embed)]
        embed: Vec<(String, String, String)>,
        /// Reference to an existing entity (slot=Type:id)
        #[arg(long = "link", value_parser = parse_link)]
        link: Vec<(String, EntityKey)>,
    },
    /// Get entity details
    Get {
        /// Entity type
        r#type: String,
        /// Entity identifier
        id: u64,
    },
    /// List entities of a type
    List {
        /// Attribute filter (name=value or object.field=value)
        #[arg(short, long = "where", value_parser = parse_assignment)]
        r#where: Vec<(String, String)>,
        /// Entity type
        r#type: String,
        /// Limit results
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
    /// Show one page of entities
    Page {
        /// Attribute filter (name=value or object.field=value)
        #[arg(short, long = "where", value_parser = parse_assignment)]
        r#where: Vec<(String, String)>,
        /// Entity type
        r#type: String,
        /// Number of entities to skip
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        offset: i64,
        /// Page size (defaults to the configured page size)
        #[arg(short, long, allow_negative_numbers = true)]
        limit: Option<i64>,
        /// Sort key: "id" or an attribute name
        #[arg(long, default_value = "id")]
        sort: String,
        /// Sort descending
        #[arg(long)]
        desc: bool,
    },
    /// Delete an entity and everything its delete cascade reaches
    Delete {
        /// Entity type
        r#type: String,
        /// Entity identifier
        id: u64,
    },
    /// Drop dangling references left behind by a delete
    Repair {
        /// Entity type
        r#type: String,
        /// Entity identifier
        id: u64,
    },
    /// Show which entities a cascade would reach, without changing anything
    Plan {
        /// Entity type
        r#type: String,
        /// Entity identifier
        id: u64,
        /// Cascade operation
        #[arg(long, value_enum, default_value = "delete")]
        op: PlanOp,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PlanOp {
    Save,
    Delete,
}

impl From<PlanOp> for CascadeOp {
    fn from(op: PlanOp) -> Self {
        match op {
            PlanOp::Save => CascadeOp::Save,
            PlanOp::Delete => CascadeOp::Delete,
        }
    }
}

pub fn run(args: &EntityArgs, ctx: &mut AppContext) -> anyhow::Result<()> {
    match &args.command {
        EntityCommands::Add {
            r#type,
            set,
            embed,
            link,
        } => {
            let entity = build_entity(ctx, r#type, set, embed, link);
            let saved = ctx.graph.save(entity)?;
            if ctx.format == OutputFormat::Json {
                output::print_json(&saved)?;
            } else {
                println!("Created {}", output::entity_line(&saved));
            }
        }
        EntityCommands::Get { r#type, id } => {
            let entity = ctx.graph.find_by_id(r#type.as_str(), *id)?;
            output::print_entity(&entity, ctx.format)?;
        }
        EntityCommands::List {
            r#type,
            r#where,
            limit,
        } => {
            let filters = parse_filters(r#where);
            let query = ctx.graph.query(r#type.as_str(), move |e: &Entity| {
                filters.iter().all(|(name, value)| matches(e, name, value))
            })?;
            let entities: Vec<Entity> = query.iter()?.take(*limit).collect();
            tracing::debug!("Listed {} {} entities", entities.len(), query.entity_type());
            output::print_entities(&entities, ctx.format)?;
        }
        EntityCommands::Page {
            r#type,
            r#where,
            offset,
            limit,
            sort,
            desc,
        } => {
            let direction = if *desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            let request = PageRequest::new(*offset, limit.unwrap_or(ctx.page_size))
                .sort_by(sort.as_str(), direction);
            let filters = parse_filters(r#where);
            let page = ctx.graph.page_where(
                r#type.as_str(),
                |e: &Entity| filters.iter().all(|(name, value)| matches(e, name, value)),
                &request,
            )?;
            output::print_page(&page, ctx.format)?;
        }
        EntityCommands::Delete { r#type, id } => {
            let report = ctx.graph.delete(r#type.as_str(), *id)?;
            if ctx.format == OutputFormat::Json {
                output::print_json(&report)?;
            } else {
                for key in &report.deleted {
                    println!("Deleted {}", key);
                }
                for key in &report.requires_repair {
                    println!("Requires repair: {}", key);
                }
            }
        }
        EntityCommands::Repair { r#type, id } => {
            let entity = ctx.graph.repair(r#type.as_str(), *id)?;
            if ctx.format == OutputFormat::Json {
                output::print_json(&entity)?;
            } else {
                println!("Repaired {}", output::entity_line(&entity));
            }
        }
        EntityCommands::Plan { r#type, id, op } => {
            let key = EntityKey::new(r#type.as_str(), *id);
            let plan = ctx.graph.cascade_plan(&key, (*op).into())?;
            if ctx.format == OutputFormat::Json {
                output::print_json(&plan)?;
            } else {
                for (depth, key) in plan.order.iter().enumerate() {
                    println!("{:>3}. {}", depth + 1, key);
                }
                println!(
                    "{} entities, {} edges followed",
                    plan.order.len(),
                    plan.stats.edges_followed
                );
            }
        }
    }

    Ok(())
}

/// Assemble a transient entity from command line pieces
///
/// Links go through `add_to` for collection slots and `set_one` otherwise;
/// unknown slots are left for the graph manager to reject.
fn build_entity(
    ctx: &AppContext,
    entity_type: &str,
    set: &[(String, String)],
    embed: &[(String, String, String)],
    link: &[(String, EntityKey)],
) -> Entity {
    let ty = EntityType::new(entity_type);
    let mut entity = Entity::new(ty.clone());

    for (name, raw) in set {
        entity.set_attribute(name.as_str(), Value::parse(raw));
    }

    let mut objects: BTreeMap<&str, ValueObject> = BTreeMap::new();
    for (object, field, raw) in embed {
        objects
            .entry(object.as_str())
            .or_insert_with(|| ValueObject::new(object_kind(object)))
            .set(field.as_str(), Value::parse(raw));
    }
    for (object, value) in objects {
        entity.set_attribute(object, value);
    }

    let schema = ctx.graph.schema();
    for (slot, key) in link {
        let many = schema
            .binding(&ty, slot)
            .map(|b| b.is_many())
            .unwrap_or(false);
        if many {
            entity.add_to(slot.as_str(), key.clone());
        } else {
            entity.set_one(slot.as_str(), key.clone());
        }
    }
    entity
}

fn object_kind(object: &str) -> String {
    match object {
        "name" => entwine_core::presets::FULL_NAME.to_string(),
        other => other.to_string(),
    }
}

fn parse_filters(assignments: &[(String, String)]) -> Vec<(String, Value)> {
    assignments
        .iter()
        .map(|(name, raw)| (name.clone(), Value::parse(raw)))
        .collect()
}

/// Compare a scalar, or a value object field for `object.field`
fn matches(entity: &Entity, name: &str, expected: &Value) -> bool {
    let actual = match name.split_once('.') {
        Some((object, field)) => entity.embedded(object).and_then(|vo| vo.get(field)),
        None => entity.scalar(name),
    };
    actual == Some(expected)
}
