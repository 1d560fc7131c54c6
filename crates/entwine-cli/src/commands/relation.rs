//! Relation commands

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use crate::AppContext;
use entwine_core::EntityKey;

#[derive(Args)]
pub struct RelationArgs {
    #[command(subcommand)]
    pub command: RelationCommands,
}

#[derive(Subcommand)]
pub enum RelationCommands {
    /// Point a slot at an entity; the inverse side follows
    Link {
        /// Holder type
        r#type: String,
        /// Holder identifier
        id: u64,
        /// Slot name
        slot: String,
        /// Target type
        target_type: String,
        /// Target identifier
        target_id: u64,
    },
    /// Remove an entity from a slot; the inverse side follows
    Unlink {
        /// Holder type
        r#type: String,
        /// Holder identifier
        id: u64,
        /// Slot name
        slot: String,
        /// Target type
        target_type: String,
        /// Target identifier
        target_id: u64,
    },
    /// Load the entities a slot refers to
    Resolve {
        /// Holder type
        r#type: String,
        /// Holder identifier
        id: u64,
        /// Slot name
        slot: String,
    },
}

pub fn run(args: &RelationArgs, ctx: &mut AppContext) -> anyhow::Result<()> {
    match &args.command {
        RelationCommands::Link {
            r#type,
            id,
            slot,
            target_type,
            target_id,
        } => {
            let from = EntityKey::new(r#type.as_str(), *id);
            let to = EntityKey::new(target_type.as_str(), *target_id);
            ctx.graph.link(&from, slot, &to)?;
            if ctx.format != OutputFormat::Json {
                println!("Linked {}.{} -> {}", from, slot, to);
            }
        }
        RelationCommands::Unlink {
            r#type,
            id,
            slot,
            target_type,
            target_id,
        } => {
            let from = EntityKey::new(r#type.as_str(), *id);
            let to = EntityKey::new(target_type.as_str(), *target_id);
            ctx.graph.unlink(&from, slot, &to)?;
            if ctx.format != OutputFormat::Json {
                println!("Unlinked {}.{} -> {}", from, slot, to);
            }
        }
        RelationCommands::Resolve { r#type, id, slot } => {
            let holder = ctx.graph.find_by_id(r#type.as_str(), *id)?;
            let targets = ctx.graph.resolve(&holder, slot)?;
            output::print_entities(&targets, ctx.format)?;
        }
    }

    Ok(())
}
