//! Schema commands

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::output::{self, OutputFormat};
use crate::Cli;
use entwine_core::{presets, Schema, SchemaConfig};

#[derive(Args)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub command: SchemaCommands,
}

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Show the active schema
    Show,
    /// Validate a schema file
    Check {
        /// TOML or JSON schema file
        file: PathBuf,
    },
    /// List the built-in schema presets
    Presets,
}

/// Resolve a preset name or a schema file into a validated schema
pub fn load_schema(source: &str) -> anyhow::Result<Schema> {
    if presets::PRESET_NAMES.contains(&source) {
        return Ok(presets::by_name(source)?);
    }
    let path = Path::new(source);
    if !path.exists() {
        anyhow::bail!(
            "Unknown schema '{}': not a preset ({}) and no such file",
            source,
            presets::PRESET_NAMES.join(", ")
        );
    }
    load_schema_file(path)
}

fn load_schema_file(path: &Path) -> anyhow::Result<Schema> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    let config: SchemaConfig = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };
    let schema = Schema::from_config(config)
        .with_context(|| format!("Invalid schema in {}", path.display()))?;
    tracing::debug!("Loaded schema from {}", path.display());
    Ok(schema)
}

pub fn run(args: &SchemaArgs, cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let format = cli.output_format(config)?;
    match &args.command {
        SchemaCommands::Show => {
            let schema = load_schema(&cli.schema_source(config))?;
            show(&schema, format)?;
        }
        SchemaCommands::Check { file } => {
            let schema = load_schema_file(file)?;
            println!(
                "Schema OK: {} types, {} relationships",
                schema.types().len(),
                schema.relationships().len()
            );
        }
        SchemaCommands::Presets => {
            for name in presets::PRESET_NAMES {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

fn show(schema: &Schema, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return output::print_json(&schema.to_config());
    }

    println!("Types:");
    for def in schema.types() {
        println!("  {}", def.name);
        for binding in schema.bindings(&def.name) {
            println!(
                "    {} -> {}{}{}",
                binding.slot(),
                binding.target(),
                if binding.is_many() { " (many)" } else { "" },
                if binding.is_owner() { " [owner]" } else { "" }
            );
        }
    }
    println!();
    println!("Relationships:");
    for rel in schema.relationships() {
        println!(
            "  {}.{} -> {} ({}, owned by {}, cascade {:?}/{:?})",
            rel.source, rel.slot, rel.target, rel.cardinality, rel.owning_side, rel.cascade, rel.inverse_cascade
        );
    }
    Ok(())
}
