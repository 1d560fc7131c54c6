//! Entwine CLI - Command line interface for the relationship graph manager

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{completions, entity, relation, schema};
use config::{config_file_path, default_data_dir, Config};
use entwine_core::GraphManager;
use entwine_storage::RedbStorage;
use output::OutputFormat;

/// File name of the entity store inside the data directory
const DB_FILE: &str = "entwine.redb";

#[derive(Parser)]
#[command(name = "entwine")]
#[command(author, version, about = "Relationship graph manager with cascades and repair tracking")]
pub struct Cli {
    /// Data directory
    #[arg(short, long, env = "ENTWINE_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Schema: preset name (school, mapping) or path to a TOML/JSON schema file
    #[arg(short, long, global = true)]
    pub schema: Option<String>,

    /// Output format: table, json
    #[arg(short, long, global = true)]
    pub format: Option<String>,

    /// Config file
    #[arg(long, env = "ENTWINE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        config_file_path(self.config.as_deref())
    }

    /// Get the data directory path; the flag wins over the config file
    pub fn data_dir(&self, config: &Config) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| config.data_dir.clone())
            .unwrap_or_else(default_data_dir)
    }

    pub fn schema_source(&self, config: &Config) -> String {
        self.schema.clone().unwrap_or_else(|| config.schema.clone())
    }

    pub fn output_format(&self, config: &Config) -> anyhow::Result<OutputFormat> {
        self.format.as_deref().unwrap_or(config.format.as_str()).parse()
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage entities
    Entity(entity::EntityArgs),
    /// Manage relationship slots
    Relation(relation::RelationArgs),
    /// Inspect and validate schemas
    Schema(schema::SchemaArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Application context with the graph manager over the redb store
pub struct AppContext {
    pub graph: GraphManager<RedbStorage>,
    pub format: OutputFormat,
    pub page_size: i64,
}

impl AppContext {
    pub fn new(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let schema = schema::load_schema(&cli.schema_source(config))?;
        let format = cli.output_format(config)?;

        let data_dir = cli.data_dir(config);
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join(DB_FILE);
        tracing::debug!("Using database at: {:?}", db_path);

        let storage = RedbStorage::open(&db_path)?;

        Ok(Self {
            graph: GraphManager::new(schema, storage),
            format,
            page_size: config.page_size,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::debug!("Starting entwine CLI");

    let config_path = cli.config_path();
    match &cli.command {
        Commands::Config(args) => return commands::config::run(args, &config_path),
        Commands::Completions(args) => return completions::run(args),
        _ => {}
    }
    let config = Config::load(&config_path)?;

    match &cli.command {
        Commands::Entity(args) => {
            let mut ctx = AppContext::new(&cli, &config)?;
            entity::run(args, &mut ctx)?
        }
        Commands::Relation(args) => {
            let mut ctx = AppContext::new(&cli, &config)?;
            relation::run(args, &mut ctx)?
        }
        Commands::Schema(args) => schema::run(args, &cli, &config)?,
        Commands::Config(_) | Commands::Completions(_) => {}
    }

    Ok(())
}
