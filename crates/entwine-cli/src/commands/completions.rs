//! Shell completions command

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

use crate::Cli;

/// Binary name the completion scripts are registered for
const BIN_NAME: &str = "entwine";

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: &CompletionsArgs) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let mut writer: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    generate(args.shell, &mut cmd, BIN_NAME, &mut writer);
    writer.flush()?;
    if let Some(path) = &args.out {
        tracing::info!("Wrote {} completions to {}", args.shell, path.display());
    }
    Ok(())
}
