//! Config command - inspect or create the settings file.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use super::{Context, ExitCode};

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file path
    Path,
    /// Write the effective settings to disk
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub fn run(ctx: &Context, args: &ConfigArgs) -> Result<ExitCode> {
    match args.command {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
            Ok(ExitCode::Success)
        }
        ConfigCommand::Path => {
            println!("{}", ctx.manager.settings_path().display());
            Ok(ExitCode::Success)
        }
        ConfigCommand::Init { force } => init(ctx, force),
    }
}

fn init(ctx: &Context, force: bool) -> Result<ExitCode> {
    let path = ctx.manager.settings_path();
    if path.exists() && !force {
        eprintln!(
            "Settings already exist at {} (use --force to overwrite)",
            path.display()
        );
        return Ok(ExitCode::Failure);
    }

    ctx.manager
        .save(&ctx.settings)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(ExitCode::Success)
}
