//! Palm Finder CLI - detect palm trees in photos and videos from the terminal.

use clap::Parser;
use palmfinder_core::logging::{attach_log_dir, init_logging, level_for_verbosity};

mod commands;
mod gate;
mod render;

use commands::{Cli, Commands, Context, ExitCode};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(level_for_verbosity(cli.verbose), None);

    let ctx = Context::load(&cli);
    if ctx.settings.logging.file_logging {
        attach_log_dir(&ctx.settings.logging.log_dir_path());
    }

    let result = match &cli.command {
        Commands::Health(args) => commands::health::run(&ctx, args).await,
        Commands::Detect(args) => commands::detect::run_detect(&ctx, args).await,
        Commands::Capture(args) => commands::detect::run_capture(&ctx, args).await,
        Commands::Session(args) => commands::session::run(&ctx, args).await,
        Commands::Config(args) => commands::config::run(&ctx, args),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::Error
        }
    };

    exit_code.into()
}
