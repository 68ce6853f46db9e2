//! Health command - check that the detection service is reachable.

use anyhow::{Context as _, Result};
use clap::Args;
use palmfinder_core::detection::{DetectionClient, HttpDetectionClient};

use super::{Context, ExitCode};

/// Arguments for the health command
#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Print the service answer as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the health command.
pub async fn run(ctx: &Context, args: &HealthArgs) -> Result<ExitCode> {
    let client = HttpDetectionClient::from_settings(&ctx.settings.service)
        .context("Failed to create detection client")?;

    match client.check_health().await {
        Ok(health) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                println!(
                    "✓ {} is up: {}",
                    client.base_url(),
                    health.status.as_deref().unwrap_or("ok")
                );
                if let Some(env) = &health.environment {
                    println!("  environment: {}", env);
                }
            }
            Ok(ExitCode::Success)
        }
        Err(e) => {
            eprintln!("✗ {} is not reachable: {}", client.base_url(), e);
            Ok(ExitCode::Failure)
        }
    }
}
