//! CLI command definitions and handlers.

pub mod config;
pub mod detect;
pub mod health;
pub mod session;

use clap::{Parser, Subcommand};
use palmfinder_core::settings::{AppSettings, SettingsManager};
use std::path::PathBuf;

/// Palm Finder - detect palm trees in photos and videos
#[derive(Parser, Debug)]
#[command(name = "palmfinder")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding settings.json (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Detection service base URL, overriding settings
    #[arg(long, global = true, value_name = "URL", value_parser = parse_base_url)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the detection service is reachable
    Health(health::HealthArgs),
    /// Detect palm trees in a photo or video file
    Detect(detect::DetectArgs),
    /// Detect palm trees in the newest camera capture
    Capture(detect::CaptureArgs),
    /// Interactive capture, detect and save session
    Session(session::SessionArgs),
    /// Inspect or create the settings file
    Config(config::ConfigArgs),
}

/// Accepts only absolute http(s) URLs with a host
fn parse_base_url(value: &str) -> Result<String, String> {
    let trimmed = value.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"));

    match host {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(trimmed.to_string()),
        _ => Err(format!(
            "'{}' is not an http:// or https:// URL (for example http://192.168.1.20:5000)",
            value
        )),
    }
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Everything requested was done
    Success,
    /// The command ran but a step did not succeed
    Failure,
    /// The command could not run
    Error,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => std::process::ExitCode::SUCCESS,
            ExitCode::Failure => std::process::ExitCode::from(1),
            ExitCode::Error => std::process::ExitCode::from(2),
        }
    }
}

/// Settings resolved from disk and global flags
#[derive(Debug)]
pub struct Context {
    pub manager: SettingsManager,
    pub settings: AppSettings,
}

impl Context {
    /// Loads settings and applies flag overrides
    pub fn load(cli: &Cli) -> Self {
        let dir = cli
            .config_dir
            .clone()
            .unwrap_or_else(SettingsManager::default_dir);
        let manager = SettingsManager::new(dir);
        let mut settings = manager.load();

        if let Some(base_url) = &cli.base_url {
            settings.service.base_url = base_url.clone();
            settings.normalize();
        }

        Self { manager, settings }
    }
}
