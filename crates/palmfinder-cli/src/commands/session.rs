//! Session command - interactive capture, detect and save loop.

use anyhow::{Context as _, Result};
use clap::Args;
use palmfinder_core::permission::PolicyPermissionGate;
use palmfinder_core::source::LocalSourceAcquirer;
use palmfinder_core::workflow::{DetectionWorkflow, StepOutcome};
use palmfinder_core::MediaKind;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::BufReader;
use tracing::info;

use super::{Context, ExitCode};
use crate::gate::{shared_lines, SharedLines, TerminalPermissionGate};
use crate::render;

/// Arguments for the session command
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Media kind handled by this session
    #[arg(long, default_value = "image")]
    pub kind: MediaKind,

    /// Grant every permission without asking
    #[arg(short, long)]
    pub yes: bool,
}

/// A line typed at the session prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Pick(String),
    Capture,
    Detect,
    Save,
    Reset,
    Ack,
    Status,
    Health,
    Help,
    Quit,
}

/// Why a prompt line was not understood
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("usage: pick <path>")]
    MissingPath,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
}

const HELP: &str = "\
Commands:
  pick <path>   select a file from the library
  capture       take the newest file from the camera roll
  detect        analyze the selected file
  save          save the annotated result to the library
  reset         start over
  ack           dismiss the current error
  status        show the current state
  health        check the detection service
  help          show this help
  quit          leave the session";

/// Parses a prompt line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<SessionCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "pick" | "open" => {
            let path = rest.trim_matches(|c| c == '"' || c == '\'');
            if path.is_empty() {
                return Err(ParseError::MissingPath);
            }
            SessionCommand::Pick(path.to_string())
        }
        "capture" | "camera" => SessionCommand::Capture,
        "detect" | "analyze" => SessionCommand::Detect,
        "save" => SessionCommand::Save,
        "reset" => SessionCommand::Reset,
        "ack" | "ok" => SessionCommand::Ack,
        "status" => SessionCommand::Status,
        "health" => SessionCommand::Health,
        "help" | "?" => SessionCommand::Help,
        "quit" | "exit" | "q" => SessionCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}

/// Runs one command against the workflow. Returns `None` for commands that
/// do not touch it.
pub async fn execute(
    workflow: &DetectionWorkflow,
    source: &LocalSourceAcquirer,
    command: SessionCommand,
) -> Option<StepOutcome> {
    let outcome = match command {
        SessionCommand::Pick(path) => {
            source.select(path).await;
            workflow.pick_from_library().await
        }
        SessionCommand::Capture => workflow.capture_from_camera().await,
        SessionCommand::Detect => workflow.detect().await,
        SessionCommand::Save => workflow.save().await,
        SessionCommand::Reset => workflow.reset().await,
        SessionCommand::Ack => workflow.acknowledge().await,
        SessionCommand::Health => workflow.check_health().await,
        SessionCommand::Status | SessionCommand::Help | SessionCommand::Quit => return None,
    };
    Some(outcome)
}

/// Run the session command.
pub async fn run(ctx: &Context, args: &SessionArgs) -> Result<ExitCode> {
    let input = shared_lines(BufReader::new(tokio::io::stdin()));

    let policy = PolicyPermissionGate::from_settings(&ctx.settings.permissions);
    let gate = Arc::new(TerminalPermissionGate::new(policy, input.clone(), args.yes));
    let source = Arc::new(LocalSourceAcquirer::new(
        ctx.settings.storage.capture_dir_path(),
    ));
    let workflow = DetectionWorkflow::from_settings(args.kind, &ctx.settings, gate, source.clone())
        .context("Failed to set up detection workflow")?;

    info!("Starting {} session against {}", args.kind, ctx.settings.service.base_url);
    println!(
        "Palm Finder {} session ({}). Type 'help' for commands.",
        args.kind, ctx.settings.service.base_url
    );

    run_loop(&workflow, &source, &input).await?;
    Ok(ExitCode::Success)
}

async fn run_loop(
    workflow: &DetectionWorkflow,
    source: &LocalSourceAcquirer,
    input: &SharedLines,
) -> Result<()> {
    loop {
        print!("palmfinder:{}> ", workflow.state().name());
        std::io::stdout().flush()?;

        let Some(line) = input.lock().await.next_line().await? else {
            println!();
            return Ok(());
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match command {
            SessionCommand::Quit => return Ok(()),
            SessionCommand::Help => println!("{}", HELP),
            SessionCommand::Status => {
                println!("{}", render::state_line(workflow.kind(), &workflow.state()))
            }
            other => {
                let shows_state = !matches!(other, SessionCommand::Health);
                if let Some(outcome) = execute(workflow, source, other).await {
                    render::print_step(&outcome, &workflow.drain_notices());
                    if shows_state && outcome.is_success() {
                        println!("{}", render::state_line(workflow.kind(), &workflow.state()));
                    }
                }
            }
        }
    }
}
