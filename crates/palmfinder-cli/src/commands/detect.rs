//! Detect and capture commands - one-shot runs of the workflow.

use anyhow::{Context as _, Result};
use clap::Args;
use palmfinder_core::gallery::SavedMedia;
use palmfinder_core::permission::PolicyPermissionGate;
use palmfinder_core::source::LocalSourceAcquirer;
use palmfinder_core::store::WorkflowState;
use palmfinder_core::workflow::{DetectionWorkflow, Notice, StepOutcome};
use palmfinder_core::MediaKind;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use super::{Context, ExitCode};
use crate::render;

/// Arguments for the detect command
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Photo or video to analyze
    pub path: String,

    /// Media kind (inferred from the extension when omitted)
    #[arg(long)]
    pub kind: Option<MediaKind>,

    /// Save the annotated result to the media library
    #[arg(long)]
    pub save: bool,

    /// Print a JSON report instead of text
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the capture command
#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Media kind to capture
    #[arg(long, default_value = "image")]
    pub kind: MediaKind,

    /// Save the annotated result to the media library
    #[arg(long)]
    pub save: bool,

    /// Print a JSON report instead of text
    #[arg(long)]
    pub json: bool,
}

/// JSON report of a one-shot run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    kind: MediaKind,
    state: WorkflowState,
    saved: Option<SavedMedia>,
    notices: Vec<Notice>,
}

/// Run the detect command.
pub async fn run_detect(ctx: &Context, args: &DetectArgs) -> Result<ExitCode> {
    let kind = args
        .kind
        .or_else(|| MediaKind::from_path(Path::new(&args.path)))
        .unwrap_or(MediaKind::Image);

    let (workflow, source) = build(ctx, kind)?;
    source.select(args.path.clone()).await;

    let acquired = workflow.pick_from_library().await;
    pipeline(&workflow, acquired, args.save, args.json).await
}

/// Run the capture command.
pub async fn run_capture(ctx: &Context, args: &CaptureArgs) -> Result<ExitCode> {
    if ctx.settings.storage.capture_dir.is_none() {
        anyhow::bail!(
            "No capture directory configured. Set storage.captureDir in {}",
            ctx.manager.settings_path().display()
        );
    }

    let (workflow, _) = build(ctx, args.kind)?;
    let acquired = workflow.capture_from_camera().await;
    pipeline(&workflow, acquired, args.save, args.json).await
}

fn build(ctx: &Context, kind: MediaKind) -> Result<(DetectionWorkflow, Arc<LocalSourceAcquirer>)> {
    let gate = Arc::new(PolicyPermissionGate::from_settings(&ctx.settings.permissions));
    let source = Arc::new(LocalSourceAcquirer::new(
        ctx.settings.storage.capture_dir_path(),
    ));
    let workflow = DetectionWorkflow::from_settings(kind, &ctx.settings, gate, source.clone())
        .context("Failed to set up detection workflow")?;
    Ok((workflow, source))
}

/// Detect, and optionally save, after an acquisition step.
async fn pipeline(
    workflow: &DetectionWorkflow,
    acquired: StepOutcome,
    save: bool,
    json: bool,
) -> Result<ExitCode> {
    let mut notices = workflow.drain_notices();
    let mut saved = None;
    let mut code = ExitCode::Success;

    if !json {
        render::print_step(&acquired, &notices);
    }

    if acquired == StepOutcome::Applied {
        if !json {
            println!("{}", render::state_line(workflow.kind(), &workflow.state()));
        }

        let detected = workflow.detect().await;
        let step_notices = workflow.drain_notices();
        if !json {
            render::print_step(&detected, &step_notices);
            println!("{}", render::state_line(workflow.kind(), &workflow.state()));
        }
        notices.extend(step_notices);

        if detected != StepOutcome::Applied {
            code = ExitCode::Failure;
        } else if save {
            let outcome = workflow.save().await;
            let step_notices = workflow.drain_notices();
            if !json {
                render::print_step(&outcome, &step_notices);
            }
            notices.extend(step_notices);

            match outcome {
                StepOutcome::Saved(media) => saved = Some(media),
                _ => code = ExitCode::Failure,
            }
        }
    } else {
        code = ExitCode::Failure;
    }

    if json {
        let report = Report {
            kind: workflow.kind(),
            state: workflow.state(),
            saved,
            notices,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(code)
}
