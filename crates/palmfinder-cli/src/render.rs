//! Terminal rendering of workflow state, notices and outcomes.

use palmfinder_core::store::WorkflowState;
use palmfinder_core::workflow::{Notice, NoticeLevel, StepOutcome};
use palmfinder_core::MediaKind;

/// One-line summary of a state snapshot
pub fn state_line(kind: MediaKind, state: &WorkflowState) -> String {
    match state {
        WorkflowState::Idle => format!("No {} selected", kind),
        WorkflowState::SourceSelected { source } => format!("Selected {}", source.locator),
        WorkflowState::Detecting { source, .. } => format!("Analyzing {}...", source.locator),
        WorkflowState::ResultReady { result, .. } => format!(
            "Palm trees detected: {} (output: {})",
            result.count, result.output_locator
        ),
        WorkflowState::Saving { result, .. } => format!("Saving {}...", result.output_locator),
        WorkflowState::Error { message, .. } => {
            format!("Error: {} (type 'ack' to continue)", message)
        }
    }
}

/// Line for a notice
pub fn notice_line(notice: &Notice) -> String {
    let marker = match notice.level {
        NoticeLevel::Info => "i",
        NoticeLevel::Success => "✓",
        NoticeLevel::Warning => "!",
        NoticeLevel::Error => "✗",
    };
    format!("{} {}: {}", marker, notice.title, notice.message)
}

/// Line for an outcome the notices do not already describe
pub fn outcome_line(outcome: &StepOutcome) -> Option<String> {
    match outcome {
        StepOutcome::Saved(saved) => Some(format!(
            "Saved to {} ({} bytes)",
            saved.library_path.display(),
            saved.bytes
        )),
        StepOutcome::Healthy(health) => Some(format!(
            "Service is up{}",
            health
                .environment
                .as_deref()
                .map(|env| format!(" ({})", env))
                .unwrap_or_default()
        )),
        StepOutcome::Ignored => Some("Nothing to do in the current state".to_string()),
        StepOutcome::Cancelled => Some("Cancelled".to_string()),
        StepOutcome::Stale => Some("Result discarded: the session moved on".to_string()),
        StepOutcome::Applied
        | StepOutcome::Denied(_)
        | StepOutcome::Rejected(_)
        | StepOutcome::Failed(_) => None,
    }
}

/// Prints notices to stderr and the outcome to stdout
pub fn print_step(outcome: &StepOutcome, notices: &[Notice]) {
    for notice in notices {
        eprintln!("{}", notice_line(notice));
    }
    if let Some(line) = outcome_line(outcome) {
        println!("{}", line);
    }
}
