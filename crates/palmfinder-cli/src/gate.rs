//! Interactive permission prompts.

use async_trait::async_trait;
use palmfinder_core::permission::{
    Capability, PermissionGate, PermissionStatus, PolicyPermissionGate,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Mutex;
use tracing::debug;

/// Line source shared by the session loop and the permission prompt
pub type SharedLines = Arc<Mutex<Lines<Box<dyn AsyncBufRead + Unpin + Send>>>>;

/// Wraps any async reader as a shared line source
pub fn shared_lines(reader: impl AsyncBufRead + Unpin + Send + 'static) -> SharedLines {
    let boxed: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(reader);
    Arc::new(Mutex::new(boxed.lines()))
}

/// Asks on the terminal the first time a capability is needed.
///
/// Capabilities switched off in settings are denied without asking. Answers
/// are remembered for the rest of the session.
pub struct TerminalPermissionGate {
    policy: PolicyPermissionGate,
    input: SharedLines,
    answers: Mutex<HashMap<Capability, PermissionStatus>>,
    assume_yes: bool,
}

impl TerminalPermissionGate {
    pub fn new(policy: PolicyPermissionGate, input: SharedLines, assume_yes: bool) -> Self {
        Self {
            policy,
            input,
            answers: Mutex::new(HashMap::new()),
            assume_yes,
        }
    }

    async fn prompt(&self, capability: Capability) -> PermissionStatus {
        print!("Allow Palm Finder to access {}? [y/N] ", capability);
        let _ = std::io::stdout().flush();

        let line = match self.input.lock().await.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return PermissionStatus::Denied,
        };

        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => PermissionStatus::Granted,
            _ => PermissionStatus::Denied,
        }
    }
}

#[async_trait]
impl PermissionGate for TerminalPermissionGate {
    async fn request(&self, capability: Capability) -> PermissionStatus {
        if !self.policy.request(capability).await.is_granted() {
            debug!("{} disabled in settings", capability);
            return PermissionStatus::Denied;
        }

        if let Some(answer) = self.answers.lock().await.get(&capability) {
            return *answer;
        }

        let answer = if self.assume_yes {
            PermissionStatus::Granted
        } else {
            self.prompt(capability).await
        };

        self.answers.lock().await.insert(capability, answer);
        answer
    }
}
