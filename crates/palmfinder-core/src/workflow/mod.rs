//! Detection Workflow
//!
//! Wires the permission gate, source acquirer, detection client, result store
//! and gallery persister into the user-facing operations of one session.
//!
//! Every operation returns a [`StepOutcome`] and never an error: failures are
//! turned into a no-op, a [`Notice`], or an `Error` state with an explicit
//! recovery. The store lock is never held across I/O, so `reset()` or a new
//! source is accepted while a request is outstanding; the late completion is
//! then discarded by ticket mismatch.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::detection::{DetectionClient, HttpDetectionClient, ServiceHealth};
use crate::gallery::{GalleryPersister, SavedMedia};
use crate::permission::{Capability, PermissionGate};
use crate::settings::AppSettings;
use crate::source::{Acquisition, SourceAcquirer};
use crate::store::{Dispatch, WorkflowEvent, WorkflowState, WorkflowStore};
use crate::{CoreError, CoreResult, MediaKind};

// =============================================================================
// Notices
// =============================================================================

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One-shot message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

fn permission_notice(kind: MediaKind, capability: Capability) -> Notice {
    match (capability, kind) {
        (Capability::Camera, _) => {
            Notice::new(NoticeLevel::Warning, "Permission Denied", "Camera access is needed.")
        }
        (Capability::LibraryRead, MediaKind::Image) => Notice::new(
            NoticeLevel::Warning,
            "Permission Required",
            "You need to allow gallery access to select photos.",
        ),
        (Capability::LibraryRead, MediaKind::Video) => Notice::new(
            NoticeLevel::Warning,
            "Permission Required",
            "You need to allow gallery access to select videos.",
        ),
        (Capability::LibraryWrite, MediaKind::Image) => Notice::new(
            NoticeLevel::Warning,
            "Permission Required",
            "Gallery access is needed.",
        ),
        (Capability::LibraryWrite, MediaKind::Video) => Notice::new(
            NoticeLevel::Warning,
            "Permission Required",
            "Gallery access is needed to save videos.",
        ),
    }
}

fn detection_failed_notice(kind: MediaKind, error: &CoreError) -> Notice {
    let (title, message) = match kind {
        MediaKind::Image => ("Error", "Could not connect to AI server."),
        MediaKind::Video => ("Analysis Error", "Failed to process video on the server."),
    };
    Notice::new(NoticeLevel::Error, title, format!("{} ({})", message, error))
}

fn saved_notice(kind: MediaKind) -> Notice {
    let message = match kind {
        MediaKind::Image => "Processed image saved to gallery!",
        MediaKind::Video => "Video saved to gallery!",
    };
    Notice::new(NoticeLevel::Success, "Success 🌴", message)
}

fn save_failed_notice(kind: MediaKind, error: &CoreError) -> Notice {
    let (title, message) = match kind {
        MediaKind::Image => ("Error", "Failed to save image."),
        MediaKind::Video => ("Save Error", "Could not download or save the video."),
    };
    Notice::new(NoticeLevel::Error, title, format!("{} ({})", message, error))
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a workflow operation
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The operation moved the workflow forward
    Applied,
    /// The result was committed to the media library
    Saved(SavedMedia),
    /// The detection service answered the health check
    Healthy(ServiceHealth),
    /// The operation is not valid in the current state; nothing happened
    Ignored,
    /// The user dismissed the picker; nothing happened
    Cancelled,
    /// A capability was refused; nothing happened
    Denied(Capability),
    /// The input was refused before reaching the store
    Rejected(String),
    /// The operation failed; the workflow shows an error when it owns one
    Failed(String),
    /// The operation finished after the workflow moved on; its result was dropped
    Stale,
}

impl StepOutcome {
    /// Whether the operation had an effect
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StepOutcome::Applied | StepOutcome::Saved(_) | StepOutcome::Healthy(_)
        )
    }
}

// =============================================================================
// DetectionWorkflow
// =============================================================================

/// One capture → detect → save session for a media kind
pub struct DetectionWorkflow {
    kind: MediaKind,
    store: tokio::sync::Mutex<WorkflowStore>,
    snapshots: watch::Receiver<WorkflowState>,
    gate: Arc<dyn PermissionGate>,
    source: Arc<dyn SourceAcquirer>,
    client: Arc<dyn DetectionClient>,
    persister: GalleryPersister,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: Mutex<Option<mpsc::UnboundedReceiver<Notice>>>,
}

impl std::fmt::Debug for DetectionWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionWorkflow")
            .field("kind", &self.kind)
            .field("state", &*self.snapshots.borrow())
            .finish_non_exhaustive()
    }
}

impl DetectionWorkflow {
    /// Creates a workflow in `Idle`
    pub fn new(
        kind: MediaKind,
        gate: Arc<dyn PermissionGate>,
        source: Arc<dyn SourceAcquirer>,
        client: Arc<dyn DetectionClient>,
        persister: GalleryPersister,
    ) -> Self {
        let store = WorkflowStore::new(kind);
        let snapshots = store.subscribe();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        Self {
            kind,
            store: tokio::sync::Mutex::new(store),
            snapshots,
            gate,
            source,
            client,
            persister,
            notice_tx,
            notice_rx: Mutex::new(Some(notice_rx)),
        }
    }

    /// Creates a workflow talking HTTP to the configured service
    pub fn from_settings(
        kind: MediaKind,
        settings: &AppSettings,
        gate: Arc<dyn PermissionGate>,
        source: Arc<dyn SourceAcquirer>,
    ) -> CoreResult<Self> {
        let client = Arc::new(HttpDetectionClient::from_settings(&settings.service)?);
        let persister = GalleryPersister::from_settings(gate.clone(), settings)?;
        Ok(Self::new(kind, gate, source, client, persister))
    }

    /// Media kind of this session
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Current state snapshot
    pub fn state(&self) -> WorkflowState {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every applied transition
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.snapshots.clone()
    }

    /// Hands the notice stream to a presentation layer. Returns `None` once taken.
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.notice_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Drains pending notices, unless the stream was taken
    pub fn drain_notices(&self) -> Vec<Notice> {
        let mut guard = self.notice_rx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = guard.as_mut() else {
            return Vec::new();
        };

        let mut notices = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            notices.push(notice);
        }
        notices
    }

    fn notify(&self, notice: Notice) {
        debug!("Notice [{:?}] {}: {}", notice.level, notice.title, notice.message);
        let _ = self.notice_tx.send(notice);
    }

    async fn dispatch(&self, event: WorkflowEvent) -> Dispatch {
        self.store.lock().await.dispatch(event)
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Captures new media with the camera
    pub async fn capture_from_camera(&self) -> StepOutcome {
        if let Some(denied) = self.require(Capability::Camera).await {
            return denied;
        }
        let acquisition = self.source.capture_from_camera(self.kind).await;
        self.apply_acquisition(acquisition).await
    }

    /// Picks existing media from the library
    pub async fn pick_from_library(&self) -> StepOutcome {
        if let Some(denied) = self.require(Capability::LibraryRead).await {
            return denied;
        }
        let acquisition = self.source.pick_from_library(self.kind).await;
        self.apply_acquisition(acquisition).await
    }

    async fn require(&self, capability: Capability) -> Option<StepOutcome> {
        if self.gate.request(capability).await.is_granted() {
            return None;
        }
        info!("{} permission denied", capability);
        self.notify(permission_notice(self.kind, capability));
        Some(StepOutcome::Denied(capability))
    }

    async fn apply_acquisition(&self, acquisition: CoreResult<Acquisition>) -> StepOutcome {
        match acquisition {
            Ok(Acquisition::Selected(source)) => {
                info!("Selected {} source: {}", self.kind, source.locator);
                match self.dispatch(WorkflowEvent::SourceAcquired(source)).await {
                    Dispatch::Applied => StepOutcome::Applied,
                    Dispatch::Ignored => StepOutcome::Ignored,
                }
            }
            Ok(Acquisition::Cancelled) => {
                debug!("{} acquisition dismissed", self.kind);
                StepOutcome::Cancelled
            }
            Err(e) => {
                warn!("{} acquisition failed: {}", self.kind, e);
                self.notify(Notice::new(
                    NoticeLevel::Warning,
                    "Unsupported Media",
                    e.to_string(),
                ));
                StepOutcome::Rejected(e.to_string())
            }
        }
    }

    // =========================================================================
    // Detection
    // =========================================================================

    /// Submits the selected source for detection.
    ///
    /// Only valid in `SourceSelected`; otherwise no request is issued.
    pub async fn detect(&self) -> StepOutcome {
        let (source, ticket) = {
            let mut store = self.store.lock().await;
            if !store.dispatch(WorkflowEvent::DetectRequested).is_applied() {
                return StepOutcome::Ignored;
            }
            match store.state() {
                WorkflowState::Detecting { source, ticket } => (source.clone(), *ticket),
                _ => return StepOutcome::Ignored,
            }
        };

        info!("Submitting {} for detection: {}", self.kind, source.locator);
        let outcome = self.client.detect(&source).await;

        match outcome {
            Ok(result) => {
                let count = result.count;
                match self
                    .dispatch(WorkflowEvent::DetectSucceeded { ticket, result })
                    .await
                {
                    Dispatch::Applied => {
                        info!("Detected {} palm trees in {}", count, source.locator);
                        StepOutcome::Applied
                    }
                    Dispatch::Ignored => {
                        debug!("Discarding stale detection result (ticket {})", ticket);
                        StepOutcome::Stale
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                match self
                    .dispatch(WorkflowEvent::DetectFailed {
                        ticket,
                        message: message.clone(),
                    })
                    .await
                {
                    Dispatch::Applied => {
                        warn!("Detection failed for {}: {}", source.locator, message);
                        self.notify(detection_failed_notice(self.kind, &e));
                        StepOutcome::Failed(message)
                    }
                    Dispatch::Ignored => {
                        debug!("Discarding stale detection failure (ticket {})", ticket);
                        StepOutcome::Stale
                    }
                }
            }
        }
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Saves the processed result to the media library.
    ///
    /// Only valid in `ResultReady`. A refused LibraryWrite leaves the
    /// workflow at `ResultReady` with nothing downloaded.
    pub async fn save(&self) -> StepOutcome {
        if !matches!(self.state(), WorkflowState::ResultReady { .. }) {
            return StepOutcome::Ignored;
        }

        if let Err(e) = self.persister.authorize().await {
            info!("Save aborted: {}", e);
            self.notify(permission_notice(self.kind, Capability::LibraryWrite));
            return StepOutcome::Denied(Capability::LibraryWrite);
        }

        let (result, ticket) = {
            let mut store = self.store.lock().await;
            if !store.dispatch(WorkflowEvent::SaveRequested).is_applied() {
                return StepOutcome::Ignored;
            }
            match store.state() {
                WorkflowState::Saving { result, ticket, .. } => (result.clone(), *ticket),
                _ => return StepOutcome::Ignored,
            }
        };

        match self.persister.persist(&result, self.kind).await {
            Ok(saved) => {
                if !self
                    .dispatch(WorkflowEvent::SaveSucceeded { ticket })
                    .await
                    .is_applied()
                {
                    debug!("Save completed after the workflow moved on (ticket {})", ticket);
                }
                self.notify(saved_notice(self.kind));
                StepOutcome::Saved(saved)
            }
            Err(e) => {
                let message = e.to_string();
                match self
                    .dispatch(WorkflowEvent::SaveFailed {
                        ticket,
                        message: message.clone(),
                    })
                    .await
                {
                    Dispatch::Applied => {
                        warn!("Save failed: {}", message);
                        self.notify(save_failed_notice(self.kind, &e));
                        StepOutcome::Failed(message)
                    }
                    Dispatch::Ignored => {
                        debug!("Discarding stale save failure (ticket {})", ticket);
                        StepOutcome::Stale
                    }
                }
            }
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Returns to `Idle` from any state
    pub async fn reset(&self) -> StepOutcome {
        match self.dispatch(WorkflowEvent::Reset).await {
            Dispatch::Applied => StepOutcome::Applied,
            Dispatch::Ignored => StepOutcome::Ignored,
        }
    }

    /// Dismisses the current error and returns to its recovery state
    pub async fn acknowledge(&self) -> StepOutcome {
        match self.dispatch(WorkflowEvent::Acknowledge).await {
            Dispatch::Applied => StepOutcome::Applied,
            Dispatch::Ignored => StepOutcome::Ignored,
        }
    }

    /// Checks that the detection service is reachable
    pub async fn check_health(&self) -> StepOutcome {
        match self.client.check_health().await {
            Ok(health) => {
                let status = health
                    .status
                    .clone()
                    .unwrap_or_else(|| "Backend running".to_string());
                self.notify(Notice::new(NoticeLevel::Info, "Server Online", status));
                StepOutcome::Healthy(health)
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
                self.notify(Notice::new(
                    NoticeLevel::Error,
                    "Server Offline",
                    format!("Could not connect to AI server. ({})", e),
                ));
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}
