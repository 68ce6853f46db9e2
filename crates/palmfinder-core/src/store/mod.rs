//! Result Store
//!
//! The workflow state machine. It is the only owner of [`WorkflowState`] and
//! the single source of truth that presentation layers observe.
//!
//! Every (state, event) pair has a defined outcome: either the transition in
//! the table below, or an ignored no-op. Duplicate or late events from slow
//! I/O therefore cannot corrupt state.
//!
//! | Current state            | Event                       | Next state                           |
//! |--------------------------|-----------------------------|--------------------------------------|
//! | any                      | `SourceAcquired(ref)`       | `SourceSelected(ref)`                |
//! | `SourceSelected(ref)`    | `DetectRequested`           | `Detecting(ref, t)`                  |
//! | `Detecting(ref, t)`      | `DetectSucceeded(t, res)`   | `ResultReady(ref, res)`              |
//! | `Detecting(ref, t)`      | `DetectFailed(t, msg)`      | `Error(msg, SourceSelected(ref))`    |
//! | `ResultReady(ref, res)`  | `SaveRequested`             | `Saving(ref, res, t)`                |
//! | `Saving(ref, res, t)`    | `SaveSucceeded(t)`          | `ResultReady(ref, res)`              |
//! | `Saving(ref, res, t)`    | `SaveFailed(t, msg)`        | `Error(msg, ResultReady(ref, res))`  |
//! | any                      | `Reset`                     | `Idle`                               |
//! | `Error(_, recovery)`     | `Acknowledge`               | `recovery`                           |
//!
//! Completion events carry the ticket issued when their phase started; a
//! ticket that no longer matches the current phase marks a stale response.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::{DetectionResult, MediaKind, MediaReference, RequestTicket};

// =============================================================================
// State
// =============================================================================

/// Workflow state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowState {
    /// Nothing selected
    #[default]
    Idle,
    /// Source picked, ready to detect
    SourceSelected { source: MediaReference },
    /// Detection request in flight
    Detecting {
        source: MediaReference,
        ticket: RequestTicket,
    },
    /// Detection result available
    ResultReady {
        source: MediaReference,
        result: DetectionResult,
    },
    /// Save in flight
    Saving {
        source: MediaReference,
        result: DetectionResult,
        ticket: RequestTicket,
    },
    /// A step failed; `recovery` is where `Acknowledge` returns to
    Error {
        message: String,
        recovery: Box<WorkflowState>,
    },
}

impl WorkflowState {
    /// Short name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::SourceSelected { .. } => "sourceSelected",
            WorkflowState::Detecting { .. } => "detecting",
            WorkflowState::ResultReady { .. } => "resultReady",
            WorkflowState::Saving { .. } => "saving",
            WorkflowState::Error { .. } => "error",
        }
    }

    /// Media reference held by the state, if any
    pub fn source(&self) -> Option<&MediaReference> {
        match self {
            WorkflowState::Idle => None,
            WorkflowState::SourceSelected { source }
            | WorkflowState::Detecting { source, .. }
            | WorkflowState::ResultReady { source, .. }
            | WorkflowState::Saving { source, .. } => Some(source),
            WorkflowState::Error { recovery, .. } => recovery.source(),
        }
    }

    /// Detection result held by the state, if any
    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            WorkflowState::ResultReady { result, .. } | WorkflowState::Saving { result, .. } => {
                Some(result)
            }
            WorkflowState::Error { recovery, .. } => recovery.result(),
            _ => None,
        }
    }

    /// Ticket of the in-flight phase, if any
    pub fn ticket(&self) -> Option<RequestTicket> {
        match self {
            WorkflowState::Detecting { ticket, .. } | WorkflowState::Saving { ticket, .. } => {
                Some(*ticket)
            }
            _ => None,
        }
    }

    /// Whether a detection or save is in flight
    pub fn is_busy(&self) -> bool {
        self.ticket().is_some()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Events accepted by the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowEvent {
    /// A new source was picked or captured
    SourceAcquired(MediaReference),
    /// The user asked to run detection
    DetectRequested,
    /// Detection finished successfully
    DetectSucceeded {
        ticket: RequestTicket,
        result: DetectionResult,
    },
    /// Detection failed
    DetectFailed {
        ticket: RequestTicket,
        message: String,
    },
    /// The user asked to save the result
    SaveRequested,
    /// Save finished successfully
    SaveSucceeded { ticket: RequestTicket },
    /// Save failed
    SaveFailed {
        ticket: RequestTicket,
        message: String,
    },
    /// Back to the start
    Reset,
    /// Dismiss an error and return to its recovery state
    Acknowledge,
}

impl WorkflowEvent {
    /// Short name of the event
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::SourceAcquired(_) => "sourceAcquired",
            WorkflowEvent::DetectRequested => "detectRequested",
            WorkflowEvent::DetectSucceeded { .. } => "detectSucceeded",
            WorkflowEvent::DetectFailed { .. } => "detectFailed",
            WorkflowEvent::SaveRequested => "saveRequested",
            WorkflowEvent::SaveSucceeded { .. } => "saveSucceeded",
            WorkflowEvent::SaveFailed { .. } => "saveFailed",
            WorkflowEvent::Reset => "reset",
            WorkflowEvent::Acknowledge => "acknowledge",
        }
    }
}

/// Computes the next state, or `None` when the event is not valid in `state`.
///
/// `next_ticket` is consumed only by `DetectRequested` and `SaveRequested`.
pub fn transition(
    state: &WorkflowState,
    event: WorkflowEvent,
    next_ticket: RequestTicket,
) -> Option<WorkflowState> {
    use WorkflowEvent as E;
    use WorkflowState as S;

    match (state, event) {
        (_, E::SourceAcquired(source)) => Some(S::SourceSelected { source }),
        (_, E::Reset) => Some(S::Idle),

        (S::SourceSelected { source }, E::DetectRequested) => Some(S::Detecting {
            source: source.clone(),
            ticket: next_ticket,
        }),

        (S::Detecting { source, ticket }, E::DetectSucceeded { ticket: t, result })
            if *ticket == t =>
        {
            Some(S::ResultReady {
                source: source.clone(),
                result,
            })
        }

        (S::Detecting { source, ticket }, E::DetectFailed { ticket: t, message })
            if *ticket == t =>
        {
            Some(S::Error {
                message,
                recovery: Box::new(S::SourceSelected {
                    source: source.clone(),
                }),
            })
        }

        (S::ResultReady { source, result }, E::SaveRequested) => Some(S::Saving {
            source: source.clone(),
            result: result.clone(),
            ticket: next_ticket,
        }),

        (
            S::Saving {
                source,
                result,
                ticket,
            },
            E::SaveSucceeded { ticket: t },
        ) if *ticket == t => Some(S::ResultReady {
            source: source.clone(),
            result: result.clone(),
        }),

        (
            S::Saving {
                source,
                result,
                ticket,
            },
            E::SaveFailed { ticket: t, message },
        ) if *ticket == t => Some(S::Error {
            message,
            recovery: Box::new(S::ResultReady {
                source: source.clone(),
                result: result.clone(),
            }),
        }),

        (S::Error { recovery, .. }, E::Acknowledge) => Some((**recovery).clone()),

        _ => None,
    }
}

// =============================================================================
// Store
// =============================================================================

/// Outcome of a dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The event moved the store to a new state
    Applied,
    /// The event was not valid for the current state and was dropped
    Ignored,
}

impl Dispatch {
    /// Whether the event was applied
    pub fn is_applied(self) -> bool {
        matches!(self, Dispatch::Applied)
    }
}

/// Owner of one workflow instance's state
#[derive(Debug)]
pub struct WorkflowStore {
    /// Media kind of this workflow instance
    kind: MediaKind,
    /// Current state
    state: WorkflowState,
    /// Ticket handed to the next detection/save phase
    next_ticket: RequestTicket,
    /// Snapshot publisher for observers
    publisher: watch::Sender<WorkflowState>,
}

impl WorkflowStore {
    /// Creates a store in `Idle`
    pub fn new(kind: MediaKind) -> Self {
        let (publisher, _) = watch::channel(WorkflowState::Idle);
        Self {
            kind,
            state: WorkflowState::Idle,
            next_ticket: 1,
            publisher,
        }
    }

    /// Media kind of this workflow instance
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Read-only view of the current state
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Owned snapshot of the current state
    pub fn snapshot(&self) -> WorkflowState {
        self.state.clone()
    }

    /// Subscribes to state changes; the receiver starts at the current state
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.publisher.subscribe()
    }

    /// Applies an event. Events are applied strictly in call order.
    pub fn dispatch(&mut self, event: WorkflowEvent) -> Dispatch {
        let event_name = event.name();
        let consumes_ticket = matches!(
            event,
            WorkflowEvent::DetectRequested | WorkflowEvent::SaveRequested
        );

        let Some(next) = transition(&self.state, event, self.next_ticket) else {
            debug!(
                "[{}] ignored {} in state {}",
                self.kind,
                event_name,
                self.state.name()
            );
            return Dispatch::Ignored;
        };

        if consumes_ticket {
            self.next_ticket += 1;
        }

        debug!(
            "[{}] {} -> {} on {}",
            self.kind,
            self.state.name(),
            next.name(),
            event_name
        );

        self.state = next;
        self.publisher.send_replace(self.state.clone());
        Dispatch::Applied
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn photo() -> MediaReference {
        MediaReference::image("/photos/a.jpg")
    }

    fn result() -> DetectionResult {
        DetectionResult::new(7, "http://x/o.jpg")
    }

    fn store_at_result_ready() -> WorkflowStore {
        let mut store = WorkflowStore::new(MediaKind::Image);
        store.dispatch(WorkflowEvent::SourceAcquired(photo()));
        store.dispatch(WorkflowEvent::DetectRequested);
        let ticket = store.state().ticket().unwrap();
        store.dispatch(WorkflowEvent::DetectSucceeded {
            ticket,
            result: result(),
        });
        store
    }

    #[test]
    fn test_happy_path() {
        let mut store = WorkflowStore::new(MediaKind::Image);
        assert_eq!(store.state(), &WorkflowState::Idle);

        assert!(store
            .dispatch(WorkflowEvent::SourceAcquired(photo()))
            .is_applied());
        assert!(store.dispatch(WorkflowEvent::DetectRequested).is_applied());
        let ticket = store.state().ticket().unwrap();

        store.dispatch(WorkflowEvent::DetectSucceeded {
            ticket,
            result: result(),
        });
        assert_eq!(
            store.state(),
            &WorkflowState::ResultReady {
                source: photo(),
                result: result()
            }
        );

        store.dispatch(WorkflowEvent::SaveRequested);
        let save_ticket = store.state().ticket().unwrap();
        assert!(save_ticket > ticket);

        store.dispatch(WorkflowEvent::SaveSucceeded {
            ticket: save_ticket,
        });
        assert_eq!(store.state().name(), "resultReady");
        assert_eq!(store.state().result(), Some(&result()));
    }

    #[test]
    fn test_detect_failure_recovers_to_source_selected() {
        let mut store = WorkflowStore::new(MediaKind::Image);
        store.dispatch(WorkflowEvent::SourceAcquired(photo()));
        store.dispatch(WorkflowEvent::DetectRequested);
        let ticket = store.state().ticket().unwrap();

        store.dispatch(WorkflowEvent::DetectFailed {
            ticket,
            message: "Network error: down".to_string(),
        });
        assert_eq!(
            store.state(),
            &WorkflowState::Error {
                message: "Network error: down".to_string(),
                recovery: Box::new(WorkflowState::SourceSelected { source: photo() }),
            }
        );

        store.dispatch(WorkflowEvent::Acknowledge);
        assert_eq!(
            store.state(),
            &WorkflowState::SourceSelected { source: photo() }
        );
    }

    #[test]
    fn test_save_failure_recovers_to_result_ready() {
        let mut store = store_at_result_ready();
        store.dispatch(WorkflowEvent::SaveRequested);
        let ticket = store.state().ticket().unwrap();

        store.dispatch(WorkflowEvent::SaveFailed {
            ticket,
            message: "Storage error: disk full".to_string(),
        });
        assert_eq!(store.state().name(), "error");
        assert_eq!(store.state().result(), Some(&result()));

        store.dispatch(WorkflowEvent::Acknowledge);
        assert_eq!(
            store.state(),
            &WorkflowState::ResultReady {
                source: photo(),
                result: result()
            }
        );
    }

    #[test]
    fn test_second_detect_request_is_ignored() {
        let mut store = WorkflowStore::new(MediaKind::Image);
        store.dispatch(WorkflowEvent::SourceAcquired(photo()));
        assert!(store.dispatch(WorkflowEvent::DetectRequested).is_applied());
        let before = store.snapshot();

        assert_eq!(
            store.dispatch(WorkflowEvent::DetectRequested),
            Dispatch::Ignored
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_second_save_request_is_ignored() {
        let mut store = store_at_result_ready();
        store.dispatch(WorkflowEvent::SaveRequested);
        let before = store.snapshot();

        assert_eq!(store.dispatch(WorkflowEvent::SaveRequested), Dispatch::Ignored);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_new_source_discards_result() {
        let mut store = store_at_result_ready();
        let other = MediaReference::image("/photos/b.jpg");

        store.dispatch(WorkflowEvent::SourceAcquired(other.clone()));
        assert_eq!(
            store.state(),
            &WorkflowState::SourceSelected { source: other }
        );
        assert!(store.state().result().is_none());
    }

    #[test]
    fn test_new_source_from_error_discards_result() {
        let mut store = store_at_result_ready();
        store.dispatch(WorkflowEvent::SaveRequested);
        let ticket = store.state().ticket().unwrap();
        store.dispatch(WorkflowEvent::SaveFailed {
            ticket,
            message: "boom".to_string(),
        });

        let other = MediaReference::image("/photos/c.png");
        store.dispatch(WorkflowEvent::SourceAcquired(other.clone()));
        assert_eq!(
            store.state(),
            &WorkflowState::SourceSelected { source: other }
        );
    }

    #[test]
    fn test_stale_detection_is_discarded() {
        let mut store = WorkflowStore::new(MediaKind::Image);
        store.dispatch(WorkflowEvent::SourceAcquired(photo()));
        store.dispatch(WorkflowEvent::DetectRequested);
        let stale = store.state().ticket().unwrap();

        // User re-selects and starts again while the first request is outstanding.
        let other = MediaReference::image("/photos/b.jpg");
        store.dispatch(WorkflowEvent::SourceAcquired(other.clone()));
        store.dispatch(WorkflowEvent::DetectRequested);

        let outcome = store.dispatch(WorkflowEvent::DetectSucceeded {
            ticket: stale,
            result: result(),
        });
        assert_eq!(outcome, Dispatch::Ignored);
        assert_eq!(store.state().source(), Some(&other));
        assert_eq!(store.state().name(), "detecting");
    }

    #[test]
    fn test_reset_from_every_state() {
        let mut store = store_at_result_ready();
        store.dispatch(WorkflowEvent::SaveRequested);
        store.dispatch(WorkflowEvent::Reset);
        assert_eq!(store.state(), &WorkflowState::Idle);
        assert!(store.state().source().is_none());
        assert!(store.state().result().is_none());

        // Idle -> Idle is still a valid reset.
        assert!(store.dispatch(WorkflowEvent::Reset).is_applied());
    }

    #[test]
    fn test_subscribers_observe_transitions() {
        let mut store = WorkflowStore::new(MediaKind::Video);
        let mut rx = store.subscribe();
        assert_eq!(*rx.borrow(), WorkflowState::Idle);

        store.dispatch(WorkflowEvent::SourceAcquired(MediaReference::video("/v.mp4")));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().name(), "sourceSelected");

        // Ignored events publish nothing.
        store.dispatch(WorkflowEvent::Acknowledge);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_state_serialization() {
        let state = WorkflowState::Detecting {
            source: photo(),
            ticket: 3,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "detecting");
        assert_eq!(json["ticket"], 3);
        assert_eq!(json["source"]["kind"], "image");
    }
}
