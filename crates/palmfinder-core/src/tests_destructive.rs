//! Destructive and Edge Case Tests
//!
//! Drives the state machine with every (state, event) pair, including late
//! completions with stale tickets, and feeds hostile inputs to the parsers
//! and path helpers.

use crate::settings::AppSettings;
use crate::store::{transition, Dispatch, WorkflowEvent, WorkflowState, WorkflowStore};
use crate::{DetectionResult, MediaKind, MediaReference};

const LIVE: u64 = 5;
const STALE: u64 = 4;
const NEXT: u64 = 6;

fn source() -> MediaReference {
    MediaReference::image("/photos/grove.jpg")
}

fn result() -> DetectionResult {
    DetectionResult::new(7, "http://x/o.jpg")
}

fn all_states() -> Vec<WorkflowState> {
    vec![
        WorkflowState::Idle,
        WorkflowState::SourceSelected { source: source() },
        WorkflowState::Detecting {
            source: source(),
            ticket: LIVE,
        },
        WorkflowState::ResultReady {
            source: source(),
            result: result(),
        },
        WorkflowState::Saving {
            source: source(),
            result: result(),
            ticket: LIVE,
        },
        WorkflowState::Error {
            message: "detect failed".to_string(),
            recovery: Box::new(WorkflowState::SourceSelected { source: source() }),
        },
        WorkflowState::Error {
            message: "save failed".to_string(),
            recovery: Box::new(WorkflowState::ResultReady {
                source: source(),
                result: result(),
            }),
        },
    ]
}

fn all_events() -> Vec<WorkflowEvent> {
    let mut events = vec![
        WorkflowEvent::SourceAcquired(MediaReference::image("/photos/other.png")),
        WorkflowEvent::DetectRequested,
        WorkflowEvent::SaveRequested,
        WorkflowEvent::Reset,
        WorkflowEvent::Acknowledge,
    ];
    for ticket in [LIVE, STALE] {
        events.push(WorkflowEvent::DetectSucceeded {
            ticket,
            result: result(),
        });
        events.push(WorkflowEvent::DetectFailed {
            ticket,
            message: "boom".to_string(),
        });
        events.push(WorkflowEvent::SaveSucceeded { ticket });
        events.push(WorkflowEvent::SaveFailed {
            ticket,
            message: "boom".to_string(),
        });
    }
    events
}

/// Whether the pair appears in the transition table
fn in_table(state: &WorkflowState, event: &WorkflowEvent) -> bool {
    use WorkflowEvent as E;
    use WorkflowState as S;

    match (state, event) {
        (_, E::SourceAcquired(_)) | (_, E::Reset) => true,
        (S::SourceSelected { .. }, E::DetectRequested) => true,
        (S::Detecting { ticket, .. }, E::DetectSucceeded { ticket: t, .. })
        | (S::Detecting { ticket, .. }, E::DetectFailed { ticket: t, .. }) => ticket == t,
        (S::ResultReady { .. }, E::SaveRequested) => true,
        (S::Saving { ticket, .. }, E::SaveSucceeded { ticket: t })
        | (S::Saving { ticket, .. }, E::SaveFailed { ticket: t, .. }) => ticket == t,
        (S::Error { .. }, E::Acknowledge) => true,
        _ => false,
    }
}

#[test]
fn test_destructive_transition_totality() {
    let mut applied = 0;
    let mut ignored = 0;

    for state in all_states() {
        for event in all_events() {
            let expected = in_table(&state, &event);
            let next = transition(&state, event.clone(), NEXT);
            assert_eq!(
                next.is_some(),
                expected,
                "{} on {}: expected applied={}",
                event.name(),
                state.name(),
                expected
            );
            if expected {
                applied += 1;
            } else {
                ignored += 1;
            }
        }
    }

    // 7 states x 13 events
    assert_eq!(applied + ignored, 91);
    assert!(ignored > applied);
}

#[test]
fn test_destructive_ignored_events_leave_store_untouched() {
    for state in all_states() {
        for event in all_events() {
            if in_table(&state, &event) {
                continue;
            }

            let mut store = WorkflowStore::new(MediaKind::Image);
            drive_to(&mut store, &state);
            let before = store.snapshot();
            let rx = store.subscribe();

            assert_eq!(store.dispatch(event.clone()), Dispatch::Ignored);
            assert_eq!(store.snapshot(), before);
            assert!(
                !rx.has_changed().unwrap(),
                "{} on {} published a snapshot",
                event.name(),
                before.name()
            );
        }
    }
}

#[test]
fn test_destructive_reset_from_any_state() {
    for state in all_states() {
        let next = transition(&state, WorkflowEvent::Reset, NEXT).unwrap();
        assert_eq!(next, WorkflowState::Idle);
        assert!(next.source().is_none());
        assert!(next.result().is_none());
    }
}

#[test]
fn test_destructive_new_source_from_any_state() {
    let other = MediaReference::image("/photos/other.png");
    for state in all_states() {
        let next = transition(&state, WorkflowEvent::SourceAcquired(other.clone()), NEXT).unwrap();
        assert_eq!(
            next,
            WorkflowState::SourceSelected {
                source: other.clone()
            }
        );
        assert!(next.result().is_none());
    }
}

#[test]
fn test_destructive_requests_take_fresh_tickets() {
    let detecting = transition(
        &WorkflowState::SourceSelected { source: source() },
        WorkflowEvent::DetectRequested,
        NEXT,
    )
    .unwrap();
    assert_eq!(detecting.ticket(), Some(NEXT));

    let saving = transition(
        &WorkflowState::ResultReady {
            source: source(),
            result: result(),
        },
        WorkflowEvent::SaveRequested,
        NEXT,
    )
    .unwrap();
    assert_eq!(saving.ticket(), Some(NEXT));
}

#[test]
fn test_destructive_tickets_never_repeat() {
    let mut store = WorkflowStore::new(MediaKind::Video);
    let mut seen = Vec::new();

    for _ in 0..5 {
        store.dispatch(WorkflowEvent::SourceAcquired(MediaReference::video("/v.mp4")));
        store.dispatch(WorkflowEvent::DetectRequested);
        let ticket = store.state().ticket().unwrap();
        assert!(!seen.contains(&ticket));
        seen.push(ticket);
        store.dispatch(WorkflowEvent::Reset);
    }
}

#[test]
fn test_destructive_settings_garbage() {
    let mut settings: AppSettings = serde_json::from_str(
        r#"{
            "version": 1,
            "service": {"baseUrl": "  ftp://nope/  ", "timeoutSec": 0, "maxUploadMb": 999999},
            "storage": {"albumName": "../../etc", "maxDownloadMb": 0, "scratchDir": "   "},
            "unknownSection": {"x": 1}
        }"#,
    )
    .unwrap();
    settings.normalize();

    assert_eq!(settings.service.base_url, crate::settings::DEFAULT_BASE_URL);
    assert!(settings.service.timeout_sec >= 5);
    assert!(settings.service.max_upload_mb <= 1024);
    assert_eq!(settings.storage.album_name, "PalmFinder");
    assert!(settings.storage.max_download_mb >= 1);
    assert!(settings.storage.scratch_dir.is_none());
}

#[test]
fn test_destructive_source_paths() {
    use crate::source::validate_source;

    assert!(validate_source("", MediaKind::Image).is_err());
    assert!(validate_source("   ", MediaKind::Image).is_err());
    assert!(validate_source("http://x/a.jpg", MediaKind::Image).is_err());
    assert!(validate_source("/", MediaKind::Image).is_err());
    assert!(validate_source("/does/not/exist.png", MediaKind::Image).is_err());
}

/// Puts a fresh store into `target` through public events only
fn drive_to(store: &mut WorkflowStore, target: &WorkflowState) {
    fn go(store: &mut WorkflowStore, target: &WorkflowState) {
        match target {
            WorkflowState::Idle => {}
            WorkflowState::SourceSelected { source } => {
                store.dispatch(WorkflowEvent::SourceAcquired(source.clone()));
            }
            WorkflowState::Detecting { source, .. } => {
                go(store, &WorkflowState::SourceSelected {
                    source: source.clone(),
                });
                store.dispatch(WorkflowEvent::DetectRequested);
            }
            WorkflowState::ResultReady { source, result } => {
                go(store, &WorkflowState::Detecting {
                    source: source.clone(),
                    ticket: 0,
                });
                let ticket = store.state().ticket().unwrap_or_default();
                store.dispatch(WorkflowEvent::DetectSucceeded {
                    ticket,
                    result: result.clone(),
                });
            }
            WorkflowState::Saving { source, result, .. } => {
                go(store, &WorkflowState::ResultReady {
                    source: source.clone(),
                    result: result.clone(),
                });
                store.dispatch(WorkflowEvent::SaveRequested);
            }
            WorkflowState::Error { message, recovery } => match recovery.as_ref() {
                WorkflowState::SourceSelected { source } => {
                    go(store, &WorkflowState::Detecting {
                        source: source.clone(),
                        ticket: 0,
                    });
                    let ticket = store.state().ticket().unwrap_or_default();
                    store.dispatch(WorkflowEvent::DetectFailed {
                        ticket,
                        message: message.clone(),
                    });
                }
                WorkflowState::ResultReady { source, result } => {
                    go(store, &WorkflowState::Saving {
                        source: source.clone(),
                        result: result.clone(),
                        ticket: 0,
                    });
                    let ticket = store.state().ticket().unwrap_or_default();
                    store.dispatch(WorkflowEvent::SaveFailed {
                        ticket,
                        message: message.clone(),
                    });
                }
                other => panic!("unreachable recovery {:?}", other),
            },
        }
    }

    go(store, target);
    assert_eq!(store.state().name(), target.name());
}
