//! Detection Client
//!
//! Submits acquired media to the remote detection service and normalizes its
//! response. The service is an opaque black box reachable only through its
//! HTTP contract:
//!
//! - `GET /health`
//! - `POST /detect/image` (multipart part `image`)
//! - `POST /detect/video` (multipart part `video`)

mod http;

pub use http::HttpDetectionClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

use crate::{CoreError, CoreResult, DetectionResult, MediaReference};

/// Reachability report from `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    /// Service status line, when reported
    pub status: Option<String>,
    /// Deployment environment, when reported
    pub environment: Option<String>,
}

/// Trait for detection service clients
#[async_trait]
pub trait DetectionClient: Send + Sync {
    /// Submits the referenced media and returns the normalized result.
    ///
    /// Fails with [`CoreError::NetworkError`] when the service is unreachable
    /// or answers with a non-success status, and with
    /// [`CoreError::ProtocolError`] when a success body lacks required fields.
    async fn detect(&self, source: &MediaReference) -> CoreResult<DetectionResult>;

    /// Checks that the service is reachable
    async fn check_health(&self) -> CoreResult<ServiceHealth>;
}

// ============================================================================
// Mock Client for Testing
// ============================================================================

/// Scripted reply of the mock client
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Successful detection
    Success(DetectionResult),
    /// Transport or status failure
    NetworkFailure(String),
    /// Malformed success body
    ProtocolFailure(String),
}

/// Mock client returning scripted replies
#[derive(Debug)]
pub struct MockDetectionClient {
    reply: Mutex<MockReply>,
    healthy: bool,
    calls: AtomicUsize,
    hold: Option<Arc<Notify>>,
}

impl MockDetectionClient {
    /// Creates a mock that always succeeds with `result`
    pub fn new(result: DetectionResult) -> Self {
        Self::with_reply(MockReply::Success(result))
    }

    /// Creates a mock with an explicit reply
    pub fn with_reply(reply: MockReply) -> Self {
        Self {
            reply: Mutex::new(reply),
            healthy: true,
            calls: AtomicUsize::new(0),
            hold: None,
        }
    }

    /// Sets health check availability
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Holds every detection until `release` is notified
    pub fn with_hold(mut self, release: Arc<Notify>) -> Self {
        self.hold = Some(release);
        self
    }

    /// Replaces the scripted reply for subsequent calls
    pub fn set_reply(&self, reply: MockReply) {
        *self.reply.lock().unwrap_or_else(PoisonError::into_inner) = reply;
    }

    /// Number of detection requests issued
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionClient for MockDetectionClient {
    async fn detect(&self, _source: &MediaReference) -> CoreResult<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(release) = &self.hold {
            release.notified().await;
        }

        let reply = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match reply {
            MockReply::Success(result) => Ok(result),
            MockReply::NetworkFailure(msg) => Err(CoreError::NetworkError(msg)),
            MockReply::ProtocolFailure(msg) => Err(CoreError::ProtocolError(msg)),
        }
    }

    async fn check_health(&self) -> CoreResult<ServiceHealth> {
        if self.healthy {
            Ok(ServiceHealth {
                status: Some("Backend running".to_string()),
                environment: Some("test".to_string()),
            })
        } else {
            Err(CoreError::NetworkError("Backend not reachable".to_string()))
        }
    }
}
