//! Permission Gate
//!
//! Requests and checks device capabilities before the operations that need them.
//! A denial is a normal outcome, never an error: callers abort the operation
//! with a user-visible notice and leave the workflow state untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::settings::PermissionSettings;

/// Device capability guarded by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Camera capture
    Camera,
    /// Reading from the media library (picker)
    LibraryRead,
    /// Writing into the media library
    LibraryWrite,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Camera => write!(f, "Camera"),
            Capability::LibraryRead => write!(f, "Media Library (read)"),
            Capability::LibraryWrite => write!(f, "Media Library (write)"),
        }
    }
}

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    /// Capability may be used
    Granted,
    /// Capability was refused
    Denied,
}

impl PermissionStatus {
    /// Whether the capability was granted
    pub fn is_granted(self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

/// Trait for capability gates
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Requests a capability, prompting if the platform requires it.
    async fn request(&self, capability: Capability) -> PermissionStatus;
}

// ============================================================================
// Policy Gate
// ============================================================================

/// Gate whose answers come from configured grants.
///
/// Grants can be changed at runtime (`grant`/`revoke`), which models the user
/// flipping a switch in the platform settings between attempts.
#[derive(Debug)]
pub struct PolicyPermissionGate {
    grants: RwLock<HashMap<Capability, bool>>,
    requests: AtomicUsize,
}

impl PolicyPermissionGate {
    /// Creates a gate that grants every capability
    pub fn allow_all() -> Self {
        Self::from_settings(&PermissionSettings::default())
    }

    /// Creates a gate from persisted permission settings
    pub fn from_settings(settings: &PermissionSettings) -> Self {
        let grants = HashMap::from([
            (Capability::Camera, settings.camera),
            (Capability::LibraryRead, settings.library_read),
            (Capability::LibraryWrite, settings.library_write),
        ]);

        Self {
            grants: RwLock::new(grants),
            requests: AtomicUsize::new(0),
        }
    }

    /// Builder: denies a capability
    pub fn with_denied(mut self, capability: Capability) -> Self {
        self.grants.get_mut().insert(capability, false);
        self
    }

    /// Grants a capability
    pub async fn grant(&self, capability: Capability) {
        self.grants.write().await.insert(capability, true);
    }

    /// Revokes a capability
    pub async fn revoke(&self, capability: Capability) {
        self.grants.write().await.insert(capability, false);
    }

    /// Number of requests answered so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Default for PolicyPermissionGate {
    fn default() -> Self {
        Self::allow_all()
    }
}

#[async_trait]
impl PermissionGate for PolicyPermissionGate {
    async fn request(&self, capability: Capability) -> PermissionStatus {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let granted = self
            .grants
            .read()
            .await
            .get(&capability)
            .copied()
            .unwrap_or(false);

        debug!("Permission request for {}: granted={}", capability, granted);

        if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }
}
