//! Source Acquirer
//!
//! Obtains a local media reference from camera capture or library selection.
//! Dismissing a picker is not an error: it yields [`Acquisition::Cancelled`]
//! and the workflow state stays as it was.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::fs::validate_local_source_path;
use crate::{CoreError, CoreResult, MediaKind, MediaReference};

/// Outcome of a picker or capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// The user supplied media
    Selected(MediaReference),
    /// The user dismissed the picker
    Cancelled,
}

/// Trait for media sources
#[async_trait]
pub trait SourceAcquirer: Send + Sync {
    /// Captures a new photo or video with the camera
    async fn capture_from_camera(&self, kind: MediaKind) -> CoreResult<Acquisition>;

    /// Lets the user pick existing media from the library
    async fn pick_from_library(&self, kind: MediaKind) -> CoreResult<Acquisition>;
}

/// Checks that a path exists and carries an extension accepted for `kind`.
pub fn validate_source(path: &str, kind: MediaKind) -> CoreResult<MediaReference> {
    let resolved =
        validate_local_source_path(path, "source").map_err(|reason| CoreError::UnsupportedMedia {
            kind,
            reason,
        })?;

    if MediaKind::from_path(&resolved) != Some(kind) {
        let ext = resolved
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        return Err(CoreError::UnsupportedMedia {
            kind,
            reason: format!(
                "extension '{}' is not one of {}",
                ext,
                kind.accepted_extensions().join(", ")
            ),
        });
    }

    Ok(MediaReference::new(resolved.to_string_lossy(), kind))
}

// ============================================================================
// Local Source
// ============================================================================

/// Desktop rendition of the device pickers.
///
/// - Library picks consume a selection handed over by the presentation layer.
/// - Camera captures take the newest media file of the requested kind from
///   the camera roll drop folder.
#[derive(Debug, Default)]
pub struct LocalSourceAcquirer {
    capture_dir: Option<PathBuf>,
    pending: Mutex<Option<String>>,
}

impl LocalSourceAcquirer {
    /// Creates a new local source
    pub fn new(capture_dir: Option<PathBuf>) -> Self {
        Self {
            capture_dir,
            pending: Mutex::new(None),
        }
    }

    /// Hands a path to the next library pick
    pub async fn select(&self, path: impl Into<String>) {
        *self.pending.lock().await = Some(path.into());
    }

    /// Clears a pending selection
    pub async fn clear_selection(&self) {
        self.pending.lock().await.take();
    }

    /// Newest file of `kind` directly inside `dir`
    fn newest_capture(dir: &Path, kind: MediaKind) -> Option<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| MediaKind::from_path(entry.path()) == Some(kind))
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.into_path())
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, path)| path)
    }
}

#[async_trait]
impl SourceAcquirer for LocalSourceAcquirer {
    async fn capture_from_camera(&self, kind: MediaKind) -> CoreResult<Acquisition> {
        let Some(dir) = self.capture_dir.clone() else {
            debug!("No capture directory configured, treating capture as dismissed");
            return Ok(Acquisition::Cancelled);
        };

        let newest = tokio::task::spawn_blocking(move || Self::newest_capture(&dir, kind))
            .await
            .map_err(|e| CoreError::Internal(format!("Capture scan failed: {}", e)))?;

        match newest {
            Some(path) => {
                let reference = validate_source(&path.to_string_lossy(), kind)?;
                info!("Captured {} from camera roll: {}", kind, reference.locator);
                Ok(Acquisition::Selected(reference))
            }
            None => {
                debug!("No {} found in capture directory", kind);
                Ok(Acquisition::Cancelled)
            }
        }
    }

    async fn pick_from_library(&self, kind: MediaKind) -> CoreResult<Acquisition> {
        let Some(path) = self.pending.lock().await.take() else {
            return Ok(Acquisition::Cancelled);
        };

        let reference = validate_source(&path, kind)?;
        info!("Picked {} from library: {}", kind, reference.locator);
        Ok(Acquisition::Selected(reference))
    }
}
