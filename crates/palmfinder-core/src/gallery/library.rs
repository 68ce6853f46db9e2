//! Device media library backends

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::fs::{atomic_copy, unique_path};
use crate::settings::StorageSettings;
use crate::{CoreError, CoreResult, MediaKind};

/// Trait for the persistent media library the user browses
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Commits a finished scratch file and returns its library path.
    ///
    /// The scratch file is left in place; the caller owns its cleanup.
    async fn commit(&self, scratch: &Path, kind: MediaKind) -> CoreResult<PathBuf>;
}

/// Media library backed by album directories on disk.
///
/// Photos land in `<pictures>/<album>` and videos in `<videos>/<album>`.
/// Existing entries are never overwritten.
#[derive(Debug, Clone)]
pub struct DirectoryMediaLibrary {
    image_root: PathBuf,
    video_root: PathBuf,
}

impl DirectoryMediaLibrary {
    /// Creates a library with explicit album directories
    pub fn new(image_root: impl Into<PathBuf>, video_root: impl Into<PathBuf>) -> Self {
        Self {
            image_root: image_root.into(),
            video_root: video_root.into(),
        }
    }

    /// Creates a library from storage settings
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(
            settings.library_root(MediaKind::Image),
            settings.library_root(MediaKind::Video),
        )
    }

    /// Album directory for a media kind
    pub fn root(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Image => &self.image_root,
            MediaKind::Video => &self.video_root,
        }
    }
}

#[async_trait]
impl MediaLibrary for DirectoryMediaLibrary {
    async fn commit(&self, scratch: &Path, kind: MediaKind) -> CoreResult<PathBuf> {
        let file_name = scratch
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                CoreError::StorageError(format!("Invalid scratch file: {}", scratch.display()))
            })?;

        let root = self.root(kind);
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            CoreError::StorageError(format!(
                "Failed to create album directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let dest = unique_path(root, &file_name);
        atomic_copy(scratch, &dest).await.map_err(|e| {
            CoreError::StorageError(format!("Failed to add {} to library: {}", file_name, e))
        })?;

        info!("Committed {} to library: {}", kind, dest.display());
        Ok(dest)
    }
}
