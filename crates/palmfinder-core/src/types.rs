//! Palm Finder Core Type Definitions
//!
//! Defines the media handles and results shared by every workflow module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// ID Types
// =============================================================================

/// Identifier issued by the store for each detection or save phase.
///
/// Monotonically increasing within one workflow instance.
pub type RequestTicket = u64;

// =============================================================================
// Media Kind
// =============================================================================

/// Kind of media a workflow instance operates on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still photo
    Image,
    /// Video clip
    Video,
}

impl MediaKind {
    /// Multipart field name expected by the detection endpoint
    pub fn field_name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Filename announced in the multipart part
    pub fn upload_file_name(self) -> &'static str {
        match self {
            MediaKind::Image => "image.jpg",
            MediaKind::Video => "video.mp4",
        }
    }

    /// Content type of the uploaded bytes
    pub fn content_type(self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }

    /// Path of the detection endpoint, relative to the service base URL
    pub fn endpoint_path(self) -> &'static str {
        match self {
            MediaKind::Image => "/detect/image",
            MediaKind::Video => "/detect/video",
        }
    }

    /// Local file extensions accepted for this kind (lowercase)
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["jpg", "jpeg", "png"],
            MediaKind::Video => &["mp4", "avi"],
        }
    }

    /// Whether the service may answer with a bare `output_path`
    pub fn allows_output_path(self) -> bool {
        matches!(self, MediaKind::Video)
    }

    /// Prefix of saved scratch files
    pub fn scratch_prefix(self) -> &'static str {
        match self {
            MediaKind::Image => "palm",
            MediaKind::Video => "processed_palm",
        }
    }

    /// Extension of saved scratch files
    pub fn scratch_extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }

    /// Classifies a path by its extension.
    ///
    /// Returns `None` when the extension is not accepted for either kind.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        [MediaKind::Image, MediaKind::Video]
            .into_iter()
            .find(|kind| kind.accepted_extensions().contains(&ext.as_str()))
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "photo" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("Unknown media kind '{}'", other)),
        }
    }
}

// =============================================================================
// Media Reference
// =============================================================================

/// Handle to a local image or video picked by the user.
///
/// Replaced wholesale when a new source is picked; never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    /// Local locator (filesystem path)
    pub locator: String,
    /// Media kind tag
    pub kind: MediaKind,
}

impl MediaReference {
    /// Creates a new media reference
    pub fn new(locator: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            locator: locator.into(),
            kind,
        }
    }

    /// Creates an image reference
    pub fn image(locator: impl Into<String>) -> Self {
        Self::new(locator, MediaKind::Image)
    }

    /// Creates a video reference
    pub fn video(locator: impl Into<String>) -> Self {
        Self::new(locator, MediaKind::Video)
    }

    /// Locator as a filesystem path
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.locator)
    }
}

// =============================================================================
// Detection Result
// =============================================================================

/// Normalized result of a successful detection request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Number of detected objects
    pub count: u64,
    /// Locator of the processed (annotated) output
    pub output_locator: String,
}

impl DetectionResult {
    /// Creates a new detection result
    pub fn new(count: u64, output_locator: impl Into<String>) -> Self {
        Self {
            count,
            output_locator: output_locator.into(),
        }
    }
}
