//! Palm Finder Error Definitions
//!
//! Defines error types used throughout the workflow.

use thiserror::Error;

use super::MediaKind;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Capability Errors
    // =========================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cancelled by user")]
    UserCancelled,

    // =========================================================================
    // Source Errors
    // =========================================================================
    #[error("Unsupported {kind} source: {reason}")]
    UnsupportedMedia { kind: MediaKind, reason: String },

    #[error("Upload too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    // =========================================================================
    // Detection Service Errors
    // =========================================================================
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Settings error: {0}")]
    Settings(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;
