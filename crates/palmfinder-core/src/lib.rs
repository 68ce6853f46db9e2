//! Palm Finder Core Library
//!
//! Media detection workflow for the Palm Finder client.
//! A user supplies a photo or video, it is submitted to the remote detection
//! service, and the annotated result (processed media plus a detected-object
//! count) can be saved to the device media library.
//!
//! ## Layout
//!
//! - [`permission`]: capability gate (camera, library read/write)
//! - [`source`]: camera capture and library selection
//! - [`detection`]: HTTP protocol client for the detection service
//! - [`store`]: workflow state machine, the single source of truth
//! - [`gallery`]: download + commit of processed media
//! - [`workflow`]: orchestration of the above for one media kind
//!
//! Presentation layers observe [`store::WorkflowState`] snapshots and
//! [`workflow::Notice`]s; they never mutate state directly.

pub mod detection;
pub mod fs;
pub mod gallery;
pub mod logging;
pub mod permission;
pub mod settings;
pub mod source;
pub mod store;
pub mod workflow;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_destructive;
