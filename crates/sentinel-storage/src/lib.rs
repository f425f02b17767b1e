//! # RCA-Sentinel Storage
//!
//! Persistence layer for RCA-Sentinel.
//!
//! This crate provides:
//! - Trained-model and causal-structure artifacts keyed by dataset tag
//! - Diagnostic DOT renderings of learned graphs
//! - Resumable replay result records
//! - Incident reporting transports

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod artifacts;
pub mod reporter;
pub mod results;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::artifacts::ArtifactStore;
    pub use crate::reporter::{IncidentReporter, JsonLinesReporter, NoopReporter};
    pub use crate::results::ResultStore;
}
