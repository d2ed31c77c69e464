//! Pipeline Error Taxonomy
//!
//! ## Design
//!
//! Every crate in the workspace owns its own `thiserror` enum describing the
//! failures it can produce (`SchemaError`, `ConnectorError`, `MLError`,
//! `JobError`). Each of those converts into [`PipelineError`], the shared
//! taxonomy the orchestration job reasons about. The job never inspects a
//! crate-local error directly; it asks [`PipelineError::kind`] and decides
//! whether to continue.
//!
//! ## Error Kinds
//!
//! ### Per-item failures (the run continues)
//! - `SourceUnavailable`: an origin timed out, refused, or returned garbage
//! - `SchemaViolation`: a reading cannot be expressed in the canonical model
//! - `InsufficientHistory`: a sensor has too few observations to build features
//! - `TrainingFailure`: no candidate model produced a finite CV score
//! - `ArtifactConflict`: a version slot was taken by a concurrent trainer
//!
//! ### Fatal
//! - `StoreUnavailable`: the artifact store root cannot be used at all
//!
//! ```rust
//! use seaguard_core::{ErrorKind, PipelineError};
//!
//! let err = PipelineError::SourceUnavailable {
//!     source_name: "harbor-gauges".into(),
//!     reason: "timed out after 30s".into(),
//! };
//! assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
//! assert!(!err.is_fatal());
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Classification of a [`PipelineError`], used in run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    SchemaViolation,
    InsufficientHistory,
    TrainingFailure,
    ArtifactConflict,
    StoreUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::InsufficientHistory => "insufficient_history",
            ErrorKind::TrainingFailure => "training_failure",
            ErrorKind::ArtifactConflict => "artifact_conflict",
            ErrorKind::StoreUnavailable => "store_unavailable",
        };
        f.write_str(name)
    }
}

/// Shared failure taxonomy across ingestion, training and scoring
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Origin unreachable, slow, or returned something unparseable
    #[error("source '{source_name}' unavailable: {reason}")]
    SourceUnavailable {
        source_name: String,
        reason: String,
    },

    /// Reading rejected by the canonical normalizer
    #[error("schema violation: {reason}")]
    SchemaViolation {
        reason: String,
    },

    /// Not enough observations to build a feature row
    #[error("insufficient history for '{sensor_id}': need {required}, have {available}")]
    InsufficientHistory {
        sensor_id: String,
        /// Minimum number of observations needed
        required: usize,
        /// Number of usable observations found
        available: usize,
    },

    /// Model training produced no usable candidate
    #[error("training failed for target '{target}': {reason}")]
    TrainingFailure {
        target: String,
        reason: String,
    },

    /// A published artifact version already exists
    #[error("artifact conflict for '{target}' version {version}")]
    ArtifactConflict {
        target: String,
        version: u32,
    },

    /// Artifact store root is missing, unwritable, or corrupt
    #[error("artifact store unavailable: {reason}")]
    StoreUnavailable {
        reason: String,
    },
}

impl PipelineError {
    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            PipelineError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            PipelineError::InsufficientHistory { .. } => ErrorKind::InsufficientHistory,
            PipelineError::TrainingFailure { .. } => ErrorKind::TrainingFailure,
            PipelineError::ArtifactConflict { .. } => ErrorKind::ArtifactConflict,
            PipelineError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
        }
    }

    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceUnavailable | ErrorKind::ArtifactConflict
        )
    }
}
