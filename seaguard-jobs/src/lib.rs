//! SeaGuard Orchestration
//!
//! Sequences one pipeline run end to end:
//!
//! ```text
//! fetch (adapters, concurrent) ─► normalize ─► persist canonical rows
//!                                                  │
//!                     score new events ◄───────────┤
//!                     retrain (optional) ◄─────────┤
//!                     forecast per sensor ◄────────┘
//!                                                  │
//!                                        persist scores and forecasts
//! ```
//!
//! A failing source, record or training target is recorded in the
//! [`RunSummary`] and the run carries on. Only an unusable artifact store or
//! storage sink aborts a run.
//!
//! The `seaguard` binary wraps [`Orchestrator::run`] behind a TOML
//! configuration file; see [`config::JobConfig`].

#![deny(unsafe_code)]

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use seaguard_core::{ErrorKind, PipelineError};

pub mod config;
pub mod forecast;
pub mod job;
pub mod logging;
pub mod sinks;

pub use config::{JobConfig, RunSettings};
pub use forecast::{Evaluation, ForecastService};
pub use job::{JobRequest, Orchestrator, RunSummary, SourceOutcome, TrainingOutcome};
pub use logging::{init_logger, LogLevel, LoggerConfig};
pub use sinks::{CanonicalSink, JsonLinesResultSink, JsonLinesSink, MemorySink, ResultSink};

/// Result type for job operations
pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl JobError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        JobError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify the failure in the shared taxonomy
    ///
    /// Storage I/O is treated as an unavailable store, so it aborts a run.
    pub fn into_pipeline(self) -> PipelineError {
        match self {
            JobError::Pipeline(e) => e,
            JobError::Io { .. } | JobError::Task(_) => PipelineError::StoreUnavailable {
                reason: self.to_string(),
            },
            JobError::Config(_) | JobError::Toml(_) | JobError::Json(_) => PipelineError::SchemaViolation {
                reason: self.to_string(),
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            JobError::Pipeline(e) => e.is_fatal(),
            _ => true,
        }
    }
}

/// Serializable record of a failure in the run summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for Failure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
