//! Forecasting and Anomaly Models for Ocean-Sensor Histories
//!
//! ## Overview
//!
//! This crate turns canonical sensor histories into trained, versioned model
//! artifacts and applies them. Two model kinds exist:
//!
//! - **Forecast models** predict the next position, depth or battery
//!   temperature of a sensor from strictly earlier readings.
//! - **Anomaly models** score single events with an isolation forest.
//!
//! ## Training Flow
//!
//! ```text
//! canonical records ──► build_features ──► sample_split ──┬── train segment
//!                        (causal lags)      (forward only) │     ├── grid_search (walk-forward CV, rayon)
//!                                                          │     ├── linear CV
//!                                                          │     └── final fit on whole segment
//!                                                          └── test segment
//!                                                                └── holdout error, permutation importance
//!                                        ModelArtifact ──► ArtifactStore::publish (hard-link, no overwrite)
//! ```
//!
//! ## Causality
//!
//! A feature row for target time `t` only ever reads observations taken
//! before `t`. Every row records the observation times it used in
//! `input_times`, so the invariant is checkable after the fact. Walk-forward
//! folds and the train/test split both advance cut points past timestamp
//! ties, so no training row shares a timestamp with a validation row.
//!
//! ## Scoring
//!
//! Anomaly scores use the isolation-forest normalisation:
//! ```text
//! score(x) = 2^(-E[h(x)] / c(n))
//! ```
//! where `h` is the path length of `x` in one tree and `c(n)` the average
//! path length of an unsuccessful binary-search-tree lookup over `n`
//! samples. Short paths (easy to isolate) score close to 1.
//!
//! ## Determinism
//!
//! Every random choice draws from a `StdRng` seeded from configuration.
//! Training the same data with the same seed yields the same artifact
//! payload, and scoring is a pure function of the artifact and the event.
//!
//! ## Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use seaguard_core::{CanonicalRecord, GeoPoint, Measurement, MeasurementEvent, Product};
//! use seaguard_ml::{train_anomaly_model, AnomalyConfig, AnomalyScorer};
//!
//! let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
//! let records: Vec<CanonicalRecord> = (0..64)
//!     .map(|i| {
//!         let event = MeasurementEvent::located("buoy-7", start + Duration::hours(i), GeoPoint::new(44.0, -68.0));
//!         let temp = 12.0 + (i % 5) as f64 * 0.1;
//!         CanonicalRecord::new(event, vec![Measurement::observed(Product::WaterTemperature, temp)])
//!     })
//!     .collect();
//!
//! let config = AnomalyConfig::default().with_products(vec![Product::WaterTemperature]);
//! let artifact = train_anomaly_model(&records, &config).unwrap();
//! let scorer = AnomalyScorer::new(artifact).unwrap();
//! let score = scorer.score(&records[0]).unwrap();
//! assert!((0.0..=1.0).contains(&score));
//! ```

#![deny(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

use seaguard_core::{ModelTarget, PipelineError, SensorId};

pub mod artifact;
pub mod ensemble;
pub mod features;
pub mod forest;
pub mod linear;
pub mod model;
pub mod node;
pub mod regression_tree;
pub mod scoring;
pub mod search;
pub mod store;
pub mod trainer;
pub mod tree;
pub mod validation;

pub use artifact::{ArtifactHeader, ArtifactModel, FeatureImportance, ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub use ensemble::{ForestParams, RandomForestRegressor};
pub use features::{build_features, prediction_inputs, sample_split, FeatureBuild, FeatureRow, FeatureSpec, FeatureTable};
pub use forest::{ForestConfig, IsolationForest};
pub use linear::LinearRegression;
pub use model::{ForecastModel, ModelFamily, Regressor};
pub use node::{c_factor, Node, NodeType};
pub use regression_tree::{RegressionTree, TreeParams};
pub use scoring::{anomaly_score, train_anomaly_model, AnomalyConfig, AnomalyModel, AnomalyScorer};
pub use search::{grid_search, CandidateScore, ParamGrid, SearchOutcome};
pub use store::ArtifactStore;
pub use trainer::{predict, Trainer, TrainerConfig, TrainingReport};
pub use tree::{IsolationTree, TreeConfig};
pub use validation::{fold_score, Fold, WalkForward};

/// ML error types
#[derive(Error, Debug)]
pub enum MLError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("insufficient history for '{sensor_id}': need {required}, have {available}")]
    InsufficientHistory {
        sensor_id: SensorId,
        required: usize,
        available: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("expected {expected} features, got {found}")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("singular system in linear fit")]
    Singular,

    #[error("no valid candidate: {0}")]
    NoValidCandidate(String),

    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("artifact checksum mismatch: header {expected}, payload {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("artifact '{target}' version {version} already published")]
    Conflict { target: ModelTarget, version: u32 },

    #[error("artifact store unavailable at {}: {reason}", path.display())]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("no artifact for '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Result type for ML operations
pub type MLResult<T> = Result<T, MLError>;

impl MLError {
    /// Attribute the failure to a target for the run summary
    pub fn into_pipeline(self, target: ModelTarget) -> PipelineError {
        match self {
            MLError::InsufficientHistory {
                sensor_id,
                required,
                available,
            } => PipelineError::InsufficientHistory {
                sensor_id: sensor_id.to_string(),
                required,
                available,
            },
            MLError::Conflict { target, version } => PipelineError::ArtifactConflict {
                target: target.to_string(),
                version,
            },
            MLError::StoreUnavailable { .. } | MLError::LockPoisoned => PipelineError::StoreUnavailable {
                reason: self.to_string(),
            },
            other => PipelineError::TrainingFailure {
                target: target.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
