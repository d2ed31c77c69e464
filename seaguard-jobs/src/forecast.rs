//! Scoring and forecast calls over published artifacts
//!
//! [`ForecastService`] holds the latest artifact of every target and
//! answers "how unusual is the newest event, and where will this sensor be
//! after the horizon" for one sensor's history.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::Serialize;

use seaguard_core::{AnomalyScore, CanonicalRecord, ForecastRecord, ModelTarget, PipelineError};
use seaguard_ml::{prediction_inputs, predict, AnomalyScorer, ArtifactStore, MLError, ModelArtifact};

use crate::{Failure, JobError, JobResult};

/// Result of one [`ForecastService::evaluate`] call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub sensor_id: seaguard_core::SensorId,
    /// Score of the newest event, when an anomaly artifact exists
    pub anomaly: Option<AnomalyScore>,
    pub forecasts: Vec<ForecastRecord>,
    /// Targets that produced nothing, with the reason
    pub skipped: Vec<(ModelTarget, Failure)>,
}

#[derive(Debug, Clone, Default)]
pub struct ForecastService {
    scorer: Option<AnomalyScorer>,
    forecasters: Vec<ModelArtifact>,
}

impl ForecastService {
    /// Service over explicit artifacts
    ///
    /// Anomaly artifacts beyond the first and non-forecast artifacts are
    /// ignored.
    pub fn new(artifacts: impl IntoIterator<Item = ModelArtifact>) -> Self {
        let mut service = Self::default();
        for artifact in artifacts {
            match artifact.target() {
                ModelTarget::Anomaly if service.scorer.is_none() => match AnomalyScorer::new(artifact) {
                    Ok(scorer) => service.scorer = Some(scorer),
                    Err(e) => log::warn!("anomaly artifact unusable: {}", e),
                },
                target if target.is_forecast() && artifact.forecast_model().is_some() => {
                    service.forecasters.push(artifact)
                }
                target => log::debug!("ignoring artifact for '{}'", target),
            }
        }
        service
    }

    /// Load the latest version of every target
    ///
    /// A target whose latest artifact fails to load is left out; an
    /// unusable store is an error.
    pub fn from_store(store: &ArtifactStore) -> JobResult<Self> {
        let mut artifacts = Vec::new();
        for target in ModelTarget::ALL {
            match store.latest(target) {
                Ok(Some(artifact)) => artifacts.push(artifact),
                Ok(None) => {}
                Err(e @ (MLError::StoreUnavailable { .. } | MLError::LockPoisoned)) => {
                    return Err(JobError::Pipeline(e.into_pipeline(target)))
                }
                Err(e) => log::warn!("{}: latest artifact not loaded: {}", target, e),
            }
        }
        Ok(Self::new(artifacts))
    }

    pub fn anomaly_version(&self) -> Option<u32> {
        self.scorer.as_ref().map(AnomalyScorer::version)
    }

    /// Targets with a loaded forecast artifact and their versions
    pub fn forecast_versions(&self) -> Vec<(ModelTarget, u32)> {
        self.forecasters.iter().map(|a| (a.target(), a.version())).collect()
    }

    /// Score the newest event of `history` and, given a horizon, forecast
    /// every target from it
    ///
    /// `history` may mix sensors; only the sensor of the newest record is
    /// evaluated.
    pub fn evaluate(&self, history: &[CanonicalRecord], horizon: Option<Duration>) -> JobResult<Evaluation> {
        let latest = history.iter().max_by_key(|r| r.datetime()).ok_or_else(|| {
            JobError::Pipeline(PipelineError::InsufficientHistory {
                sensor_id: String::new(),
                required: 1,
                available: 0,
            })
        })?;
        if let Some(h) = horizon {
            if h <= Duration::zero() {
                return Err(JobError::Config(format!("forecast horizon must be positive, got {}s", h.num_seconds())));
            }
        }

        let sensor_id = latest.sensor_id().clone();
        let own: Vec<CanonicalRecord> = history
            .iter()
            .filter(|r| r.sensor_id() == &sensor_id)
            .cloned()
            .collect();

        let mut skipped = Vec::new();
        let anomaly = match &self.scorer {
            Some(scorer) => match scorer.score(latest) {
                Ok(score) => Some(AnomalyScore {
                    sensor_id: sensor_id.clone(),
                    datetime: latest.datetime(),
                    score,
                    model_version: scorer.version(),
                }),
                Err(e) => {
                    skipped.push((ModelTarget::Anomaly, Failure::from(&e.into_pipeline(ModelTarget::Anomaly))));
                    None
                }
            },
            None => None,
        };

        let mut forecasts = Vec::new();
        if let Some(h) = horizon {
            let target_time = latest.datetime() + h;
            for artifact in &self.forecasters {
                let target = artifact.target();
                match forecast_one(artifact, &own, target_time) {
                    Ok(values) => forecasts.push(ForecastRecord {
                        sensor_id: sensor_id.clone(),
                        timestamp: target_time,
                        target,
                        values,
                        model_version: artifact.version(),
                    }),
                    Err(e) => {
                        log::debug!("{}: no {} forecast: {}", sensor_id, target, e);
                        skipped.push((target, Failure::from(&e.into_pipeline(target))));
                    }
                }
            }
        }

        Ok(Evaluation {
            sensor_id,
            anomaly,
            forecasts,
            skipped,
        })
    }
}

fn forecast_one(
    artifact: &ModelArtifact,
    history: &[CanonicalRecord],
    target_time: chrono::DateTime<chrono::Utc>,
) -> Result<BTreeMap<seaguard_core::Product, f64>, MLError> {
    let model = artifact
        .forecast_model()
        .ok_or_else(|| MLError::InvalidConfig(format!("'{}' holds no forecast model", artifact.target())))?;
    let inputs = prediction_inputs(&model.spec, history, target_time)?;
    let outputs = predict(artifact, &inputs)?;
    Ok(model.spec.outputs().iter().copied().zip(outputs).collect())
}
