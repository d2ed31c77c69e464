//! Orchestration job
//!
//! One run: fetch from every adapter, normalize, persist the canonical
//! rows, score the new events, optionally retrain every configured target,
//! forecast for the sensors seen in this run, and persist the results.
//! Failures of a source, a record or a target are collected into the
//! [`RunSummary`]; only an unusable store or sink ends the run early.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use seaguard_connectors::{fetch_all, FetchQuery, FetchRaw, HttpTransport, SourceAdapter, SourceFetch, Transport};
use seaguard_core::{
    AnomalyScore, CanonicalRecord, ForecastRecord, ModelTarget, PipelineError, SensorId, SourceClass, TimeWindow,
};
use seaguard_ml::{
    build_features, train_anomaly_model, AnomalyScorer, ArtifactStore, FeatureSpec, MLError, ModelFamily,
    Trainer,
};
use seaguard_schemas::{Normalizer, SensorRegistry};

use crate::config::{JobConfig, RunSettings};
use crate::forecast::ForecastService;
use crate::sinks::{CanonicalSink, JsonLinesResultSink, JsonLinesSink, ResultSink};
use crate::{Failure, JobError, JobResult};

/// What a run should cover
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    /// Sensors to fetch; empty means everything the sources know
    pub sensor_ids: Vec<SensorId>,
    pub window: TimeWindow,
    pub retrain: bool,
}

impl JobRequest {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            sensor_ids: Vec::new(),
            window,
            retrain: false,
        }
    }

    pub fn with_sensors(mut self, sensor_ids: impl IntoIterator<Item = SensorId>) -> Self {
        self.sensor_ids = sensor_ids.into_iter().collect();
        self
    }

    pub fn with_retrain(mut self, retrain: bool) -> Self {
        self.retrain = retrain;
        self
    }
}

/// Per-source result of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub class: SourceClass,
    pub elapsed_ms: u64,
    /// Readings returned by the origin
    pub readings: usize,
    pub accepted: usize,
    pub rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

/// Per-target result of a retrain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
    pub target: ModelTarget,
    /// Newly published version
    pub version: Option<u32>,
    pub family: Option<ModelFamily>,
    pub cv_error: Option<f64>,
    /// Feature rows (or events, for the anomaly model) trained on
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl TrainingOutcome {
    fn failed(target: ModelTarget, rows: usize, err: &PipelineError) -> Self {
        Self {
            target,
            version: None,
            family: None,
            cv_error: None,
            rows,
            error: Some(Failure::from(err)),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub window: TimeWindow,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub sources: Vec<SourceOutcome>,
    pub normalized: usize,
    /// Normalized records not already in the canonical sink
    pub persisted: usize,
    pub rejected: usize,
    pub scores: Vec<AnomalyScore>,
    pub training: Vec<TrainingOutcome>,
    pub forecasts: Vec<ForecastRecord>,
}

impl RunSummary {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.error.is_some())
    }

    pub fn training_for(&self, target: ModelTarget) -> Option<&TrainingOutcome> {
        self.training.iter().find(|t| t.target == target)
    }
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn FetchRaw>>,
    normalizer: Arc<Normalizer>,
    store: Arc<ArtifactStore>,
    canonical: Arc<dyn CanonicalSink>,
    results: Arc<dyn ResultSink>,
    settings: RunSettings,
}

fn store_error(target: ModelTarget, err: MLError) -> JobError {
    JobError::Pipeline(err.into_pipeline(target))
}

impl Orchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn FetchRaw>>,
        normalizer: Arc<Normalizer>,
        store: Arc<ArtifactStore>,
        canonical: Arc<dyn CanonicalSink>,
        results: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            adapters,
            normalizer,
            store,
            canonical,
            results,
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wire up adapters, registry, store and JSON-lines sinks from a
    /// configuration file
    ///
    /// Fails on an unusable store root or an adapter whose credentials are
    /// missing from the environment.
    pub fn from_config(config: &JobConfig) -> JobResult<Self> {
        let registry = SensorRegistry::from_sensors(config.stations.iter().cloned())
            .map_err(|e| JobError::Config(format!("station registry: {}", e)))?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.http.clone()));

        let mut adapters: Vec<Arc<dyn FetchRaw>> = Vec::with_capacity(config.adapters.len());
        for adapter in &config.adapters {
            let built = SourceAdapter::from_config(adapter, Arc::clone(&transport))
                .map_err(|e| JobError::Config(format!("adapter '{}': {}", adapter.name(), e)))?;
            adapters.push(Arc::new(built));
        }

        let store = ArtifactStore::open(&config.store_path).map_err(|e| store_error(ModelTarget::Anomaly, e))?;
        log::info!(
            "configured {} adapters, {} stations, artifact store at {}",
            adapters.len(),
            config.stations.len(),
            config.store_path.display()
        );

        Ok(Self::new(
            adapters,
            Arc::new(Normalizer::new(Arc::new(registry))),
            Arc::new(store),
            Arc::new(JsonLinesSink::new(&config.output.canonical)),
            Arc::new(JsonLinesResultSink::new(&config.output.scores, &config.output.forecasts)),
        )
        .with_settings(config.settings()))
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run once, retrying the whole run up to `retry_count` times on failure
    pub async fn run(&self, request: &JobRequest) -> JobResult<RunSummary> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_once(request).await {
                Ok(mut summary) => {
                    summary.attempts = attempt;
                    return Ok(summary);
                }
                Err(e) if attempt <= self.settings.retry_count => {
                    log::warn!("run attempt {} failed, retrying: {}", attempt, e);
                }
                Err(e) => {
                    log::error!("run failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    async fn run_once(&self, request: &JobRequest) -> JobResult<RunSummary> {
        let query = FetchQuery::for_sensors(request.sensor_ids.iter().cloned(), request.window);
        let fetches = fetch_all(&self.adapters, &query, self.settings.timeout).await;

        let (records, sources) = self.normalize(&fetches);
        let normalized = sources.iter().map(|s| s.accepted).sum();
        let rejected = sources.iter().map(|s| s.rejected).sum();
        let persisted = self.canonical.append_new(&records)?;
        log::info!(
            "persisted {} new canonical records of {} normalized ({} rejected)",
            persisted,
            normalized,
            rejected
        );

        let scores = self.score(&records)?;

        let mut history = None;
        let training = if request.retrain {
            let all = self.canonical.history()?;
            let outcomes = self.retrain(all.clone()).await?;
            history = Some(all);
            outcomes
        } else {
            Vec::new()
        };

        let forecasts = match self.settings.forecast_horizon {
            Some(horizon) if !records.is_empty() => {
                let history = match history {
                    Some(history) => history,
                    None => self.canonical.history()?,
                };
                self.forecast(&records, &history, horizon)?
            }
            _ => Vec::new(),
        };

        self.results.write_scores(&scores)?;
        self.results.write_forecasts(&forecasts)?;

        Ok(RunSummary {
            window: request.window,
            attempts: 1,
            sources,
            normalized,
            persisted,
            rejected,
            scores,
            training,
            forecasts,
        })
    }

    fn normalize(&self, fetches: &[SourceFetch]) -> (Vec<CanonicalRecord>, Vec<SourceOutcome>) {
        let mut records = Vec::new();
        let mut sources = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            let elapsed_ms = fetch.elapsed.as_millis() as u64;
            let outcome = match &fetch.outcome {
                Ok(readings) => {
                    let (accepted, report) = self.normalizer.normalize_counted(fetch.class, readings);
                    if report.rejected > 0 {
                        log::warn!("{}: {} of {} readings rejected", fetch.source, report.rejected, readings.len());
                    }
                    records.extend(accepted);
                    SourceOutcome {
                        source: fetch.source.clone(),
                        class: fetch.class,
                        elapsed_ms,
                        readings: readings.len(),
                        accepted: report.accepted,
                        rejected: report.rejected,
                        error: None,
                    }
                }
                Err(e) => SourceOutcome {
                    source: fetch.source.clone(),
                    class: fetch.class,
                    elapsed_ms,
                    readings: 0,
                    accepted: 0,
                    rejected: 0,
                    error: Some(Failure::from(e)),
                },
            };
            sources.push(outcome);
        }
        (records, sources)
    }

    /// Score new events with the latest anomaly artifact, if one exists
    fn score(&self, records: &[CanonicalRecord]) -> JobResult<Vec<AnomalyScore>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let scorer = match self.store.latest(ModelTarget::Anomaly) {
            Ok(Some(artifact)) => match AnomalyScorer::new(artifact) {
                Ok(scorer) => scorer,
                Err(e) => {
                    log::warn!("anomaly artifact unusable, skipping scoring: {}", e);
                    return Ok(Vec::new());
                }
            },
            Ok(None) => {
                log::info!("no anomaly model published yet, skipping scoring");
                return Ok(Vec::new());
            }
            Err(e @ (MLError::StoreUnavailable { .. } | MLError::LockPoisoned)) => {
                return Err(store_error(ModelTarget::Anomaly, e))
            }
            Err(e) => {
                log::warn!("anomaly artifact not loaded, skipping scoring: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut scores = Vec::with_capacity(records.len());
        for record in records {
            match scorer.score(record) {
                Ok(score) => scores.push(AnomalyScore {
                    sensor_id: record.sensor_id().clone(),
                    datetime: record.datetime(),
                    score,
                    model_version: scorer.version(),
                }),
                Err(e) => log::warn!("{} at {}: not scored: {}", record.sensor_id(), record.datetime(), e),
            }
        }
        log::info!("scored {} events with anomaly model v{}", scores.len(), scorer.version());
        Ok(scores)
    }

    /// Retrain every configured target on the full history
    ///
    /// Runs on the blocking pool; targets train one after another so each
    /// gets the whole rayon pool for its search.
    async fn retrain(&self, history: Vec<CanonicalRecord>) -> JobResult<Vec<TrainingOutcome>> {
        let store = Arc::clone(&self.store);
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let mut outcomes = Vec::with_capacity(settings.targets.len());
            for &target in &settings.targets {
                let outcome = train_target(&store, &settings, target, &history);
                if let Some(failure) = &outcome.error {
                    if failure.kind == seaguard_core::ErrorKind::StoreUnavailable {
                        return Err(JobError::Pipeline(PipelineError::StoreUnavailable {
                            reason: failure.message.clone(),
                        }));
                    }
                }
                outcomes.push(outcome);
            }
            Ok(outcomes)
        })
        .await
        .map_err(|e| JobError::Task(e.to_string()))?
    }

    /// Forecast every target for each sensor with new records
    fn forecast(
        &self,
        records: &[CanonicalRecord],
        history: &[CanonicalRecord],
        horizon: chrono::Duration,
    ) -> JobResult<Vec<ForecastRecord>> {
        let service = ForecastService::from_store(&self.store)?;
        if service.forecast_versions().is_empty() {
            return Ok(Vec::new());
        }

        let sensors: BTreeSet<&SensorId> = records.iter().map(|r| r.sensor_id()).collect();
        let mut forecasts = Vec::new();
        for sensor in sensors {
            let own: Vec<CanonicalRecord> = history.iter().filter(|r| r.sensor_id() == sensor).cloned().collect();
            match service.evaluate(&own, Some(horizon)) {
                Ok(evaluation) => forecasts.extend(evaluation.forecasts),
                Err(e) => log::warn!("{}: no forecasts: {}", sensor, e),
            }
        }
        log::info!("produced {} forecasts", forecasts.len());
        Ok(forecasts)
    }
}

fn train_target(
    store: &ArtifactStore,
    settings: &RunSettings,
    target: ModelTarget,
    history: &[CanonicalRecord],
) -> TrainingOutcome {
    if target == ModelTarget::Anomaly {
        let published = train_anomaly_model(history, &settings.anomaly)
            .and_then(|artifact| store.exclusive(target, || store.publish(artifact)));
        return match published {
            Ok(artifact) => {
                log::info!("{}: published v{} from {} events", target, artifact.version(), history.len());
                TrainingOutcome {
                    target,
                    version: Some(artifact.version()),
                    family: Some(artifact.header.family),
                    cv_error: None,
                    rows: history.len(),
                    error: None,
                }
            }
            Err(e) => {
                let err = e.into_pipeline(target);
                log::warn!("{}", err);
                TrainingOutcome::failed(target, history.len(), &err)
            }
        };
    }

    let spec = match FeatureSpec::for_target(target) {
        Ok(spec) => spec.with_lag_steps(settings.lag_steps),
        Err(e) => return TrainingOutcome::failed(target, 0, &e.into_pipeline(target)),
    };
    let build = match build_features(&spec, history) {
        Ok(build) => build,
        Err(e) => return TrainingOutcome::failed(target, 0, &e.into_pipeline(target)),
    };
    if build.table.is_empty() {
        // report why no sensor qualified
        let err = match build.skipped.into_iter().next() {
            Some(e) => e.into_pipeline(target),
            None => PipelineError::InsufficientHistory {
                sensor_id: String::new(),
                required: spec.lag_steps + 1,
                available: 0,
            },
        };
        log::warn!("{}", err);
        return TrainingOutcome::failed(target, 0, &err);
    }

    let rows = build.table.len();
    match Trainer::new(settings.trainer.clone()).train_and_publish(store, target, &build.table) {
        Ok(report) => TrainingOutcome {
            target,
            version: Some(report.artifact.version()),
            family: Some(report.family()),
            cv_error: report.cv_error(),
            rows,
            error: None,
        },
        Err(e) => {
            let err = e.into_pipeline(target);
            log::warn!("{}", err);
            TrainingOutcome::failed(target, rows, &err)
        }
    }
}
