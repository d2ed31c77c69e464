//! Scripted sources, sinks and settings shared by the job tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use seaguard_connectors::{ConnectorError, ConnectorResult, FetchQuery, FetchRaw};
use seaguard_core::{AnomalyScore, CanonicalRecord, ForecastRecord, PipelineError, Sensor, SourceClass, TimeWindow};
use seaguard_jobs::sinks::{CanonicalSink, MemorySink, ResultSink};
use seaguard_jobs::{JobError, JobResult, RunSettings};
use seaguard_ml::{ArtifactStore, ForestConfig, ForestParams, ParamGrid, TreeParams, WalkForward};
use seaguard_schemas::{parse_datetime, Normalizer, RawField, RawReading, SensorRegistry};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

pub fn day(n: i64) -> TimeWindow {
    let start = epoch() + chrono::Duration::days(n);
    TimeWindow::new(start, start + chrono::Duration::days(1)).unwrap()
}

pub enum Script {
    /// Return the readings that fall inside the query window
    Readings(Vec<RawReading>),
    Fail(String),
    /// Never answer within any sane timeout
    Hang,
}

pub struct ScriptedSource {
    name: String,
    class: SourceClass,
    script: Script,
    pub calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(name: &str, class: SourceClass, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            class,
            script,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl FetchRaw for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_class(&self) -> SourceClass {
        self.class
    }

    async fn fetch_raw(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Readings(readings) => Ok(readings
                .iter()
                .filter(|r| query.wants(&r.sensor_id))
                .filter(|r| parse_datetime(&r.time).map_or(true, |t| query.window.contains(t)))
                .cloned()
                .collect()),
            Script::Fail(reason) => Err(ConnectorError::Origin(reason.clone())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Hourly buoy reports over `hours`, starting at `epoch()`
///
/// Depth relaxes geometrically and battery temperature follows a daily
/// cycle, so every forecast target has learnable structure.
pub fn buoy_readings(id: &str, hours: i64, offset: f64) -> Vec<RawReading> {
    (0..hours)
        .map(|i| {
            let when = epoch() + chrono::Duration::hours(i);
            let h = i as f64;
            let speed = 0.4 + 0.3 * ((i * 5) % 7) as f64 / 7.0;
            RawReading::new(id, when.to_rfc3339())
                .at(42.0 + offset + 0.003 * h, -69.0 - offset - 0.002 * h - 0.001 * ((i * 3) % 4) as f64)
                .with_field(RawField::number("water_temperature", 12.0 + 0.1 * ((i * 7) % 5) as f64))
                .with_field(RawField::number("battery_temperature", 20.0 + 2.0 * (h * std::f64::consts::PI / 12.0).sin()))
                .with_field(RawField::number("depth", 4.0 + 3.0 * 0.9f64.powi(i as i32) + offset))
                .with_field(RawField::number("buoy_speed", speed))
        })
        .collect()
}

pub fn registry(mobile: &[&str]) -> Arc<Normalizer> {
    let registry = SensorRegistry::from_sensors(mobile.iter().map(|id| Sensor::mobile(*id))).unwrap();
    Arc::new(Normalizer::new(Arc::new(registry)))
}

pub fn store(dir: &std::path::Path) -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::open(dir).unwrap())
}

/// Settings sized for tests: one small forest, few trees
pub fn small_settings() -> RunSettings {
    let mut settings = RunSettings::default();
    settings.timeout = Duration::from_secs(2);
    settings.trainer.grid = ParamGrid::single(ForestParams {
        n_estimators: 8,
        tree: TreeParams {
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
        },
    });
    settings.trainer.walk_forward = WalkForward::default();
    settings.trainer.importance_repeats = 1;
    settings.anomaly.forest = ForestConfig {
        num_trees: 16,
        sample_size: 64,
        ..ForestConfig::default()
    };
    settings
}

/// Canonical sink whose first `failures` appends report an unusable store
pub struct FlakySink {
    inner: MemorySink,
    failures: AtomicU32,
}

impl FlakySink {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySink::new(),
            failures: AtomicU32::new(failures),
        })
    }
}

impl CanonicalSink for FlakySink {
    fn append(&self, records: &[CanonicalRecord]) -> JobResult<usize> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(JobError::Pipeline(PipelineError::StoreUnavailable {
                reason: "disk full".into(),
            }));
        }
        self.inner.append(records)
    }

    fn history(&self) -> JobResult<Vec<CanonicalRecord>> {
        self.inner.history()
    }
}

/// Result sink whose first `failures` score writes report an unusable store
pub struct FlakyResults {
    inner: MemorySink,
    failures: AtomicU32,
}

impl FlakyResults {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySink::new(),
            failures: AtomicU32::new(failures),
        })
    }
}

impl ResultSink for FlakyResults {
    fn write_scores(&self, scores: &[AnomalyScore]) -> JobResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(JobError::Pipeline(PipelineError::StoreUnavailable {
                reason: "results volume read-only".into(),
            }));
        }
        self.inner.write_scores(scores)
    }

    fn write_forecasts(&self, forecasts: &[ForecastRecord]) -> JobResult<()> {
        self.inner.write_forecasts(forecasts)
    }
}
