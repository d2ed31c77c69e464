//! Job configuration
//!
//! One TOML file describes a deployment: where artifacts and outputs live,
//! which sources to poll, the static station registry, and the training
//! settings. Credentials are referenced by environment variable name only.
//!
//! ```toml
//! store_path = "/var/lib/seaguard/artifacts"
//! timeout_secs = 60
//! retrain = true
//!
//! [[stations]]
//! id = "8454000"
//! class = "fixed_station"
//! lat = 41.807
//! lon = -71.401
//!
//! [[adapters]]
//! kind = "fixed_station"
//! name = "tide-gauges"
//! base_url = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter"
//! stations = ["8454000"]
//!
//! [trainer.grid]
//! max_depth = [70, 90]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use seaguard_connectors::{AdapterConfig, HttpConfig};
use seaguard_core::{ModelTarget, Sensor, TimeSource, TimeWindow};
use seaguard_ml::{AnomalyConfig, TrainerConfig};

use crate::logging::LoggerConfig;
use crate::{JobError, JobResult};

fn default_timeout_secs() -> u64 {
    60
}

fn default_lag_steps() -> usize {
    1
}

fn default_targets() -> Vec<ModelTarget> {
    ModelTarget::ALL.to_vec()
}

fn default_horizon_secs() -> i64 {
    7200
}

fn default_lookback_hours() -> i64 {
    24
}

/// Where canonical rows and results are appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub canonical: PathBuf,
    pub scores: PathBuf,
    pub forecasts: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            canonical: PathBuf::from("data/canonical.jsonl"),
            scores: PathBuf::from("data/anomaly_scores.jsonl"),
            forecasts: PathBuf::from("data/forecasts.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Root of the artifact store
    pub store_path: PathBuf,
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
    /// Static sensor registry
    #[serde(default)]
    pub stations: Vec<Sensor>,
    #[serde(default)]
    pub http: HttpConfig,
    /// Per-adapter fetch timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whole-run retries after a failed attempt
    #[serde(default)]
    pub retry_count: u32,
    /// Retrain when the CLI does not say otherwise
    #[serde(default)]
    pub retrain: bool,
    /// Targets trained on retrain
    #[serde(default = "default_targets")]
    pub targets: Vec<ModelTarget>,
    #[serde(default = "default_lag_steps")]
    pub lag_steps: usize,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    /// Forecast lead time; 0 disables forecasts
    #[serde(default = "default_horizon_secs")]
    pub forecast_horizon_secs: i64,
    /// Window length when a run gives no start
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggerConfig,
}

impl FromStr for JobConfig {
    type Err = JobError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let config: JobConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

impl JobConfig {
    pub fn load(path: impl AsRef<Path>) -> JobResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| JobError::io(path, e))?;
        text.parse()
    }

    pub fn validate(&self) -> JobResult<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(JobError::Config("store_path must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(JobError::Config("timeout_secs must be positive".into()));
        }
        if self.lag_steps == 0 {
            return Err(JobError::Config("lag_steps must be at least 1".into()));
        }
        if self.forecast_horizon_secs < 0 {
            return Err(JobError::Config("forecast_horizon_secs must not be negative".into()));
        }
        if self.lookback_hours <= 0 {
            return Err(JobError::Config("lookback_hours must be positive".into()));
        }
        let fraction = self.trainer.train_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(JobError::Config(format!("train_fraction {} outside (0, 1]", fraction)));
        }
        self.trainer
            .grid
            .validate()
            .map_err(|e| JobError::Config(e.to_string()))?;
        if self.anomaly.products.is_empty() {
            return Err(JobError::Config("anomaly.products must not be empty".into()));
        }

        let mut names = HashSet::new();
        for adapter in &self.adapters {
            if !names.insert(adapter.name()) {
                return Err(JobError::Config(format!("duplicate adapter name '{}'", adapter.name())));
            }
        }
        Ok(())
    }

    /// Query window for a run
    ///
    /// A missing end is the clock's current time; a missing start reaches
    /// `lookback_hours` back from the end.
    pub fn query_window(
        &self,
        clock: &dyn TimeSource,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> JobResult<TimeWindow> {
        let end = end.unwrap_or_else(|| clock.now());
        match start {
            Some(start) => TimeWindow::new(start, end)
                .ok_or_else(|| JobError::Config(format!("window start {} is after end {}", start, end))),
            None => Ok(TimeWindow::trailing(end, chrono::Duration::hours(self.lookback_hours))),
        }
    }

    /// Runtime knobs handed to the orchestrator
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            retry_count: self.retry_count,
            targets: self.targets.clone(),
            lag_steps: self.lag_steps,
            trainer: self.trainer.clone(),
            anomaly: self.anomaly.clone(),
            forecast_horizon: (self.forecast_horizon_secs > 0)
                .then(|| chrono::Duration::seconds(self.forecast_horizon_secs)),
        }
    }
}

/// Orchestrator settings independent of any configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub timeout: Duration,
    pub retry_count: u32,
    pub targets: Vec<ModelTarget>,
    pub lag_steps: usize,
    pub trainer: TrainerConfig,
    pub anomaly: AnomalyConfig,
    pub forecast_horizon: Option<chrono::Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_timeout_secs()),
            retry_count: 0,
            targets: default_targets(),
            lag_steps: default_lag_steps(),
            trainer: TrainerConfig::default(),
            anomaly: AnomalyConfig::default(),
            forecast_horizon: Some(chrono::Duration::seconds(default_horizon_secs())),
        }
    }
}
