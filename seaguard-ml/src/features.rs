//! Causal feature tables
//!
//! For each sensor the canonical history is reduced to *observations*:
//! events, in time order, at which every output of the target is known.
//! A row for observation `i` is built from observations `i-1 ..= i-lag`
//! only, so all inputs predate the target time.
//!
//! Input layout per row:
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `horizon_seconds` | target time minus previous observation time |
//! | `seconds_since_start` | previous observation time minus the sensor's first observation |
//! | `{output}_previous_{k}` | target outputs at lag `k` |
//! | `{auxiliary}_previous_{k}` | auxiliary products at lag `k`, carried forward when missing |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use seaguard_core::{CanonicalRecord, ModelTarget, Product, SensorId, TimeWindow};

use crate::{MLError, MLResult};

/// Which inputs feed a forecast target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub target: ModelTarget,
    /// Number of previous observations used per row
    pub lag_steps: usize,
    /// Products besides the target outputs, lagged the same way
    pub auxiliary: Vec<Product>,
}

impl FeatureSpec {
    /// Default inputs for a forecast target with one lag step
    pub fn for_target(target: ModelTarget) -> MLResult<Self> {
        let auxiliary = match target {
            ModelTarget::Location => vec![
                Product::BuoySpeed,
                Product::BuoyDirection,
                Product::WindSpeed,
                Product::WindDirection,
                Product::WindGustSpeed,
                Product::CurrentSpeed,
                Product::CurrentDirection,
                Product::PositionDelta,
                Product::Acceleration,
                Product::ZonalCurrent,
                Product::MeridionalCurrent,
            ],
            ModelTarget::Depth => vec![Product::WaterPressure, Product::WaterTemperature],
            ModelTarget::BatteryTemperature => vec![Product::AirTemperature, Product::WaterTemperature],
            ModelTarget::Anomaly => {
                return Err(MLError::InvalidConfig("anomaly target has no feature table".into()))
            }
        };
        Ok(Self {
            target,
            lag_steps: 1,
            auxiliary,
        })
    }

    pub fn with_lag_steps(mut self, lag_steps: usize) -> Self {
        self.lag_steps = lag_steps;
        self
    }

    pub fn with_auxiliary(mut self, auxiliary: Vec<Product>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn validate(&self) -> MLResult<()> {
        if !self.target.is_forecast() {
            return Err(MLError::InvalidConfig(format!("'{}' is not a forecast target", self.target)));
        }
        if self.lag_steps == 0 {
            return Err(MLError::InvalidConfig("lag_steps must be at least 1".into()));
        }
        Ok(())
    }

    pub fn outputs(&self) -> &'static [Product] {
        self.target.outputs()
    }

    /// Input column names in row order
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec!["horizon_seconds".to_string(), "seconds_since_start".to_string()];
        for k in 1..=self.lag_steps {
            for product in self.outputs().iter().chain(&self.auxiliary) {
                columns.push(format!("{}_previous_{}", product.name(), k));
            }
        }
        columns
    }

    pub fn width(&self) -> usize {
        2 + self.lag_steps * (self.outputs().len() + self.auxiliary.len())
    }
}

/// One causal training row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub sensor_id: SensorId,
    /// Target time
    pub time: DateTime<Utc>,
    /// Target outputs in `ModelTarget::outputs` order
    pub target: Vec<f64>,
    pub inputs: Vec<f64>,
    /// Observation time of every lag used, lag 1 first
    pub input_times: Vec<DateTime<Utc>>,
}

impl FeatureRow {
    /// Every input observation strictly precedes the target time
    pub fn is_causal(&self) -> bool {
        self.input_times.iter().all(|t| *t < self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub spec: FeatureSpec,
    /// Rows sorted by target time
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(spec: FeatureSpec, mut rows: Vec<FeatureRow>) -> Self {
        rows.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.sensor_id.cmp(&b.sensor_id)));
        Self { spec, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn inputs(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.inputs.clone()).collect()
    }

    pub fn targets(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.target.clone()).collect()
    }

    /// Values of one output across rows
    pub fn output_column(&self, output: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.target[output]).collect()
    }

    /// Span from the earliest input to just past the last target
    pub fn window(&self) -> Option<TimeWindow> {
        let first = self.rows.iter().flat_map(|r| r.input_times.iter()).min()?;
        let last = self.rows.last()?.time;
        TimeWindow::new(*first, last + chrono::Duration::seconds(1))
    }

    /// Rows `range` as a new table with the same spec
    pub fn slice(&self, range: std::ops::Range<usize>) -> FeatureTable {
        FeatureTable {
            spec: self.spec.clone(),
            rows: self.rows[range].to_vec(),
        }
    }
}

/// Table plus the sensors left out for lack of history
#[derive(Debug)]
pub struct FeatureBuild {
    pub table: FeatureTable,
    pub skipped: Vec<MLError>,
}

struct Observation {
    time: DateTime<Utc>,
    outputs: Vec<f64>,
    auxiliary: Vec<f64>,
}

/// Reduce one sensor's history to target observations
fn observations(spec: &FeatureSpec, records: &[&CanonicalRecord]) -> Vec<Observation> {
    let mut ordered: Vec<&CanonicalRecord> = records.to_vec();
    ordered.sort_by_key(|r| r.datetime());
    // first record wins at a duplicate timestamp
    ordered.dedup_by_key(|r| r.datetime());

    let mut carried = vec![0.0; spec.auxiliary.len()];
    let mut out = Vec::with_capacity(ordered.len());
    for record in ordered {
        for (slot, product) in carried.iter_mut().zip(&spec.auxiliary) {
            if let Some(value) = record.output_value(*product) {
                *slot = value;
            }
        }
        let outputs: Option<Vec<f64>> = spec.outputs().iter().map(|p| record.output_value(*p)).collect();
        if let Some(outputs) = outputs {
            out.push(Observation {
                time: record.datetime(),
                outputs,
                auxiliary: carried.clone(),
            });
        }
    }
    out
}

fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

/// Inputs for `target_time` from the `lag_steps` observations ending at `last`
fn lagged_inputs(
    spec: &FeatureSpec,
    history: &[Observation],
    last: usize,
    target_time: DateTime<Utc>,
) -> (Vec<f64>, Vec<DateTime<Utc>>) {
    let previous = &history[last];
    let mut inputs = Vec::with_capacity(spec.width());
    inputs.push(seconds_between(target_time, previous.time));
    inputs.push(seconds_between(previous.time, history[0].time));

    let mut times = Vec::with_capacity(spec.lag_steps);
    for k in 1..=spec.lag_steps {
        let lagged = &history[last + 1 - k];
        inputs.extend_from_slice(&lagged.outputs);
        inputs.extend_from_slice(&lagged.auxiliary);
        times.push(lagged.time);
    }
    (inputs, times)
}

/// Causal rows for a single sensor
pub fn sensor_rows(spec: &FeatureSpec, sensor_id: &SensorId, records: &[&CanonicalRecord]) -> MLResult<Vec<FeatureRow>> {
    let history = observations(spec, records);
    let required = spec.lag_steps + 1;
    if history.len() < required {
        return Err(MLError::InsufficientHistory {
            sensor_id: sensor_id.clone(),
            required,
            available: history.len(),
        });
    }

    Ok((spec.lag_steps..history.len())
        .map(|i| {
            let (inputs, input_times) = lagged_inputs(spec, &history, i - 1, history[i].time);
            FeatureRow {
                sensor_id: sensor_id.clone(),
                time: history[i].time,
                target: history[i].outputs.clone(),
                inputs,
                input_times,
            }
        })
        .collect())
}

/// Build the feature table across all sensors in `records`
///
/// Sensors are processed independently in parallel. A sensor without
/// enough observations is reported in `skipped` rather than failing the
/// build.
pub fn build_features(spec: &FeatureSpec, records: &[CanonicalRecord]) -> MLResult<FeatureBuild> {
    spec.validate()?;

    let mut by_sensor: BTreeMap<&SensorId, Vec<&CanonicalRecord>> = BTreeMap::new();
    for record in records {
        by_sensor.entry(record.sensor_id()).or_default().push(record);
    }
    let groups: Vec<(&SensorId, Vec<&CanonicalRecord>)> = by_sensor.into_iter().collect();

    let results: Vec<MLResult<Vec<FeatureRow>>> = groups
        .par_iter()
        .map(|(sensor_id, history)| sensor_rows(spec, sensor_id, history))
        .collect();

    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for result in results {
        match result {
            Ok(sensor) => rows.extend(sensor),
            Err(e) => {
                log::debug!("{}: {}", spec.target, e);
                skipped.push(e);
            }
        }
    }
    log::info!(
        "{}: built {} feature rows from {} sensors ({} skipped)",
        spec.target,
        rows.len(),
        groups.len(),
        skipped.len()
    );

    Ok(FeatureBuild {
        table: FeatureTable::new(spec.clone(), rows),
        skipped,
    })
}

/// Inputs for predicting `target_time` from one sensor's history
pub fn prediction_inputs(spec: &FeatureSpec, records: &[CanonicalRecord], target_time: DateTime<Utc>) -> MLResult<Vec<f64>> {
    spec.validate()?;
    let refs: Vec<&CanonicalRecord> = records.iter().collect();
    let history = observations(spec, &refs);
    if history.len() < spec.lag_steps {
        let sensor_id = records
            .first()
            .map(|r| r.sensor_id().clone())
            .unwrap_or_else(|| SensorId::new(""));
        return Err(MLError::InsufficientHistory {
            sensor_id,
            required: spec.lag_steps,
            available: history.len(),
        });
    }
    let last = history.len() - 1;
    if history[last].time >= target_time {
        return Err(MLError::InvalidConfig(format!(
            "prediction time {} does not follow the last observation {}",
            target_time, history[last].time
        )));
    }
    Ok(lagged_inputs(spec, &history, last, target_time).0)
}

/// Move `cut` forward until it does not split rows sharing a target time
pub(crate) fn tie_safe_cut(rows: &[FeatureRow], mut cut: usize) -> usize {
    while cut > 0 && cut < rows.len() && rows[cut].time == rows[cut - 1].time {
        cut += 1;
    }
    cut
}

/// Forward-only split into an earlier training and a later test segment
///
/// Every training target time is strictly earlier than every test target
/// time.
pub fn sample_split(table: &FeatureTable, train_fraction: f64) -> (FeatureTable, FeatureTable) {
    let n = table.len();
    let cut = ((n as f64) * train_fraction.clamp(0.0, 1.0)).floor() as usize;
    let cut = tie_safe_cut(&table.rows, cut.min(n));
    (table.slice(0..cut), table.slice(cut..n))
}
