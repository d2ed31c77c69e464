//! Walk-forward cross-validation
//!
//! Folds expand the training window forward in time and validate on the
//! block that follows it:
//!
//! ```text
//! fold 0: [train........][val]
//! fold 1: [train.............][val]
//! fold 2: [train..................][val]
//! ```
//!
//! Cut points are advanced past timestamp ties, so every training row of a
//! fold is strictly earlier than every validation row of that fold.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use seaguard_core::{haversine_km, ModelTarget};

use crate::features::{tie_safe_cut, FeatureTable};
use crate::{MLError, MLResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForward {
    pub folds: usize,
    /// Share of rows always kept for training before the first fold
    pub min_train_fraction: f64,
}

impl Default for WalkForward {
    fn default() -> Self {
        Self {
            folds: 3,
            min_train_fraction: 0.5,
        }
    }
}

/// Row ranges of one fold over a time-ordered table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub validate: Range<usize>,
}

impl WalkForward {
    pub fn new(folds: usize, min_train_fraction: f64) -> Self {
        Self {
            folds,
            min_train_fraction,
        }
    }

    /// Expanding-window folds over `table`
    pub fn splits(&self, table: &FeatureTable) -> MLResult<Vec<Fold>> {
        if self.folds == 0 {
            return Err(MLError::InvalidConfig("walk-forward needs at least one fold".into()));
        }
        if !(0.0..1.0).contains(&self.min_train_fraction) {
            return Err(MLError::InvalidConfig(format!(
                "min_train_fraction {} outside [0, 1)",
                self.min_train_fraction
            )));
        }

        let rows = &table.rows;
        let n = rows.len();
        let initial = ((n as f64 * self.min_train_fraction).ceil() as usize).max(1);
        let block = n.saturating_sub(initial) / self.folds;
        if block == 0 {
            return Err(MLError::InsufficientData(format!(
                "{} rows cannot form {} walk-forward folds",
                n, self.folds
            )));
        }

        let mut folds = Vec::with_capacity(self.folds);
        for k in 0..self.folds {
            let train_end = tie_safe_cut(rows, initial + k * block);
            let nominal_end = if k + 1 == self.folds { n } else { initial + (k + 1) * block };
            let validate_end = tie_safe_cut(rows, nominal_end.max(train_end));
            if train_end == 0 || train_end >= validate_end {
                continue;
            }
            if folds.last().map_or(false, |f: &Fold| f.train.end == train_end) {
                continue;
            }
            folds.push(Fold {
                train: 0..train_end,
                validate: train_end..validate_end,
            });
        }

        if folds.is_empty() {
            return Err(MLError::InsufficientData(
                "timestamp ties leave no walk-forward fold".into(),
            ));
        }
        Ok(folds)
    }
}

/// Error of predictions against truths for `target`; lower is better
///
/// Location: mean great-circle distance in km between predicted and true
/// (lat, lon). Other targets: mean squared error of the single output.
/// Empty input yields NaN.
pub fn fold_score(target: ModelTarget, predicted: &[Vec<f64>], actual: &[Vec<f64>]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return f64::NAN;
    }
    let n = predicted.len() as f64;
    match target {
        ModelTarget::Location => {
            predicted
                .iter()
                .zip(actual)
                .map(|(p, a)| haversine_km(p[0], p[1], a[0], a[1]))
                .sum::<f64>()
                / n
        }
        _ => {
            predicted
                .iter()
                .zip(actual)
                .map(|(p, a)| (p[0] - a[0]).powi(2))
                .sum::<f64>()
                / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureRow, FeatureSpec};
    use chrono::{Duration, TimeZone, Utc};
    use seaguard_core::SensorId;

    fn table(hours: &[i64]) -> FeatureTable {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = hours
            .iter()
            .map(|&h| FeatureRow {
                sensor_id: SensorId::from("s"),
                time: start + Duration::hours(h),
                target: vec![h as f64],
                inputs: vec![0.0],
                input_times: vec![],
            })
            .collect();
        FeatureTable::new(FeatureSpec::for_target(ModelTarget::Depth).unwrap(), rows)
    }

    #[test]
    fn test_expanding_folds() {
        let t = table(&(0..10).collect::<Vec<_>>());
        let folds = WalkForward::new(3, 0.4).splits(&t).unwrap();
        assert_eq!(
            folds,
            vec![
                Fold { train: 0..4, validate: 4..6 },
                Fold { train: 0..6, validate: 6..8 },
                Fold { train: 0..8, validate: 8..10 },
            ]
        );
    }

    #[test]
    fn test_folds_never_split_ties() {
        let t = table(&[0, 1, 2, 3, 3, 3, 4, 5, 6, 7]);
        let folds = WalkForward::new(3, 0.3).splits(&t).unwrap();
        for fold in &folds {
            let last_train = t.rows[fold.train.end - 1].time;
            assert!(t.rows[fold.validate.clone()].iter().all(|r| r.time > last_train));
        }
    }

    #[test]
    fn test_too_few_rows() {
        let t = table(&[0, 1, 2]);
        assert!(WalkForward::new(5, 0.5).splits(&t).is_err());
        assert!(WalkForward::new(0, 0.5).splits(&t).is_err());
    }

    #[test]
    fn test_location_score_is_great_circle() {
        let score = fold_score(ModelTarget::Location, &[vec![2.0, 2.0]], &[vec![0.0, 0.0]]);
        assert!((score - 314.47).abs() < 0.5, "score = {score}");
    }

    #[test]
    fn test_scalar_score_is_mse() {
        let score = fold_score(ModelTarget::Depth, &[vec![1.0], vec![4.0]], &[vec![0.0], vec![2.0]]);
        assert_eq!(score, 2.5);
        assert!(fold_score(ModelTarget::Depth, &[], &[]).is_nan());
    }
}
