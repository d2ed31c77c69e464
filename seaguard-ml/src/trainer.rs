//! Forecast trainer
//!
//! Given a feature table for one target:
//!
//! 1. split forward-only into training and test segments
//! 2. grid-search the random forest with walk-forward CV on the training segment
//! 3. cross-validate the linear model on the same folds
//! 4. fit the winning family on the whole training segment
//! 5. report holdout error and permutation importance on the test segment
//!
//! The family with the lower CV error wins; the random forest wins ties.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use seaguard_core::ModelTarget;

use crate::artifact::{FeatureImportance, ModelArtifact};
use crate::features::{sample_split, FeatureTable};
use crate::model::{ForecastModel, ModelFamily};
use crate::search::{cross_validate, grid_search, ParamGrid, SearchOutcome};
use crate::store::ArtifactStore;
use crate::validation::{fold_score, WalkForward};
use crate::{MLError, MLResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub grid: ParamGrid,
    pub walk_forward: WalkForward,
    /// Share of rows, by time, in the training segment
    pub train_fraction: f64,
    /// Shuffles per column for permutation importance; 0 disables it
    pub importance_repeats: usize,
    pub seed: u64,
    /// Wall-clock limit for the grid search
    pub search_budget_secs: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            grid: ParamGrid::default(),
            walk_forward: WalkForward::default(),
            train_fraction: 0.8,
            importance_repeats: 5,
            seed: 0,
            search_budget_secs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub artifact: ModelArtifact,
    pub ensemble_cv_error: Option<f64>,
    pub linear_cv_error: Option<f64>,
    /// Test-segment error per fitted family, winner first
    pub holdout_errors: Vec<(ModelFamily, f64)>,
    pub importances: Vec<FeatureImportance>,
    pub search: Option<SearchOutcome>,
}

impl TrainingReport {
    pub fn family(&self) -> ModelFamily {
        self.artifact.header.family
    }

    pub fn cv_error(&self) -> Option<f64> {
        self.artifact.header.cv_error
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train the best model for `target` without persisting it
    pub fn train(&self, target: ModelTarget, table: &FeatureTable) -> MLResult<TrainingReport> {
        if table.spec.target != target {
            return Err(MLError::InvalidConfig(format!(
                "feature table is for '{}', not '{}'",
                table.spec.target, target
            )));
        }
        let (train, test) = sample_split(table, self.config.train_fraction);
        if train.is_empty() {
            return Err(MLError::InsufficientData(format!(
                "no training rows for '{}' out of {}",
                target,
                table.len()
            )));
        }
        log::info!("{}: training on {} rows, testing on {}", target, train.len(), test.len());

        let deadline = self
            .config
            .search_budget_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        // a bad grid or fold layout is a caller error, not a lost family
        let search = match grid_search(&train, &self.config.grid, &self.config.walk_forward, deadline, self.config.seed) {
            Err(e @ MLError::InvalidConfig(_)) => return Err(e),
            search => search,
        };
        let linear = match cross_validate(&train, &self.config.walk_forward, ForecastModel::fit_linear) {
            Err(e @ MLError::InvalidConfig(_)) => return Err(e),
            linear => linear,
        };

        if let Err(e) = &search {
            log::warn!("{}: random forest search failed: {}", target, e);
        }
        if let Err(e) = &linear {
            log::warn!("{}: linear cross-validation failed: {}", target, e);
        }

        let ensemble_cv_error = search.as_ref().ok().map(|s| s.best.error);
        let linear_cv_error = linear.as_ref().ok().copied();

        let (model, cv_error) = match (&search, &linear) {
            (Ok(s), Ok(l)) if s.best.error <= *l => (ForecastModel::fit_forest(&train, s.best.params, self.config.seed)?, s.best.error),
            (_, Ok(l)) => (ForecastModel::fit_linear(&train)?, *l),
            (Ok(s), Err(_)) => (ForecastModel::fit_forest(&train, s.best.params, self.config.seed)?, s.best.error),
            (Err(forest), Err(linear)) => {
                return Err(MLError::NoValidCandidate(format!(
                    "random forest: {}; linear: {}",
                    forest, linear
                )))
            }
        };

        let mut holdout_errors = Vec::new();
        let mut importances = Vec::new();
        if !test.is_empty() {
            holdout_errors.push((model.family, holdout_error(&model, &test)?));
            if model.family == ModelFamily::RandomForest && linear.is_ok() {
                if let Ok(linear_model) = ForecastModel::fit_linear(&train) {
                    holdout_errors.push((ModelFamily::Linear, holdout_error(&linear_model, &test)?));
                }
            }
            importances = permutation_importance(&model, &test, self.config.importance_repeats, self.config.seed)?;
        }

        log::info!(
            "{}: selected {} with CV error {:.6} (forest {:?}, linear {:?})",
            target,
            model.family,
            cv_error,
            ensemble_cv_error,
            linear_cv_error
        );

        let artifact = ModelArtifact::forecast(model)?
            .with_cv_error(cv_error)
            .with_training_window(train.window())
            .with_importances(importances.clone());

        Ok(TrainingReport {
            artifact,
            ensemble_cv_error,
            linear_cv_error,
            holdout_errors,
            importances,
            search: search.ok(),
        })
    }

    /// Train and publish under the store's per-target lock
    pub fn train_and_publish(
        &self,
        store: &ArtifactStore,
        target: ModelTarget,
        table: &FeatureTable,
    ) -> MLResult<TrainingReport> {
        store.exclusive(target, || {
            let report = self.train(target, table)?;
            let artifact = store.publish(report.artifact.clone())?;
            Ok(TrainingReport { artifact, ..report })
        })
    }
}

/// Predicted outputs of a forecast artifact for one input row
pub fn predict(artifact: &ModelArtifact, inputs: &[f64]) -> MLResult<Vec<f64>> {
    match artifact.forecast_model() {
        Some(model) => model.predict(inputs),
        None => Err(MLError::InvalidConfig(format!(
            "artifact for '{}' is not a forecast model",
            artifact.target()
        ))),
    }
}

fn holdout_error(model: &ForecastModel, test: &FeatureTable) -> MLResult<f64> {
    let predicted = model.predict_table(test)?;
    Ok(fold_score(test.spec.target, &predicted, &test.targets()))
}

/// Mean metric increase over `repeats` seeded shuffles of each column
///
/// Columns whose importance is not finite are left out.
fn permutation_importance(
    model: &ForecastModel,
    test: &FeatureTable,
    repeats: usize,
    seed: u64,
) -> MLResult<Vec<FeatureImportance>> {
    if repeats == 0 || test.len() < 2 {
        return Ok(Vec::new());
    }
    let target = test.spec.target;
    let actual = test.targets();
    let inputs = test.inputs();
    let baseline = fold_score(target, &model.predict_table(test)?, &actual);
    let columns = test.spec.columns();

    let scored: Vec<MLResult<Option<FeatureImportance>>> = columns
        .par_iter()
        .enumerate()
        .map(|(j, column)| {
            let mut total = 0.0;
            for r in 0..repeats {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(((j as u64) << 16) + r as u64));
                let mut shuffled: Vec<f64> = inputs.iter().map(|row| row[j]).collect();
                shuffled.shuffle(&mut rng);

                let mut predicted = Vec::with_capacity(inputs.len());
                for (row, value) in inputs.iter().zip(&shuffled) {
                    let mut permuted = row.clone();
                    permuted[j] = *value;
                    predicted.push(model.predict(&permuted)?);
                }
                total += fold_score(target, &predicted, &actual) - baseline;
            }
            let mean = total / repeats as f64;
            Ok(mean.is_finite().then(|| FeatureImportance {
                column: column.clone(),
                mean,
            }))
        })
        .collect();

    let mut importances = Vec::with_capacity(columns.len());
    for entry in scored {
        if let Some(importance) = entry? {
            importances.push(importance);
        }
    }
    Ok(importances)
}
