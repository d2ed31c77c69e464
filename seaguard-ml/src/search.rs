//! Hyperparameter grid search
//!
//! Every (candidate, fold) pair is an independent job on the rayon pool.
//! Fold membership is fixed before dispatch, so parallelism never changes
//! which rows a model trains or validates on. Jobs check the deadline
//! before doing any work; the first candidate always runs to completion so
//! an interrupted search still has something to return.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ensemble::ForestParams;
use crate::features::FeatureTable;
use crate::model::ForecastModel;
use crate::regression_tree::TreeParams;
use crate::validation::{fold_score, Fold, WalkForward};
use crate::{MLError, MLResult};

/// Bounded hyperparameter grid for the random forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub max_depth: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub min_samples_split: Vec<usize>,
    pub n_estimators: Vec<usize>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            max_depth: vec![70, 90],
            min_samples_leaf: vec![4, 5],
            min_samples_split: vec![8],
            n_estimators: vec![300],
        }
    }
}

impl ParamGrid {
    /// Single-point grid
    pub fn single(params: ForestParams) -> Self {
        Self {
            max_depth: vec![params.tree.max_depth],
            min_samples_leaf: vec![params.tree.min_samples_leaf],
            min_samples_split: vec![params.tree.min_samples_split],
            n_estimators: vec![params.n_estimators],
        }
    }

    pub fn validate(&self) -> MLResult<()> {
        let axes = [
            ("max_depth", &self.max_depth),
            ("min_samples_leaf", &self.min_samples_leaf),
            ("min_samples_split", &self.min_samples_split),
            ("n_estimators", &self.n_estimators),
        ];
        for (name, values) in axes {
            if values.is_empty() {
                return Err(MLError::InvalidConfig(format!("grid axis '{}' is empty", name)));
            }
            if values.contains(&0) {
                return Err(MLError::InvalidConfig(format!("grid axis '{}' contains 0", name)));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.max_depth.len() * self.min_samples_leaf.len() * self.min_samples_split.len() * self.n_estimators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates in lexicographic order of (max_depth, min_samples_leaf,
    /// min_samples_split, n_estimators)
    pub fn candidates(&self) -> Vec<ForestParams> {
        let mut out = Vec::with_capacity(self.len());
        for &max_depth in &self.max_depth {
            for &min_samples_leaf in &self.min_samples_leaf {
                for &min_samples_split in &self.min_samples_split {
                    for &n_estimators in &self.n_estimators {
                        out.push(ForestParams {
                            n_estimators,
                            tree: TreeParams {
                                max_depth,
                                min_samples_split,
                                min_samples_leaf,
                            },
                        });
                    }
                }
            }
        }
        out
    }
}

/// Aggregate walk-forward error of one grid point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    /// Mean fold score over every fold
    pub error: f64,
    pub folds_scored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: CandidateScore,
    /// Valid candidates in grid order
    pub candidates: Vec<CandidateScore>,
    /// (candidate, fold) jobs that ran
    pub evaluated: usize,
    /// Jobs dropped because the deadline had passed
    pub skipped: usize,
    /// Candidates left out because a fold was skipped or failed
    pub incomplete: usize,
    /// False when the deadline cut the search short
    pub completed: bool,
}

enum Evaluation {
    Scored(f64),
    Failed,
    Skipped,
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}

/// Aggregate per-fold results into candidate scores, in grid order
///
/// `results` holds `folds` entries per candidate. Only candidates with a
/// finite score on every fold are comparable; the rest are counted as
/// incomplete.
fn rank(candidates: &[ForestParams], results: &[Evaluation], folds: usize) -> (Vec<CandidateScore>, usize) {
    let mut scored = Vec::new();
    let mut incomplete = 0;
    for (c, params) in candidates.iter().enumerate() {
        let fold_scores: Vec<f64> = results[c * folds..(c + 1) * folds]
            .iter()
            .filter_map(|r| match r {
                Evaluation::Scored(s) if s.is_finite() => Some(*s),
                _ => None,
            })
            .collect();
        if folds == 0 || fold_scores.len() < folds {
            incomplete += 1;
            continue;
        }
        scored.push(CandidateScore {
            params: *params,
            error: fold_scores.iter().sum::<f64>() / folds as f64,
            folds_scored: folds,
        });
    }
    (scored, incomplete)
}

/// Score a freshly fitted model on one fold
fn score_fold<F>(table: &FeatureTable, fold: &Fold, fit: &F) -> MLResult<f64>
where
    F: Fn(&FeatureTable) -> MLResult<ForecastModel>,
{
    let train = table.slice(fold.train.clone());
    let validate = table.slice(fold.validate.clone());
    let model = fit(&train)?;
    let predicted = model.predict_table(&validate)?;
    Ok(fold_score(table.spec.target, &predicted, &validate.targets()))
}

/// Walk-forward grid search over random-forest hyperparameters
///
/// The lowest aggregate error wins; ties keep the candidate that comes
/// first in grid order.
pub fn grid_search(
    table: &FeatureTable,
    grid: &ParamGrid,
    walk_forward: &WalkForward,
    deadline: Option<Instant>,
    seed: u64,
) -> MLResult<SearchOutcome> {
    grid.validate()?;
    let folds = walk_forward.splits(table)?;
    let candidates = grid.candidates();

    let jobs: Vec<(usize, usize)> = (0..candidates.len())
        .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
        .collect();

    let results: Vec<Evaluation> = jobs
        .par_iter()
        .map(|&(c, f)| {
            if c > 0 && past(deadline) {
                return Evaluation::Skipped;
            }
            let params = candidates[c];
            let fit = |train: &FeatureTable| ForecastModel::fit_forest(train, params, seed);
            match score_fold(table, &folds[f], &fit) {
                Ok(score) if score.is_finite() => Evaluation::Scored(score),
                Ok(_) => Evaluation::Failed,
                Err(e) => {
                    log::debug!("{}: candidate {:?} fold {} failed: {}", table.spec.target, params, f, e);
                    Evaluation::Failed
                }
            }
        })
        .collect();

    let skipped = results.iter().filter(|r| matches!(r, Evaluation::Skipped)).count();
    let evaluated = results.len() - skipped;

    let (scored, incomplete) = rank(&candidates, &results, folds.len());
    if incomplete > 0 {
        log::debug!(
            "{}: {} candidates left out with unscored folds",
            table.spec.target,
            incomplete
        );
    }
    let best = scored
        .iter()
        .copied()
        .fold(None, |best: Option<CandidateScore>, candidate| match best {
            Some(b) if b.error <= candidate.error => Some(b),
            _ => Some(candidate),
        });
    let best = best.ok_or_else(|| {
        MLError::NoValidCandidate(format!(
            "none of {} grid points scored every fold for '{}'",
            candidates.len(),
            table.spec.target
        ))
    })?;

    if skipped > 0 {
        log::warn!(
            "{}: search deadline reached, {} of {} evaluations skipped",
            table.spec.target,
            skipped,
            results.len()
        );
    }
    log::info!(
        "{}: best of {} candidates {:?} with error {:.6}",
        table.spec.target,
        scored.len(),
        best.params,
        best.error
    );

    Ok(SearchOutcome {
        best,
        candidates: scored,
        evaluated,
        skipped,
        incomplete,
        completed: skipped == 0,
    })
}

/// Mean walk-forward error of a model produced by `fit`
pub fn cross_validate<F>(table: &FeatureTable, walk_forward: &WalkForward, fit: F) -> MLResult<f64>
where
    F: Fn(&FeatureTable) -> MLResult<ForecastModel> + Sync,
{
    let folds = walk_forward.splits(table)?;
    let scores: Vec<MLResult<f64>> = folds.par_iter().map(|fold| score_fold(table, fold, &fit)).collect();

    let mut total = 0.0;
    for score in scores {
        let score = score?;
        if !score.is_finite() {
            return Err(MLError::NoValidCandidate(format!(
                "non-finite fold score for '{}'",
                table.spec.target
            )));
        }
        total += score;
    }
    if folds.is_empty() {
        return Err(MLError::NoValidCandidate(format!("no folds for '{}'", table.spec.target)));
    }
    Ok(total / folds.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureRow, FeatureSpec};
    use chrono::{Duration, TimeZone, Utc};
    use seaguard_core::{ModelTarget, SensorId};

    fn depth_table(n: i64) -> FeatureTable {
        let spec = FeatureSpec::for_target(ModelTarget::Depth).unwrap().with_auxiliary(vec![]);
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let rows = (1..=n)
            .map(|i| {
                let previous = ((i * 13) % 17) as f64;
                FeatureRow {
                    sensor_id: SensorId::from("d"),
                    time: start + Duration::hours(i),
                    target: vec![2.0 * previous + 1.0],
                    inputs: vec![3600.0, (i - 1) as f64 * 3600.0, previous],
                    input_times: vec![start + Duration::hours(i - 1)],
                }
            })
            .collect();
        FeatureTable::new(spec, rows)
    }

    fn small_grid() -> ParamGrid {
        ParamGrid {
            max_depth: vec![1, 6],
            min_samples_leaf: vec![1],
            min_samples_split: vec![2],
            n_estimators: vec![5],
        }
    }

    #[test]
    fn test_candidates_are_lexicographic() {
        let grid = ParamGrid::default();
        let candidates = grid.candidates();
        assert_eq!(candidates.len(), 4);
        assert_eq!(grid.len(), 4);
        let keys: Vec<(usize, usize)> = candidates
            .iter()
            .map(|c| (c.tree.max_depth, c.tree.min_samples_leaf))
            .collect();
        assert_eq!(keys, vec![(70, 4), (70, 5), (90, 4), (90, 5)]);
        assert!(candidates.iter().all(|c| c.n_estimators == 300 && c.tree.min_samples_split == 8));
    }

    #[test]
    fn test_empty_axis_rejected() {
        let grid = ParamGrid {
            n_estimators: vec![],
            ..ParamGrid::default()
        };
        assert!(grid.validate().is_err());
        assert!(grid.is_empty());
    }

    #[test]
    fn test_deeper_trees_win() {
        let table = depth_table(60);
        let outcome = grid_search(&table, &small_grid(), &WalkForward::new(3, 0.5), None, 0).unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.evaluated, 6);
        assert_eq!(outcome.best.params.tree.max_depth, 6);
        assert_eq!(outcome.best.folds_scored, 3);
    }

    #[test]
    fn test_past_deadline_keeps_first_candidate() {
        let table = depth_table(60);
        let deadline = Instant::now();
        let outcome = grid_search(&table, &small_grid(), &WalkForward::new(3, 0.5), Some(deadline), 0).unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(outcome.incomplete, 1);
        assert_eq!(outcome.best.params.tree.max_depth, 1);
        assert_eq!(outcome.best.folds_scored, 3);
    }

    #[test]
    fn test_ties_keep_grid_order() {
        // every candidate sees the same constant target and scores 0
        let mut table = depth_table(40);
        for row in &mut table.rows {
            row.target = vec![5.0];
        }
        let outcome = grid_search(&table, &small_grid(), &WalkForward::default(), None, 0).unwrap();
        assert_eq!(outcome.best.error, 0.0);
        assert_eq!(outcome.best.params, small_grid().candidates()[0]);
    }

    #[test]
    fn test_partially_scored_candidate_cannot_win() {
        let candidates = small_grid().candidates();
        let extra = ForestParams {
            n_estimators: 7,
            ..candidates[1]
        };
        let candidates = vec![candidates[0], candidates[1], extra];
        let results = vec![
            Evaluation::Scored(4.0),
            Evaluation::Scored(4.0),
            Evaluation::Scored(4.0),
            // one cheap fold, the rest cut off by the deadline
            Evaluation::Scored(0.5),
            Evaluation::Skipped,
            Evaluation::Skipped,
            // one fold failed
            Evaluation::Scored(0.5),
            Evaluation::Failed,
            Evaluation::Scored(0.5),
        ];
        let (scored, incomplete) = rank(&candidates, &results, 3);
        assert_eq!(incomplete, 2);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].params, candidates[0]);
        assert_eq!(scored[0].error, 4.0);
        assert_eq!(scored[0].folds_scored, 3);
    }

    #[test]
    fn test_non_finite_fold_makes_candidate_incomplete() {
        let candidates = small_grid().candidates();
        let results = vec![
            Evaluation::Scored(2.0),
            Evaluation::Scored(f64::NAN),
            Evaluation::Scored(1.0),
            Evaluation::Scored(3.0),
        ];
        let (scored, incomplete) = rank(&candidates, &results, 2);
        assert_eq!(incomplete, 1);
        assert_eq!(scored[0].params, candidates[1]);
    }

    #[test]
    fn test_linear_cross_validation() {
        let table = depth_table(40);
        let error = cross_validate(&table, &WalkForward::default(), ForecastModel::fit_linear).unwrap();
        assert!(error < 1e-12, "error = {error}");
    }
}
