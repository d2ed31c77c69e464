//! Random forest regressor
//!
//! Bagged CART trees: each tree sees a bootstrap sample drawn from its own
//! seeded generator, so trees grow in parallel without changing the result.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::regression_tree::{RegressionTree, TreeParams};
use crate::{MLError, MLResult};

/// One point of the hyperparameter grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    #[serde(flatten)]
    pub tree: TreeParams,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    trees: Vec<RegressionTree>,
    num_features: usize,
}

impl RandomForestRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: ForestParams, seed: u64) -> MLResult<Self> {
        if x.is_empty() {
            return Err(MLError::InsufficientData("random forest needs samples".into()));
        }
        if params.n_estimators == 0 {
            return Err(MLError::InvalidConfig("n_estimators must be positive".into()));
        }
        let n = x.len();
        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, &bootstrap, params.tree)
            })
            .collect::<MLResult<Vec<_>>>()?;

        Ok(Self {
            params,
            trees,
            num_features: x[0].len(),
        })
    }

    /// Mean of the tree predictions
    pub fn predict(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        total / self.trees.len().max(1) as f64
    }

    pub fn params(&self) -> ForestParams {
        self.params
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
}
