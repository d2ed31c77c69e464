//! Isolation Forest implementation
//!
//! Combines many isolation trees, each grown on its own subsample, and
//! averages their path lengths.

use rand::rngs::StdRng;
use rand::seq::index::sample as sample_indices;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::node::c_factor;
use crate::tree::{IsolationTree, TreeConfig};
use crate::{MLError, MLResult};

/// Configuration for Isolation Forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub num_trees: usize,
    /// Subsample size per tree
    pub sample_size: usize,
    /// Depth limit; `None` uses ceil(log2(sample_size))
    pub max_depth: Option<usize>,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            sample_size: 256,
            max_depth: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Subsample size actually used, the `n` in `c(n)`
    effective_sample_size: usize,
    num_features: usize,
}

impl IsolationForest {
    /// Train a forest on equal-length feature vectors
    pub fn fit(samples: &[Vec<f64>], config: &ForestConfig) -> MLResult<Self> {
        if samples.is_empty() {
            return Err(MLError::InsufficientData("isolation forest needs samples".into()));
        }
        if config.num_trees == 0 || config.sample_size == 0 {
            return Err(MLError::InvalidConfig("num_trees and sample_size must be positive".into()));
        }
        let num_features = samples[0].len();
        if let Some(bad) = samples.iter().find(|s| s.len() != num_features) {
            return Err(MLError::FeatureMismatch {
                expected: num_features,
                found: bad.len(),
            });
        }

        let sample_size = config.sample_size.min(samples.len());
        let max_depth = config
            .max_depth
            .unwrap_or_else(|| (sample_size.max(2) as f64).log2().ceil() as usize);

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.num_trees);
        for _ in 0..config.num_trees {
            let subset: Vec<&[f64]> = sample_indices(&mut rng, samples.len(), sample_size)
                .into_iter()
                .map(|i| samples[i].as_slice())
                .collect();
            let mut tree = IsolationTree::new(TreeConfig { max_depth });
            tree.fit(&subset, &mut rng)?;
            trees.push(tree);
        }

        Ok(Self {
            trees,
            effective_sample_size: sample_size,
            num_features,
        })
    }

    /// Mean path length across trees
    pub fn average_path_length(&self, sample: &[f64]) -> MLResult<f64> {
        if sample.len() != self.num_features {
            return Err(MLError::FeatureMismatch {
                expected: self.num_features,
                found: sample.len(),
            });
        }
        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.path_length(sample)?;
        }
        Ok(total / self.trees.len().max(1) as f64)
    }

    /// Expected path length for the training subsample size
    pub fn normalizer(&self) -> f64 {
        c_factor(self.effective_sample_size)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn stats(&self) -> ForestStats {
        ForestStats {
            num_trees: self.trees.len(),
            total_nodes: self.trees.iter().map(IsolationTree::node_count).sum(),
            max_depth: self.trees.iter().map(IsolationTree::depth).max().unwrap_or(0),
            sample_size: self.effective_sample_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForestStats {
    pub num_trees: usize,
    pub total_nodes: usize,
    pub max_depth: usize,
    pub sample_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outliers() -> Vec<Vec<f64>> {
        let mut samples: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![20.0 + (i % 10) as f64 * 0.1, 50.0 + (i % 6) as f64 * 0.2])
            .collect();
        samples.push(vec![35.0, 90.0]);
        samples.push(vec![5.0, 20.0]);
        samples
    }

    #[test]
    fn test_outlier_has_shorter_path() {
        let forest = IsolationForest::fit(&cluster_with_outliers(), &ForestConfig::default()).unwrap();
        let normal = forest.average_path_length(&[20.4, 50.4]).unwrap();
        let outlier = forest.average_path_length(&[35.0, 90.0]).unwrap();
        assert!(outlier < normal);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = cluster_with_outliers();
        let config = ForestConfig {
            num_trees: 10,
            ..ForestConfig::default()
        };
        assert_eq!(IsolationForest::fit(&data, &config).unwrap(), IsolationForest::fit(&data, &config).unwrap());
    }

    #[test]
    fn test_sample_size_capped_by_data() {
        let data = cluster_with_outliers();
        let forest = IsolationForest::fit(&data, &ForestConfig::default()).unwrap();
        let stats = forest.stats();
        assert_eq!(stats.sample_size, data.len());
        assert_eq!(stats.num_trees, 100);
        assert!(stats.max_depth <= 6);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let forest = IsolationForest::fit(&cluster_with_outliers(), &ForestConfig::default()).unwrap();
        assert!(matches!(
            forest.average_path_length(&[1.0]),
            Err(MLError::FeatureMismatch { expected: 2, found: 1 })
        ));
        assert!(IsolationForest::fit(&[vec![1.0], vec![1.0, 2.0]], &ForestConfig::default()).is_err());
    }
}
