//! CART regression tree
//!
//! Splits minimise the summed squared error of the two children over every
//! feature and every distinct boundary. Samples are addressed by index so a
//! bootstrap multiset never copies rows.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{MLError, MLResult};

/// Growth limits shared by every tree of an ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    /// Smallest node that may still be split
    pub min_samples_split: usize,
    /// Smallest admissible child
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 8,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum RegressionNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<RegressionNode>,
}

struct Split {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl RegressionTree {
    /// Grow a tree over the rows named by `indices` (duplicates allowed)
    pub fn fit(x: &[Vec<f64>], y: &[f64], indices: &[usize], params: TreeParams) -> MLResult<Self> {
        if indices.is_empty() {
            return Err(MLError::InsufficientData("regression tree needs samples".into()));
        }
        if x.len() != y.len() {
            return Err(MLError::FeatureMismatch {
                expected: x.len(),
                found: y.len(),
            });
        }
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, indices.to_vec(), 0, &params);
        Ok(tree)
    }

    fn grow(&mut self, x: &[Vec<f64>], y: &[f64], mut indices: Vec<usize>, depth: usize, params: &TreeParams) -> usize {
        let node_index = self.nodes.len();
        let (sum, sum_sq) = moments(y, &indices);
        let n = indices.len() as f64;
        self.nodes.push(RegressionNode::Leaf { value: sum / n });

        let min_leaf = params.min_samples_leaf.max(1);
        if depth >= params.max_depth
            || indices.len() < params.min_samples_split.max(2)
            || indices.len() < 2 * min_leaf
        {
            return node_index;
        }
        let parent_sse = sum_sq - sum * sum / n;
        if parent_sse <= f64::EPSILON * sum_sq.abs().max(1.0) {
            return node_index;
        }

        let Some(split) = best_split(x, y, &mut indices, min_leaf) else {
            return node_index;
        };
        if split.sse >= parent_sse {
            return node_index;
        }

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[i][split.feature] <= split.threshold);
        let left_index = self.grow(x, y, left, depth + 1, params);
        let right_index = self.grow(x, y, right, depth + 1, params);
        self.nodes[node_index] = RegressionNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_index,
            right: right_index,
        };
        node_index
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut current = 0;
        loop {
            match self.nodes.get(current) {
                Some(RegressionNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    current = if value <= *threshold { *left } else { *right };
                }
                Some(RegressionNode::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn moments(y: &[f64], indices: &[usize]) -> (f64, f64) {
    indices
        .iter()
        .fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]))
}

/// Lowest-SSE split; ties keep the first feature and boundary seen
fn best_split(x: &[Vec<f64>], y: &[f64], indices: &mut [usize], min_leaf: usize) -> Option<Split> {
    let n = indices.len();
    let (total, total_sq) = moments(y, indices);
    let num_features = x[indices[0]].len();
    let mut best: Option<Split> = None;

    for feature in 0..num_features {
        indices.sort_by(|&a, &b| x[a][feature].partial_cmp(&x[b][feature]).unwrap_or(Ordering::Equal));

        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        for pos in 1..n {
            let prev = indices[pos - 1];
            left_sum += y[prev];
            left_sq += y[prev] * y[prev];

            if pos < min_leaf || n - pos < min_leaf {
                continue;
            }
            let lower = x[prev][feature];
            let upper = x[indices[pos]][feature];
            if lower >= upper {
                continue;
            }

            let left_n = pos as f64;
            let right_n = (n - pos) as f64;
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n) + (right_sq - right_sum * right_sum / right_n);

            if best.as_ref().map_or(true, |b| sse < b.sse) {
                let mut threshold = lower + (upper - lower) / 2.0;
                if threshold >= upper {
                    threshold = lower;
                }
                best = Some(Split {
                    feature,
                    threshold,
                    sse,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_learns_step_function() {
        let (x, y) = step_data();
        let indices: Vec<usize> = (0..x.len()).collect();
        let tree = RegressionTree::fit(&x, &y, &indices, TreeParams::default()).unwrap();
        assert_eq!(tree.predict(&[3.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[15.0, 2.0]), 5.0);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_depth_zero_is_mean() {
        let (x, y) = step_data();
        let indices: Vec<usize> = (0..x.len()).collect();
        let params = TreeParams {
            max_depth: 0,
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &y, &indices, params).unwrap();
        assert_eq!(tree.predict(&[0.0, 0.0]), 3.0);
    }

    #[test]
    fn test_min_samples_leaf_blocks_small_children() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![0.0, 0.0, 0.0, 0.0, 0.0, 100.0];
        let indices: Vec<usize> = (0..6).collect();
        let params = TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 3,
        };
        let tree = RegressionTree::fit(&x, &y, &indices, params).unwrap();
        // the outlier cannot get a leaf of its own
        assert!(tree.predict(&[5.0]) < 100.0);
    }

    #[test]
    fn test_bootstrap_duplicates_accepted() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, &[0, 0, 0, 19, 19], TreeParams::default()).unwrap();
        assert_eq!(tree.predict(&[0.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[19.0, 1.0]), 5.0);
    }
}
