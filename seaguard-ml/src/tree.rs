//! Isolation tree implementation
//!
//! Trees are built by recursively partitioning a subsample on a random
//! feature at a random split value until every point is isolated or the
//! depth limit is reached.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeType};
use crate::{MLError, MLResult};

/// Configuration for isolation tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    /// Nodes in build order; index 0 is the root
    pub nodes: Vec<Node>,
    pub config: TreeConfig,
}

impl IsolationTree {
    pub fn new(config: TreeConfig) -> Self {
        Self {
            nodes: Vec::new(),
            config,
        }
    }

    /// Train the tree on `samples`, drawing splits from `rng`
    pub fn fit(&mut self, samples: &[&[f64]], rng: &mut StdRng) -> MLResult<()> {
        if samples.is_empty() {
            return Err(MLError::InsufficientData("isolation tree needs samples".into()));
        }
        self.nodes.clear();
        let indices: Vec<usize> = (0..samples.len()).collect();
        self.build(samples, &indices, 0, rng);
        Ok(())
    }

    fn build(&mut self, samples: &[&[f64]], indices: &[usize], depth: usize, rng: &mut StdRng) -> usize {
        let node_index = self.nodes.len();
        self.nodes.push(Node::external(indices.len(), depth));

        if depth >= self.config.max_depth || indices.len() <= 1 {
            return node_index;
        }

        let Some((feature, split_value)) = select_split(samples, indices, rng) else {
            // all samples identical
            return node_index;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| samples[i].get(feature).copied().unwrap_or(0.0) < split_value);
        if left.is_empty() || right.is_empty() {
            return node_index;
        }

        let left_index = self.build(samples, &left, depth + 1, rng);
        let right_index = self.build(samples, &right, depth + 1, rng);
        self.nodes[node_index] = Node::internal(feature, split_value, left_index, right_index, depth);
        node_index
    }

    /// Path length for a sample, including the leaf adjustment
    pub fn path_length(&self, sample: &[f64]) -> MLResult<f64> {
        let mut current = 0;
        while let Some(node) = self.nodes.get(current) {
            match node.next(sample)? {
                Some(child) => current = child,
                None => return Ok(node.leaf_path_length()),
            }
        }
        if current == 0 {
            return Ok(0.0);
        }
        Err(MLError::CorruptArtifact(format!("isolation tree has no node {}", current)))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.node_type, NodeType::External { .. }))
            .count()
    }
}

/// Random feature with a non-degenerate range, and a uniform split inside it
fn select_split(samples: &[&[f64]], indices: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
    let num_features = samples[indices[0]].len();
    let mut candidates: Vec<(usize, f64, f64)> = (0..num_features)
        .filter_map(|feature| {
            let (min, max) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = samples[i][feature];
                (lo.min(v), hi.max(v))
            });
            (max > min).then_some((feature, min, max))
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let pick = rng.gen_range(0..candidates.len());
    let (feature, min, max) = candidates.swap_remove(pick);
    Some((feature, rng.gen_range(min..max)))
}
