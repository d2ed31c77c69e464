//! Isolation tree node implementation
//!
//! Nodes live in a flat vector owned by the tree; children are referenced
//! by index.

use serde::{Deserialize, Serialize};

use crate::{MLError, MLResult};

/// Node type in the isolation tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    /// Internal node with split condition
    Internal {
        feature: usize,
        split_value: f64,
        left: usize,
        right: usize,
    },
    /// Leaf node (external)
    External {
        /// Number of training samples that reached this leaf
        size: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_type: NodeType,
    /// Path length from root
    pub depth: usize,
}

impl Node {
    pub fn internal(feature: usize, split_value: f64, left: usize, right: usize, depth: usize) -> Self {
        Self {
            node_type: NodeType::Internal {
                feature,
                split_value,
                left,
                right,
            },
            depth,
        }
    }

    pub fn external(size: usize, depth: usize) -> Self {
        Self {
            node_type: NodeType::External { size },
            depth,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.node_type, NodeType::External { .. })
    }

    /// Path length credited at a leaf: depth plus the expected depth of the
    /// unbuilt subtree below it
    pub fn leaf_path_length(&self) -> f64 {
        match self.node_type {
            NodeType::External { size } => self.depth as f64 + c_factor(size),
            NodeType::Internal { .. } => self.depth as f64,
        }
    }

    /// Child index for `sample`, or `None` at a leaf
    ///
    /// A sample too short for the split feature is an error.
    pub fn next(&self, sample: &[f64]) -> MLResult<Option<usize>> {
        match self.node_type {
            NodeType::Internal {
                feature,
                split_value,
                left,
                right,
            } => {
                let value = *sample.get(feature).ok_or(MLError::FeatureMismatch {
                    expected: feature + 1,
                    found: sample.len(),
                })?;
                Ok(Some(if value < split_value { left } else { right }))
            }
            NodeType::External { .. } => Ok(None),
        }
    }
}

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` samples
///
/// `c(n) = 2 H(n-1) - 2 (n-1) / n`, with `H(i) ≈ ln(i) + γ`.
pub fn c_factor(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let internal = Node::internal(0, 25.0, 1, 2, 3);
        assert!(!internal.is_leaf());
        assert_eq!(internal.depth, 3);

        let external = Node::external(10, 5);
        assert!(external.is_leaf());
        assert!(external.leaf_path_length() > 5.0);
    }

    #[test]
    fn test_node_next() {
        let node = Node::internal(0, 25.0, 1, 2, 0);
        assert_eq!(node.next(&[20.0]).unwrap(), Some(1));
        assert_eq!(node.next(&[30.0]).unwrap(), Some(2));
        assert_eq!(Node::external(1, 0).next(&[30.0]).unwrap(), None);
    }

    #[test]
    fn test_short_sample_is_not_routed() {
        let node = Node::internal(2, 25.0, 1, 2, 0);
        assert!(matches!(
            node.next(&[20.0, 21.0]),
            Err(MLError::FeatureMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn test_c_factor() {
        assert_eq!(c_factor(0), 0.0);
        assert_eq!(c_factor(1), 0.0);
        assert_eq!(c_factor(2), 1.0);
        // 2(ln 255 + γ) - 2·255/256
        assert!((c_factor(256) - 10.2448).abs() < 1e-3);
        assert!(c_factor(100) > c_factor(10));
    }
}
