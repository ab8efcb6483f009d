//! Median-split decision tree
//!
//! Each node splits on the feature with the widest range of (standardised)
//! values at that feature's median. Growth stops when a node is pure, holds
//! fewer than `min_samples_split` rows, reaches `max_depth`, or no feature
//! produces a non-degenerate split.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ClassLabel;
use crate::features::FEATURE_COUNT;
use crate::stats;

/// Tree growth limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Number of features considered per node (`None` = all)
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 2,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf(ClassLabel),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A single decision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
}

type Row = [f64; FEATURE_COUNT];

/// Most frequent label; ties go to the more severe class
pub(crate) fn majority(labels: &[ClassLabel]) -> ClassLabel {
    let mut counts = [0usize; ClassLabel::COUNT];
    for l in labels {
        counts[l.index()] += 1;
    }
    let mut best = 0;
    for (i, c) in counts.iter().enumerate() {
        if *c >= counts[best] {
            best = i;
        }
    }
    ClassLabel::from_index(best)
}

impl DecisionTree {
    /// Grow a tree over the given rows
    ///
    /// `rng` is only consulted when `params.max_features` restricts the
    /// candidate features per node.
    pub fn fit<R: Rng + ?Sized>(
        rows: &[Row],
        labels: &[ClassLabel],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let idx: Vec<usize> = (0..rows.len()).collect();
        Self {
            root: grow(rows, labels, &idx, 0, params, rng),
        }
    }

    pub fn predict(&self, row: &Row) -> ClassLabel {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(label) => return *label,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(n: &Node) -> usize {
            match n {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn grow<R: Rng + ?Sized>(
    rows: &[Row],
    labels: &[ClassLabel],
    idx: &[usize],
    depth: usize,
    params: &TreeParams,
    rng: &mut R,
) -> Node {
    let node_labels: Vec<ClassLabel> = idx.iter().map(|&i| labels[i]).collect();
    let first = match node_labels.first() {
        Some(l) => *l,
        None => return Node::Leaf(ClassLabel::Healthy),
    };
    if node_labels.iter().all(|l| *l == first) {
        return Node::Leaf(first);
    }
    if idx.len() < params.min_samples_split.max(2) || depth >= params.max_depth {
        return Node::Leaf(majority(&node_labels));
    }

    let candidates: Vec<usize> = match params.max_features {
        Some(k) if k < FEATURE_COUNT => index::sample(rng, FEATURE_COUNT, k.max(1)).into_vec(),
        _ => (0..FEATURE_COUNT).collect(),
    };

    // widest feature first; ties keep the lower index
    let mut ranked: Vec<(usize, f64)> = candidates
        .iter()
        .map(|&f| {
            let column: Vec<f64> = idx.iter().map(|&i| rows[i][f]).collect();
            (f, stats::spread(&column))
        })
        .filter(|(_, s)| *s > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    for (feature, _) in ranked {
        let column: Vec<f64> = idx.iter().map(|&i| rows[i][feature]).collect();
        let threshold = match stats::median(&column) {
            Some(t) => t,
            None => continue,
        };
        let (left, right): (Vec<usize>, Vec<usize>) =
            idx.iter().partition(|&&i| rows[i][feature] <= threshold);
        if left.is_empty() || right.is_empty() {
            continue;
        }
        return Node::Split {
            feature,
            threshold,
            left: Box::new(grow(rows, labels, &left, depth + 1, params, rng)),
            right: Box::new(grow(rows, labels, &right, depth + 1, params, rng)),
        };
    }

    Node::Leaf(majority(&node_labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn row(x0: f64, x1: f64) -> Row {
        let mut r = [0.0; FEATURE_COUNT];
        r[0] = x0;
        r[1] = x1;
        r
    }

    #[test]
    fn test_pure_node_is_leaf() {
        let rows = vec![row(1.0, 0.0), row(2.0, 0.0)];
        let labels = vec![ClassLabel::Failed, ClassLabel::Failed];
        let tree = DecisionTree::fit(&rows, &labels, &TreeParams::default(), &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict(&row(100.0, 0.0)), ClassLabel::Failed);
    }

    #[test]
    fn test_splits_on_widest_feature() {
        // feature 1 separates the classes and has the wider range
        let rows = vec![row(0.0, -5.0), row(0.1, -4.0), row(0.0, 4.0), row(0.1, 5.0)];
        let labels = vec![
            ClassLabel::Healthy,
            ClassLabel::Healthy,
            ClassLabel::Failed,
            ClassLabel::Failed,
        ];
        let tree = DecisionTree::fit(&rows, &labels, &TreeParams::default(), &mut StdRng::seed_from_u64(0));
        match &tree.root {
            Node::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 1);
                assert_eq!(*threshold, 0.0);
            }
            Node::Leaf(_) => panic!("expected a split"),
        }
        assert_eq!(tree.predict(&row(0.0, -3.0)), ClassLabel::Healthy);
        assert_eq!(tree.predict(&row(0.0, 3.0)), ClassLabel::Failed);
    }

    #[test]
    fn test_identical_rows_fall_back_to_majority() {
        let rows = vec![row(1.0, 1.0); 3];
        let labels = vec![ClassLabel::Healthy, ClassLabel::Degraded, ClassLabel::Degraded];
        let tree = DecisionTree::fit(&rows, &labels, &TreeParams::default(), &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.predict(&row(1.0, 1.0)), ClassLabel::Degraded);
    }

    #[test]
    fn test_max_depth_respected() {
        let rows: Vec<Row> = (0..64).map(|i| row(i as f64, 0.0)).collect();
        let labels: Vec<ClassLabel> = (0..64)
            .map(|i| if i % 2 == 0 { ClassLabel::Healthy } else { ClassLabel::Failed })
            .collect();
        let params = TreeParams {
            max_depth: 3,
            ..Default::default()
        };
        let tree = DecisionTree::fit(&rows, &labels, &params, &mut StdRng::seed_from_u64(0));
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn test_majority_tie_prefers_severe() {
        assert_eq!(
            majority(&[ClassLabel::Healthy, ClassLabel::Failed]),
            ClassLabel::Failed
        );
    }
}
