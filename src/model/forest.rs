//! Bagged CART trees with per-split feature subsampling.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Classifier;
use crate::dataset::Matrix;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    #[default]
    Gini,
    Entropy,
}

impl Criterion {
    fn impurity(self, positives: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let p = positives as f64 / total as f64;
        let q = 1.0 - p;
        match self {
            Criterion::Gini => 1.0 - p * p - q * q,
            Criterion::Entropy => {
                let term = |x: f64| if x > 0.0 { -x * x.log2() } else { 0.0 };
                term(p) + term(q)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_depth: Option<usize>,
    pub criterion: Criterion,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            min_samples_split: 7,
            min_samples_leaf: 6,
            max_depth: Some(10),
            criterion: Criterion::Entropy,
            random_state: 101,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        probability: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn probability(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { probability } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Deterministic for a given `random_state`.
    pub fn fit(params: &ForestParams, features: &Matrix, labels: &[f64]) -> Self {
        let n_features = features.cols;
        let max_features =
            ((n_features as f64).sqrt().round() as usize).clamp(1, n_features.max(1));
        let samples = features.rows;

        let trees = (0..params.n_estimators)
            .map(|tree_idx| {
                let seed = params.random_state.wrapping_add(tree_idx as u64);
                let mut rng = StdRng::seed_from_u64(seed);
                let bootstrap: Vec<usize> = if samples == 0 {
                    Vec::new()
                } else {
                    (0..samples).map(|_| rng.gen_range(0..samples)).collect()
                };
                let mut builder = TreeBuilder {
                    features,
                    labels,
                    params,
                    max_features,
                    rng,
                    nodes: Vec::new(),
                };
                builder.grow(bootstrap, 0);
                DecisionTree {
                    nodes: builder.nodes,
                }
            })
            .collect();

        Self {
            params: params.clone(),
            n_features,
            trees,
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }
}

impl Classifier for RandomForest {
    fn predict_proba(&self, features: &Matrix) -> Vec<f64> {
        (0..features.rows)
            .map(|idx| {
                if self.trees.is_empty() {
                    return 0.0;
                }
                let row = features.row(idx);
                let total: f64 = self.trees.iter().map(|tree| tree.probability(row)).sum();
                total / self.trees.len() as f64
            })
            .collect()
    }
}

struct TreeBuilder<'a> {
    features: &'a Matrix,
    labels: &'a [f64],
    params: &'a ForestParams,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let total = indices.len();
        let positives = indices.iter().filter(|&&i| self.labels[i] >= 0.5).count();
        let probability = if total == 0 {
            0.0
        } else {
            positives as f64 / total as f64
        };

        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { probability });

        let pure = positives == 0 || positives == total;
        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if pure || depth_reached || total < self.params.min_samples_split.max(2) {
            return node_idx;
        }

        let Some(split) = self.best_split(&indices, positives) else {
            return node_idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.features.get(i, split.feature) <= split.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[node_idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_idx
    }

    fn best_split(&mut self, indices: &[usize], positives: usize) -> Option<SplitCandidate> {
        let total = indices.len();
        let criterion = self.params.criterion;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent = criterion.impurity(positives, total);

        let mut candidates: Vec<usize> = (0..self.features.cols).collect();
        candidates.shuffle(&mut self.rng);

        // Keep drawing features past `max_features` until one yields a valid split.
        let mut best: Option<SplitCandidate> = None;
        for (examined, feature) in candidates.into_iter().enumerate() {
            if examined >= self.max_features && best.is_some() {
                break;
            }
            let mut column: Vec<(f64, bool)> = indices
                .iter()
                .map(|&i| (self.features.get(i, feature), self.labels[i] >= 0.5))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0usize;
            for split_at in 1..total {
                if column[split_at - 1].1 {
                    left_pos += 1;
                }
                if column[split_at - 1].0 == column[split_at].0 {
                    continue;
                }
                let left_n = split_at;
                let right_n = total - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let right_pos = positives - left_pos;
                let weighted = (left_n as f64 * criterion.impurity(left_pos, left_n)
                    + right_n as f64 * criterion.impurity(right_pos, right_n))
                    / total as f64;
                let gain = parent - weighted;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (column[split_at - 1].0 + column[split_at].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Matrix, Vec<f64>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let x = i as f64;
            rows.push(vec![x, (i % 3) as f64]);
            labels.push(if x >= 20.0 { 1.0 } else { 0.0 });
        }
        (Matrix::from_rows(rows), labels)
    }

    fn params(n_estimators: usize) -> ForestParams {
        ForestParams {
            n_estimators,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_depth: Some(5),
            criterion: Criterion::Gini,
            random_state: 7,
        }
    }

    #[test]
    fn learns_threshold_split() {
        let (features, labels) = separable();
        let forest = RandomForest::fit(&params(15), &features, &labels);
        assert_eq!(forest.tree_count(), 15);
        let predicted = forest.predict(&features);
        assert!(super::super::accuracy(&labels, &predicted) > 0.9);
    }

    #[test]
    fn fitting_is_reproducible() {
        let (features, labels) = separable();
        let first = RandomForest::fit(&params(5), &features, &labels);
        let second = RandomForest::fit(&params(5), &features, &labels);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_forest_predicts_negative_class() {
        let (features, labels) = separable();
        let forest = RandomForest::fit(&params(0), &features, &labels);
        assert!(forest.predict(&features).iter().all(|&p| p == 0.0));
    }

    #[test]
    fn entropy_is_one_bit_for_balanced_node() {
        assert!((Criterion::Entropy.impurity(5, 10) - 1.0).abs() < 1e-12);
        assert!((Criterion::Gini.impurity(5, 10) - 0.5).abs() < 1e-12);
    }
}
