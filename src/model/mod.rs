pub mod forest;
pub mod preprocess;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::ClassificationMetrics;
use crate::dataset::{Matrix, Table, write_json};
use crate::error::{PipelineError, Result, ResultExt};

pub use forest::{Criterion, ForestParams, RandomForest};
pub use preprocess::Preprocessor;

/// A fitted binary classifier. Labels are `0.0` / `1.0`.
pub trait Classifier {
    /// Probability of the positive class for each row.
    fn predict_proba(&self, features: &Matrix) -> Vec<f64>;

    fn predict(&self, features: &Matrix) -> Vec<f64> {
        self.predict_proba(features)
            .into_iter()
            .map(|p| if p > 0.5 { 1.0 } else { 0.0 })
            .collect()
    }
}

pub fn accuracy(truth: &[f64], predicted: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| is_positive(**t) == is_positive(**p))
        .count();
    correct as f64 / truth.len() as f64
}

/// Binary precision/recall/F1 for the positive class; zero divisions score 0.
pub fn classification_metrics(truth: &[f64], predicted: &[f64]) -> ClassificationMetrics {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&t, &p) in truth.iter().zip(predicted) {
        match (is_positive(t), is_positive(p)) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassificationMetrics {
        f1,
        precision,
        recall,
    }
}

fn is_positive(label: f64) -> bool {
    label >= 0.5
}

/// The preprocessing transform and the predictor it was trained with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModelBundle {
    pub preprocessor: Preprocessor,
    pub model: RandomForest,
}

impl TrainedModelBundle {
    pub fn new(preprocessor: Preprocessor, model: RandomForest) -> Self {
        Self {
            preprocessor,
            model,
        }
    }

    /// Predicts class labels for raw rows; the target column may be absent.
    pub fn predict(&self, table: &Table) -> std::result::Result<Vec<f64>, String> {
        let features = self.preprocessor.transform(table)?;
        Ok(self.model.predict(&features))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .context_with(|| format!("Failed to read model bundle: {}", path.display()))?;
        Self::from_slice(&bytes)
            .map_err(|err| PipelineError::dataset(path, format!("corrupt model bundle: {err}")))
    }

    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_match_hand_computed_values() {
        let truth = [1.0, 1.0, 0.0, 0.0, 1.0];
        let predicted = [1.0, 0.0, 1.0, 0.0, 1.0];
        let metrics = classification_metrics(&truth, &predicted);
        assert!((metrics.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(accuracy(&truth, &predicted), 0.6);
    }

    #[test]
    fn no_positive_predictions_score_zero() {
        let metrics = classification_metrics(&[1.0, 0.0], &[0.0, 0.0]);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }
}
