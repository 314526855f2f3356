use std::path::PathBuf;

use tracing::{info, warn};

use super::{Stage, StageKind};
use crate::artifact::{ClassificationMetrics, DataTransformationArtifact, ModelTrainerArtifact};
use crate::dataset::Matrix;
use crate::error::{PipelineError, Result, ResultExt};
use crate::model::{
    Classifier, ForestParams, Preprocessor, RandomForest, TrainedModelBundle, accuracy,
    classification_metrics,
};

/// Fails when `accuracy` is strictly below `expected`; equality passes.
pub fn check_accuracy_gate(accuracy: f64, expected: f64) -> Result<()> {
    if accuracy < expected {
        return Err(PipelineError::TrainingGate { accuracy, expected });
    }
    Ok(())
}

/// A fitted forest with its held-out scores.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: RandomForest,
    pub metrics: ClassificationMetrics,
    pub test_accuracy: f64,
}

impl TrainedModel {
    pub fn fit(params: &ForestParams, train: &Matrix, test: &Matrix) -> Self {
        let (x_train, y_train) = train.split_label();
        let (x_test, y_test) = test.split_label();
        let model = RandomForest::fit(params, &x_train, &y_train);
        let predicted = model.predict(&x_test);
        Self {
            metrics: classification_metrics(&y_test, &predicted),
            test_accuracy: accuracy(&y_test, &predicted),
            model,
        }
    }

    pub fn accuracy_on(&self, dataset: &Matrix) -> f64 {
        let (features, labels) = dataset.split_label();
        accuracy(&labels, &self.model.predict(&features))
    }
}

pub struct ModelTrainer {
    params: ForestParams,
    expected_accuracy: f64,
    model_path: PathBuf,
}

impl ModelTrainer {
    pub fn new(params: ForestParams, expected_accuracy: f64, model_path: PathBuf) -> Self {
        Self {
            params,
            expected_accuracy,
            model_path,
        }
    }
}

impl Stage for ModelTrainer {
    type Input = DataTransformationArtifact;
    type Output = ModelTrainerArtifact;

    fn kind(&self) -> StageKind {
        StageKind::Train
    }

    fn run(&self, input: &DataTransformationArtifact) -> Result<ModelTrainerArtifact> {
        let train = Matrix::load(&input.transformed_train_path)?;
        let test = Matrix::load(&input.transformed_test_path)?;
        if train.rows == 0 {
            return Err(PipelineError::dataset(
                &input.transformed_train_path,
                "training matrix has no rows",
            ));
        }
        if train.cols != test.cols {
            return Err(PipelineError::dataset(
                &input.transformed_test_path,
                format!(
                    "expected {} column(s) to match training data, found {}",
                    train.cols, test.cols
                ),
            ));
        }

        let trained = TrainedModel::fit(&self.params, &train, &test);
        let train_accuracy = trained.accuracy_on(&train);
        info!(
            trees = trained.model.tree_count(),
            train_accuracy,
            test_accuracy = trained.test_accuracy,
            f1 = trained.metrics.f1,
            precision = trained.metrics.precision,
            recall = trained.metrics.recall,
            "Model fitted"
        );

        if let Err(err) = check_accuracy_gate(train_accuracy, self.expected_accuracy) {
            warn!(
                train_accuracy,
                expected = self.expected_accuracy,
                "Training accuracy gate failed"
            );
            return Err(err);
        }

        let preprocessor_json = std::fs::read(&input.preprocessor_path).context_with(|| {
            format!(
                "Failed to read preprocessor: {}",
                input.preprocessor_path.display()
            )
        })?;
        let preprocessor: Preprocessor =
            serde_json::from_slice(&preprocessor_json).context_with(|| {
                format!(
                    "Failed to decode preprocessor: {}",
                    input.preprocessor_path.display()
                )
            })?;

        TrainedModelBundle::new(preprocessor, trained.model).save(&self.model_path)?;
        info!(path = %self.model_path.display(), "Model bundle saved");

        Ok(ModelTrainerArtifact {
            trained_model_path: self.model_path.clone(),
            metrics: trained.metrics,
            train_accuracy,
            test_accuracy: trained.test_accuracy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_strictly_less_than() {
        assert!(check_accuracy_gate(0.6, 0.6).is_ok());
        assert!(check_accuracy_gate(0.61, 0.6).is_ok());
        let err = check_accuracy_gate(0.59, 0.6).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TrainingGate { accuracy, expected }
                if accuracy == 0.59 && expected == 0.6
        ));
    }

    #[test]
    fn empty_forest_scores_majority_negative() {
        let params = ForestParams {
            n_estimators: 0,
            ..ForestParams::default()
        };
        // Three of four training labels are negative.
        let train = Matrix::from_rows(vec![
            vec![0.1, 0.0],
            vec![0.2, 0.0],
            vec![0.3, 0.0],
            vec![0.4, 1.0],
        ]);
        let trained = TrainedModel::fit(&params, &train, &train);
        assert_eq!(trained.accuracy_on(&train), 0.75);
        assert_eq!(trained.metrics.f1, 0.0);
        assert!(check_accuracy_gate(0.75, 0.75).is_ok());
        assert!(check_accuracy_gate(0.75, 0.76).is_err());
    }

    #[test]
    fn gate_failure_leaves_no_bundle() {
        let temp = tempfile::tempdir().unwrap();
        let train = Matrix::from_rows(vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
        train.save(&temp.path().join("train.json")).unwrap();
        train.save(&temp.path().join("test.json")).unwrap();
        std::fs::write(temp.path().join("pre.json"), "{}").unwrap();

        let params = ForestParams {
            n_estimators: 0,
            ..ForestParams::default()
        };
        let model_path = temp.path().join("model.json");
        let trainer = ModelTrainer::new(params, 0.6, model_path.clone());
        let err = trainer
            .run(&DataTransformationArtifact {
                transformed_train_path: temp.path().join("train.json"),
                transformed_test_path: temp.path().join("test.json"),
                preprocessor_path: temp.path().join("pre.json"),
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::TrainingGate { .. }));
        assert!(!model_path.exists());
    }
}
