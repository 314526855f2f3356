use std::sync::Arc;

use tracing::info;

use super::{Stage, StageKind};
use crate::artifact::{ModelEvaluationArtifact, ModelTrainerArtifact};
use crate::dataset::DatasetRef;
use crate::error::{PipelineError, Result};
use crate::model::{TrainedModelBundle, classification_metrics};
use crate::publisher::ModelPublisher;

/// Compares the fresh model with whatever is currently published.
pub struct ModelEvaluation {
    publisher: Arc<ModelPublisher>,
    test: DatasetRef,
    min_improvement: f64,
}

impl ModelEvaluation {
    pub fn new(publisher: Arc<ModelPublisher>, test: DatasetRef, min_improvement: f64) -> Self {
        Self {
            publisher,
            test,
            min_improvement,
        }
    }

    /// Accept when there is no baseline, or when the F1 gain beats the margin.
    pub fn accepts(trained_f1: f64, baseline_f1: Option<f64>, min_improvement: f64) -> bool {
        baseline_f1.is_none_or(|baseline| trained_f1 - baseline > min_improvement)
    }

    fn score(&self, bundle: &TrainedModelBundle) -> Result<f64> {
        let table = self.test.load()?;
        let as_dataset_err = |reason: String| PipelineError::dataset(&self.test.path, reason);
        let labels = bundle.preprocessor.labels(&table).map_err(as_dataset_err)?;
        let predicted = bundle.predict(&table).map_err(as_dataset_err)?;
        Ok(classification_metrics(&labels, &predicted).f1)
    }
}

impl Stage for ModelEvaluation {
    type Input = ModelTrainerArtifact;
    type Output = ModelEvaluationArtifact;

    fn kind(&self) -> StageKind {
        StageKind::Evaluate
    }

    fn run(&self, input: &ModelTrainerArtifact) -> Result<ModelEvaluationArtifact> {
        let trained_f1 = input.metrics.f1;
        let baseline_f1 = if self.publisher.is_model_present()? {
            let baseline = self.publisher.load_model()?;
            Some(self.score(&baseline)?)
        } else {
            info!(
                bucket = self.publisher.bucket(),
                key = self.publisher.key(),
                "No published baseline"
            );
            None
        };

        let accepted = Self::accepts(trained_f1, baseline_f1, self.min_improvement);
        let improvement = trained_f1 - baseline_f1.unwrap_or(0.0);
        info!(
            trained_f1,
            baseline_f1 = ?baseline_f1,
            improvement,
            accepted,
            "Model evaluated"
        );

        Ok(ModelEvaluationArtifact {
            accepted,
            trained_f1,
            baseline_f1,
            improvement,
            trained_model_path: input.trained_model_path.clone(),
        })
    }
}
