//! Sequential training run: Ingest, Validate, Transform, Train, Evaluate and
//! Publish. The first failing stage moves the run to `Failed` and its error is
//! returned unchanged.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::artifact::{
    ArtifactLayout, DataIngestionArtifact, DataTransformationArtifact, DataValidationArtifact,
    ModelEvaluationArtifact, ModelTrainerArtifact, PublishedModelRef,
};
use crate::config::{PipelineConfig, ValidationPolicy};
use crate::error::{PipelineError, Result};
use crate::manifest::{RunManifest, StageRecord, StageStatus, compute_sha256};
use crate::observability::MetricsCollector;
use crate::publisher::ModelPublisher;
use crate::schema::ColumnSchema;
use crate::stages::{
    DataIngestion, DataTransformation, DataValidation, ModelEvaluation, ModelPusher,
    ModelTrainer, Stage, StageKind,
};
use crate::storage::BlobStore;
use crate::validation::SchemaValidator;

pub const VALIDATION_GATE: &str = "validation";
pub const TRAINING_GATE: &str = "training_accuracy";
pub const EVALUATION_GATE: &str = "evaluation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running(StageKind),
    Done,
    Failed(StageKind),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Running(stage) => write!(f, "running {stage}"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed(stage) => write!(f, "failed at {stage}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Published(PublishedModelRef),
    /// The trained model did not beat the published baseline.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub artifact_dir: PathBuf,
    pub ingestion: DataIngestionArtifact,
    pub validation: DataValidationArtifact,
    pub transformation: DataTransformationArtifact,
    pub training: ModelTrainerArtifact,
    pub evaluation: ModelEvaluationArtifact,
    pub outcome: RunOutcome,
}

pub struct TrainingPipeline {
    config: PipelineConfig,
    schema: ColumnSchema,
    layout: ArtifactLayout,
    publisher: Arc<ModelPublisher>,
    metrics: MetricsCollector,
    state: PipelineState,
    history: Vec<StageRecord>,
    config_digest: Option<String>,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn BlobStore>) -> Result<Self> {
        let schema = config.load_schema()?;
        let layout = if config.artifacts.timestamped {
            ArtifactLayout::timestamped(&config.artifacts.root)?
        } else {
            ArtifactLayout::new(&config.artifacts.root)
        };
        let publisher = Arc::new(ModelPublisher::new(
            store,
            config.publisher.bucket.clone(),
            config.publisher.key.clone(),
        ));
        Ok(Self {
            config,
            schema,
            layout,
            publisher,
            metrics: MetricsCollector::new(),
            state: PipelineState::Idle,
            history: Vec::new(),
            config_digest: None,
        })
    }

    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Recorded in the run manifest.
    pub fn with_config_digest(mut self, digest: impl Into<String>) -> Self {
        self.config_digest = Some(digest.into());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn publisher(&self) -> Arc<ModelPublisher> {
        self.publisher.clone()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    /// Runs every stage in order and then writes the run manifest.
    pub fn run(&mut self) -> Result<RunReport> {
        self.metrics.reset();
        self.history.clear();
        self.state = PipelineState::Idle;

        let span = tracing::info_span!("run", artifact_dir = %self.layout.root().display());
        let _span_guard = span.enter();
        let started = Instant::now();
        info!("Training pipeline started");

        let result = self.run_stages();
        self.metrics.record_total_duration(started.elapsed());

        match &result {
            Ok(report) => {
                self.state = PipelineState::Done;
                info!(
                    outcome = ?report.outcome,
                    elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
                    "Training pipeline finished"
                );
            }
            Err(err) => error!(state = %self.state, error = %err, "Training pipeline failed"),
        }

        // Best-effort: the run outcome and state stand even if this write fails.
        let manifest_path = self.layout.manifest();
        match self.manifest(result.as_ref()).write(&manifest_path) {
            Ok(()) => info!(manifest = %manifest_path.display(), "Run manifest written"),
            Err(err) => warn!(error = %err, "Run manifest could not be written"),
        }

        result
    }

    fn run_stages(&mut self) -> Result<RunReport> {
        let ingest = DataIngestion::new(
            self.config.data.clone(),
            self.layout.ingested_train(),
            self.layout.ingested_test(),
        );
        let ingestion = self.execute(&ingest, &())?;

        let validate = DataValidation::new(SchemaValidator::new(
            self.schema.clone(),
            self.layout.validation_report(),
        ));
        let validation = self.execute(&validate, &ingestion)?;
        self.apply_validation_policy(&validation)?;

        let transform = DataTransformation::new(
            self.schema.clone(),
            self.config.transform.clone(),
            self.layout.transformed_train(),
            self.layout.transformed_test(),
            self.layout.preprocessor(),
        );
        let transformation = self.execute(&transform, &validation)?;

        let trainer = ModelTrainer::new(
            self.config.trainer.forest.clone(),
            self.config.trainer.expected_accuracy,
            self.layout.trained_model(),
        );
        let training = self.execute(&trainer, &transformation);
        match &training {
            Ok(_) => self.metrics.record_gate(TRAINING_GATE, true),
            Err(PipelineError::TrainingGate { .. }) => {
                self.metrics.record_gate(TRAINING_GATE, false)
            }
            Err(_) => {}
        }
        let training = training?;

        let evaluate = ModelEvaluation::new(
            self.publisher.clone(),
            validation.test.clone(),
            self.config.evaluation.min_improvement,
        );
        let evaluation = self.execute(&evaluate, &training)?;
        self.metrics.record_gate(EVALUATION_GATE, evaluation.accepted);

        let outcome = if evaluation.accepted {
            let pusher = ModelPusher::new(self.publisher.clone());
            RunOutcome::Published(self.execute(&pusher, &evaluation)?)
        } else {
            info!(
                trained_f1 = evaluation.trained_f1,
                baseline_f1 = ?evaluation.baseline_f1,
                "Trained model rejected; published model left in place"
            );
            RunOutcome::Rejected
        };

        Ok(RunReport {
            artifact_dir: self.layout.root().to_path_buf(),
            ingestion,
            validation,
            transformation,
            training,
            evaluation,
            outcome,
        })
    }

    fn apply_validation_policy(&mut self, validation: &DataValidationArtifact) -> Result<()> {
        self.metrics
            .record_gate(VALIDATION_GATE, validation.report.status);
        if validation.report.status {
            return Ok(());
        }
        match self.config.policy.on_invalid {
            ValidationPolicy::Continue => {
                warn!(
                    message = %validation.report.message,
                    "Validation failed; continuing as configured"
                );
                Ok(())
            }
            ValidationPolicy::Halt => {
                self.state = PipelineState::Failed(StageKind::Validate);
                if let Some(record) = self.history.last_mut() {
                    record.status = StageStatus::Failed;
                }
                Err(PipelineError::ValidationFailed {
                    message: validation.report.message.clone(),
                    report_path: validation.report_path.clone(),
                })
            }
        }
    }

    fn execute<S: Stage>(&mut self, stage: &S, input: &S::Input) -> Result<S::Output> {
        let kind = stage.kind();
        self.state = PipelineState::Running(kind);
        let span = tracing::info_span!("stage", stage = kind.as_str());
        let _span_guard = span.enter();

        let started = Instant::now();
        let mut timer = self.metrics.start_stage(kind.as_str());
        let result = stage.run(input);
        let status = match &result {
            Ok(_) => {
                info!(
                    elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
                    "Stage completed"
                );
                StageStatus::Completed
            }
            Err(err) => {
                timer.mark_failed();
                self.state = PipelineState::Failed(kind);
                error!(error = %err, "Stage failed");
                StageStatus::Failed
            }
        };
        drop(timer);

        self.history.push(StageRecord {
            stage: kind,
            status,
            duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
        });
        result
    }

    fn manifest(&self, result: std::result::Result<&RunReport, &PipelineError>) -> RunManifest {
        let (model_digest, published, error) = match result {
            Ok(report) => (
                compute_sha256(&report.training.trained_model_path).ok(),
                match &report.outcome {
                    RunOutcome::Published(model) => Some(model.clone()),
                    RunOutcome::Rejected => None,
                },
                None,
            ),
            Err(err) => (None, None, Some(err.to_string())),
        };
        RunManifest {
            generated_at: Utc::now(),
            artifact_dir: self.layout.root().to_string_lossy().to_string(),
            config_digest: self.config_digest.clone(),
            final_state: self.state.to_string(),
            stages: self.history.clone(),
            model_digest,
            published,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_renders_stage_name() {
        assert_eq!(
            PipelineState::Failed(StageKind::Train).to_string(),
            "failed at train"
        );
        assert_eq!(
            PipelineState::Running(StageKind::Ingest).to_string(),
            "running ingest"
        );
        assert_eq!(PipelineState::Done.to_string(), "done");
    }
}
