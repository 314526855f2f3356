use std::path::PathBuf;

use tracing::info;

use super::{Stage, StageKind};
use crate::artifact::{DataTransformationArtifact, DataValidationArtifact};
use crate::config::TransformConfig;
use crate::dataset::write_json;
use crate::error::{PipelineError, Result};
use crate::model::Preprocessor;
use crate::schema::ColumnSchema;

/// Fits the preprocessor on the training split and encodes both splits.
pub struct DataTransformation {
    schema: ColumnSchema,
    settings: TransformConfig,
    train_path: PathBuf,
    test_path: PathBuf,
    preprocessor_path: PathBuf,
}

impl DataTransformation {
    pub fn new(
        schema: ColumnSchema,
        settings: TransformConfig,
        train_path: PathBuf,
        test_path: PathBuf,
        preprocessor_path: PathBuf,
    ) -> Self {
        Self {
            schema,
            settings,
            train_path,
            test_path,
            preprocessor_path,
        }
    }
}

impl Stage for DataTransformation {
    type Input = DataValidationArtifact;
    type Output = DataTransformationArtifact;

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn run(&self, input: &DataValidationArtifact) -> Result<DataTransformationArtifact> {
        let train = input.train.load()?;
        let test = input.test.load()?;

        let preprocessor = Preprocessor::fit(&train, &self.schema, &self.settings)
            .map_err(|reason| PipelineError::dataset(&input.train.path, reason))?;
        let train_matrix = preprocessor
            .transform_with_label(&train)
            .map_err(|reason| PipelineError::dataset(&input.train.path, reason))?;
        let test_matrix = preprocessor
            .transform_with_label(&test)
            .map_err(|reason| PipelineError::dataset(&input.test.path, reason))?;

        train_matrix.save(&self.train_path)?;
        test_matrix.save(&self.test_path)?;
        write_json(&self.preprocessor_path, &preprocessor)?;

        info!(
            features = preprocessor.feature_names().len(),
            train_rows = train_matrix.rows,
            test_rows = test_matrix.rows,
            "Datasets transformed"
        );

        Ok(DataTransformationArtifact {
            transformed_train_path: self.train_path.clone(),
            transformed_test_path: self.test_path.clone(),
            preprocessor_path: self.preprocessor_path.clone(),
        })
    }
}
