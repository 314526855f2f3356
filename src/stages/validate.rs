use super::{Stage, StageKind};
use crate::artifact::{DataIngestionArtifact, DataValidationArtifact};
use crate::error::Result;
use crate::validation::SchemaValidator;

pub struct DataValidation {
    validator: SchemaValidator,
}

impl DataValidation {
    pub fn new(validator: SchemaValidator) -> Self {
        Self { validator }
    }
}

impl Stage for DataValidation {
    type Input = DataIngestionArtifact;
    type Output = DataValidationArtifact;

    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    fn run(&self, input: &DataIngestionArtifact) -> Result<DataValidationArtifact> {
        let train = input.train.load()?;
        let test = input.test.load()?;
        let report = self.validator.validate(&train, &test)?;
        Ok(DataValidationArtifact {
            train: input.train.clone(),
            test: input.test.clone(),
            report,
            report_path: self.validator.report_path().to_path_buf(),
        })
    }
}
