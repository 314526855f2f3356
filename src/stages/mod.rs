//! Pipeline stages. Each stage reads its predecessor's artifact by shared
//! reference and returns a fresh artifact of its own.

mod evaluate;
mod ingest;
mod publish;
mod train;
mod transform;
mod validate;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use evaluate::ModelEvaluation;
pub use ingest::DataIngestion;
pub use publish::ModelPusher;
pub use train::{ModelTrainer, TrainedModel, check_accuracy_gate};
pub use transform::DataTransformation;
pub use validate::DataValidation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Ingest,
    Validate,
    Transform,
    Train,
    Evaluate,
    Publish,
}

impl StageKind {
    pub const ORDER: [StageKind; 6] = [
        StageKind::Ingest,
        StageKind::Validate,
        StageKind::Transform,
        StageKind::Train,
        StageKind::Evaluate,
        StageKind::Publish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Ingest => "ingest",
            StageKind::Validate => "validate",
            StageKind::Transform => "transform",
            StageKind::Train => "train",
            StageKind::Evaluate => "evaluate",
            StageKind::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Stage {
    type Input;
    type Output;

    fn kind(&self) -> StageKind;

    fn run(&self, input: &Self::Input) -> Result<Self::Output>;
}
