use std::sync::Arc;

use super::{Stage, StageKind};
use crate::artifact::{ModelEvaluationArtifact, PublishedModelRef};
use crate::error::Result;
use crate::publisher::ModelPublisher;

pub struct ModelPusher {
    publisher: Arc<ModelPublisher>,
}

impl ModelPusher {
    pub fn new(publisher: Arc<ModelPublisher>) -> Self {
        Self { publisher }
    }
}

impl Stage for ModelPusher {
    type Input = ModelEvaluationArtifact;
    type Output = PublishedModelRef;

    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    fn run(&self, input: &ModelEvaluationArtifact) -> Result<PublishedModelRef> {
        self.publisher.publish(&input.trained_model_path)
    }
}
