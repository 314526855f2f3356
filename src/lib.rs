pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod manifest;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod publisher;
pub mod scaffold;
pub mod schema;
pub mod stages;
pub mod storage;
pub mod validation;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, StorageError};
pub use pipeline::{PipelineState, RunOutcome, RunReport, TrainingPipeline};
pub use publisher::ModelPublisher;
pub use storage::{BlobStore, FsBlobStore, InMemoryBlobStore, StorageConnection};
