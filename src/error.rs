use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Raised before any stage work begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Exists,
    Upload,
    Download,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StorageOp::Exists => "exists",
            StorageOp::Upload => "upload",
            StorageOp::Download => "download",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("Blob store {operation} failed for {bucket}/{key}: {reason}")]
pub struct StorageError {
    pub operation: StorageOp,
    pub bucket: String,
    pub key: String,
    pub reason: String,
}

impl StorageError {
    pub fn new(
        operation: StorageOp,
        bucket: impl Into<String>,
        key: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self {
            operation,
            bucket: bucket.into(),
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Data validation failed: {message} (report: {})", report_path.display())]
    ValidationFailed {
        message: String,
        report_path: PathBuf,
    },

    #[error(
        "No model cleared the minimum bar: training accuracy {accuracy:.4} < expected {expected:.4}"
    )]
    TrainingGate { accuracy: f64, expected: f64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: {source}")]
    Manifest {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid dataset {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn dataset(path: &Path, reason: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Attaches a path-bearing message to I/O and JSON failures.
pub trait ResultExt<T> {
    fn context_with<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context_with<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| PipelineError::Io {
            context: context(),
            source,
        })
    }
}

impl<T> ResultExt<T> for std::result::Result<T, serde_json::Error> {
    fn context_with<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| PipelineError::Serialization {
            context: context(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_names_operation_and_location() {
        let err = StorageError::new(StorageOp::Download, "models", "prod/model.json", "not found");
        assert_eq!(
            err.to_string(),
            "Blob store download failed for models/prod/model.json: not found"
        );
    }

    #[test]
    fn training_gate_message_mentions_minimum_bar() {
        let err = PipelineError::TrainingGate {
            accuracy: 0.5,
            expected: 0.6,
        };
        assert!(err.to_string().contains("No model cleared the minimum bar"));
    }
}
