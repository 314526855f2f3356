//! Write-once records handed from one stage to the next.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetRef, ensure_dir};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIngestionArtifact {
    pub train: DatasetRef,
    pub test: DatasetRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(rename = "validation_status")]
    pub status: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValidationArtifact {
    pub train: DatasetRef,
    pub test: DatasetRef,
    pub report: ValidationReport,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformationArtifact {
    pub transformed_train_path: PathBuf,
    pub transformed_test_path: PathBuf,
    pub preprocessor_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainerArtifact {
    pub trained_model_path: PathBuf,
    pub metrics: ClassificationMetrics,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluationArtifact {
    pub accepted: bool,
    pub trained_f1: f64,
    pub baseline_f1: Option<f64>,
    pub improvement: f64,
    pub trained_model_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedModelRef {
    pub bucket: String,
    pub key: String,
}

/// File locations for one run, rooted at a (usually timestamped) directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Claims a fresh `<base>/<%m_%d_%Y_%H_%M_%S>` directory. Runs started in
    /// the same second get `_1`, `_2`, ... suffixes.
    pub fn timestamped(base: &Path) -> Result<Self> {
        ensure_dir(base)?;
        let stamp = chrono::Local::now().format("%m_%d_%Y_%H_%M_%S").to_string();
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => stamp.clone(),
                n => format!("{stamp}_{n}"),
            };
            let root = base.join(name);
            match fs::create_dir(&root) {
                Ok(()) => return Ok(Self::new(root)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => {
                    return Err(PipelineError::Io {
                        context: format!("Failed to create run directory: {}", root.display()),
                        source,
                    });
                }
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ingested_train(&self) -> PathBuf {
        self.root.join("data_ingestion/ingested/train.csv")
    }

    pub fn ingested_test(&self) -> PathBuf {
        self.root.join("data_ingestion/ingested/test.csv")
    }

    pub fn validation_report(&self) -> PathBuf {
        self.root.join("data_validation/report.json")
    }

    pub fn transformed_train(&self) -> PathBuf {
        self.root.join("data_transformation/transformed/train.json")
    }

    pub fn transformed_test(&self) -> PathBuf {
        self.root.join("data_transformation/transformed/test.json")
    }

    pub fn preprocessor(&self) -> PathBuf {
        self.root
            .join("data_transformation/transformed_object/preprocessing.json")
    }

    pub fn trained_model(&self) -> PathBuf {
        self.root.join("model_trainer/trained_model/model.json")
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("run_manifest.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_with_external_field_names() {
        let report = ValidationReport {
            status: false,
            message: "Columns are missing".into(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"validation_status": false, "message": "Columns are missing"})
        );
    }

    #[test]
    fn timestamped_layouts_never_share_a_root() {
        let temp = tempfile::tempdir().unwrap();
        let first = ArtifactLayout::timestamped(temp.path()).unwrap();
        let second = ArtifactLayout::timestamped(temp.path()).unwrap();
        assert_ne!(first.root(), second.root());
        assert!(first.root().is_dir());
        assert!(second.root().is_dir());
    }
}
