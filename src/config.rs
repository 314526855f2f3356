use std::path::{Path, PathBuf};

use clap::ValueEnum;
use glob::glob;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::ForestParams;
use crate::schema::ColumnSchema;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: u32,
    pub artifacts: ArtifactsConfig,
    pub data: DataConfig,
    pub schema: PathBuf,
    pub transform: TransformConfig,
    pub trainer: TrainerConfig,
    pub evaluation: EvaluationConfig,
    pub publisher: PublisherConfig,
    pub storage: StorageConfig,
    pub policy: PolicyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            artifacts: ArtifactsConfig::default(),
            data: DataConfig::default(),
            schema: PathBuf::from("schema.yaml"),
            transform: TransformConfig::default(),
            trainer: TrainerConfig::default(),
            evaluation: EvaluationConfig::default(),
            publisher: PublisherConfig::default(),
            storage: StorageConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub root: PathBuf,
    /// Nest each run under a `%m_%d_%Y_%H_%M_%S` directory.
    pub timestamped: bool,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("artifact"),
            timestamped: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    /// Glob patterns; every match is concatenated before splitting.
    pub sources: Vec<String>,
    pub test_ratio: f64,
    pub seed: u64,
}

impl DataConfig {
    pub fn expand_sources(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut resolved = Vec::new();
        for pattern in &self.sources {
            let matches = glob(pattern).map_err(|err| {
                ConfigError::Invalid(format!("Invalid glob pattern '{pattern}': {err}"))
            })?;
            let mut found = false;
            for entry in matches {
                let path = entry.map_err(|err| {
                    ConfigError::Invalid(format!("Unreadable match for '{pattern}': {err}"))
                })?;
                if path.is_file() {
                    resolved.push(path);
                    found = true;
                }
            }
            if !found {
                return Err(ConfigError::Invalid(format!(
                    "No data files matched pattern: {pattern}"
                )));
            }
        }
        Ok(resolved)
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sources: vec!["data/*.csv".to_string()],
            test_ratio: 0.25,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    pub target_column: String,
    /// Target value mapped to class `1`; everything else becomes `0`.
    pub positive_label: String,
    pub drop_columns: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            target_column: "Response".to_string(),
            positive_label: "1".to_string(),
            drop_columns: vec!["id".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrainerConfig {
    #[serde(flatten)]
    pub forest: ForestParams,
    pub expected_accuracy: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            expected_accuracy: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// F1 margin the new model must exceed over the published baseline.
    pub min_improvement: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub bucket: String,
    pub key: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bucket: "my-model-mlopsproj".to_string(),
            key: "model.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub region: String,
    pub access_key_env: String,
    pub secret_key_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("blobstore"),
            region: "us-east-1".to_string(),
            access_key_env: "AWS_ACCESS_KEY_ID".to_string(),
            secret_key_env: "AWS_SECRET_ACCESS_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub on_invalid: ValidationPolicy,
}

/// What the orchestrator does with a failed validation report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationPolicy {
    #[default]
    Halt,
    Continue,
}

impl PipelineConfig {
    /// Parses YAML and resolves relative paths against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PipelineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(base) = path.parent()
            && !base.as_os_str().is_empty()
        {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn rebase(&mut self, base: &Path) {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.artifacts.root = join(&self.artifacts.root);
        self.schema = join(&self.schema);
        self.storage.root = join(&self.storage.root);
        self.data.sources = self
            .data
            .sources
            .iter()
            .map(|pattern| join(Path::new(pattern)).to_string_lossy().to_string())
            .collect();
    }

    pub fn load_schema(&self) -> Result<ColumnSchema, ConfigError> {
        ColumnSchema::load(&self.schema)
    }

    /// Static checks that need no data and no credentials.
    pub fn check(&self) -> ConfigReport {
        let mut report = ConfigReport::default();

        if self.version != 1 {
            report
                .errors
                .push(format!("Unsupported config version: {}", self.version));
        }

        if self.data.sources.is_empty() {
            report
                .errors
                .push("At least one data source pattern is required".into());
        }
        for (idx, pattern) in self.data.sources.iter().enumerate() {
            if let Err(err) = glob::Pattern::new(pattern) {
                report.errors.push(format!(
                    "Data source {} ('{}') is not a valid glob: {}",
                    idx + 1,
                    pattern,
                    err
                ));
            }
        }
        if !(self.data.test_ratio > 0.0 && self.data.test_ratio < 1.0) {
            report.errors.push(format!(
                "data.test_ratio must be between 0 and 1 (exclusive), got {}",
                self.data.test_ratio
            ));
        }

        if !(0.0..=1.0).contains(&self.trainer.expected_accuracy) {
            report.errors.push(format!(
                "trainer.expected_accuracy must be within [0, 1], got {}",
                self.trainer.expected_accuracy
            ));
        }
        if self.trainer.forest.n_estimators == 0 {
            report
                .warnings
                .push("trainer.n_estimators is 0; every prediction will be class 0".into());
        }
        if self.trainer.forest.min_samples_leaf == 0 {
            report
                .warnings
                .push("trainer.min_samples_leaf is 0; treated as 1".into());
        }
        if self.evaluation.min_improvement < 0.0 {
            report.warnings.push(format!(
                "evaluation.min_improvement is negative ({}); \
                 a worse model can replace the baseline",
                self.evaluation.min_improvement
            ));
        }

        if self.publisher.bucket.trim().is_empty() {
            report.errors.push("publisher.bucket cannot be empty".into());
        }
        if self.publisher.key.trim().is_empty() {
            report.errors.push("publisher.key cannot be empty".into());
        }
        if self.storage.access_key_env.trim().is_empty()
            || self.storage.secret_key_env.trim().is_empty()
        {
            report
                .errors
                .push("storage credential variable names cannot be empty".into());
        }

        if self.transform.target_column.trim().is_empty() {
            report
                .errors
                .push("transform.target_column cannot be empty".into());
        }

        match self.load_schema() {
            Ok(schema) => report.merge(self.check_schema(&schema)),
            Err(err) => report.errors.push(err.to_string()),
        }

        report
    }

    fn check_schema(&self, schema: &ColumnSchema) -> ConfigReport {
        let mut report = ConfigReport::default();
        let target = &self.transform.target_column;
        if schema.numerical_columns.contains(target) || schema.categorical_columns.contains(target)
        {
            report.errors.push(format!(
                "Target column '{target}' must not be listed as a feature column"
            ));
        }
        if !schema.column_names().any(|name| name == target) {
            report.warnings.push(format!(
                "Target column '{target}' is not declared in the schema columns"
            ));
        }
        for name in schema
            .numerical_columns
            .iter()
            .chain(&schema.categorical_columns)
        {
            if !schema.column_names().any(|declared| declared == name) {
                report.warnings.push(format!(
                    "Feature column '{name}' is not declared in the schema columns"
                ));
            }
        }
        report
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ConfigReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ConfigReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}
