#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use model_forge::PipelineConfig;
use model_forge::artifact::ArtifactLayout;
use tempfile::TempDir;

pub const SCHEMA: &str = "\
columns:
  - id: int
  - Age: int
  - Annual_Premium: float
  - Region: category
  - Response: int
numerical_columns: [Age, Annual_Premium]
categorical_columns: [Region]
";

/// Same feature set, plus a declared column the data never carries.
pub const SCHEMA_WITH_EXTRA_COLUMN: &str = "\
columns:
  - id: int
  - Age: int
  - Annual_Premium: float
  - Region: category
  - Vintage: int
  - Response: int
numerical_columns: [Age, Annual_Premium]
categorical_columns: [Region]
";

/// `Response` is 1 exactly when `Age >= 45`; the classes are balanced.
pub fn insurance_csv(rows: usize) -> String {
    let regions = ["north", "south", "east"];
    let mut out = String::from("id,Age,Annual_Premium,Region,Response\n");
    for idx in 0..rows {
        let age = 20 + (idx * 7) % 50;
        let premium = 1_000 + (idx * 37) % 500;
        let response = u8::from(age >= 45);
        let _ = writeln!(
            out,
            "{idx},{age},{premium}.5,{},{response}",
            regions[idx % regions.len()]
        );
    }
    out
}

/// A project directory with data, schema and an untimestamped artifact root.
pub fn project(schema: &str) -> (TempDir, PipelineConfig) {
    let temp = tempfile::tempdir().unwrap();
    fs::create_dir_all(temp.path().join("data")).unwrap();
    fs::write(temp.path().join("data/insurance.csv"), insurance_csv(80)).unwrap();
    fs::write(temp.path().join("schema.yaml"), schema).unwrap();
    let config = config_for(temp.path());
    (temp, config)
}

pub fn config_for(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.artifacts.root = root.join("artifact");
    config.artifacts.timestamped = false;
    config.data.sources = vec![root.join("data/*.csv").to_string_lossy().to_string()];
    config.data.seed = 7;
    config.schema = root.join("schema.yaml");
    config.trainer.forest.n_estimators = 15;
    config.publisher.bucket = "models".into();
    config.publisher.key = "forge/model.json".into();
    config.storage.root = root.join("blobstore");
    config
}

pub fn layout(root: &Path, run: &str) -> ArtifactLayout {
    ArtifactLayout::new(root.join("artifact").join(run))
}
