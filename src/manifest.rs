use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::PublishedModelRef;
use crate::dataset::ensure_parent;
use crate::error::{PipelineError, Result, ResultExt};
use crate::stages::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
    pub duration_ms: f64,
}

/// Summary of one run, written next to its artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub generated_at: DateTime<Utc>,
    pub artifact_dir: String,
    pub config_digest: Option<String>,
    pub final_state: String,
    pub stages: Vec<StageRecord>,
    pub model_digest: Option<String>,
    pub published: Option<PublishedModelRef>,
    pub error: Option<String>,
}

impl RunManifest {
    pub fn write(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let file = File::create(path)
            .context_with(|| format!("Failed to create run manifest: {}", path.display()))?;
        serde_yaml::to_writer(file, self).map_err(|source| PipelineError::Manifest {
            context: format!("Failed to write run manifest: {}", path.display()),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .context_with(|| format!("Failed to open run manifest: {}", path.display()))?;
        serde_yaml::from_reader(file).map_err(|source| PipelineError::Manifest {
            context: format!("Failed to parse run manifest: {}", path.display()),
            source,
        })
    }
}

/// Hex SHA-256 of the file at `path`.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .context_with(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader
            .read(&mut buffer)
            .context_with(|| format!("Failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes `<digest>  <path>` into `output`, in `sha256sum` format.
pub fn write_sha256(path: &Path, output: &Path) -> Result<String> {
    let digest = compute_sha256(path)?;
    ensure_parent(output)?;
    let mut file = File::create(output)
        .context_with(|| format!("Failed to create digest file: {}", output.display()))?;
    writeln!(file, "{}  {}", digest, path.display()).context_with(|| {
        format!(
            "Failed to write digest for '{}' into '{}'",
            path.display(),
            output.display()
        )
    })?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_sha256_is_stable() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("digest.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            compute_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn manifest_round_trips_through_yaml() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("run/run_manifest.yaml");
        let manifest = RunManifest {
            generated_at: Utc::now(),
            artifact_dir: "artifact/run".into(),
            config_digest: None,
            final_state: "failed at train".into(),
            stages: vec![StageRecord {
                stage: StageKind::Train,
                status: StageStatus::Failed,
                duration_ms: 1.5,
            }],
            model_digest: None,
            published: None,
            error: Some("gate".into()),
        };
        manifest.write(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("stage: train"));
        assert!(text.contains("status: failed"));
        let loaded = RunManifest::load(&path).unwrap();
        assert_eq!(loaded.stages, manifest.stages);
    }
}
