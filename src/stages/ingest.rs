use std::path::PathBuf;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;

use super::{Stage, StageKind};
use crate::artifact::DataIngestionArtifact;
use crate::config::DataConfig;
use crate::dataset::{DatasetRef, Table};
use crate::error::{PipelineError, Result};

/// Concatenates the configured CSV sources and writes a seeded train/test split.
pub struct DataIngestion {
    config: DataConfig,
    train_path: PathBuf,
    test_path: PathBuf,
}

impl DataIngestion {
    pub fn new(config: DataConfig, train_path: PathBuf, test_path: PathBuf) -> Self {
        Self {
            config,
            train_path,
            test_path,
        }
    }

    fn load_sources(&self) -> Result<Table> {
        let mut combined = Table::default();
        for source in self.config.expand_sources()? {
            let table = Table::read_csv(&source)?;
            info!(
                source = %source.display(),
                rows = table.row_count(),
                "Loaded raw dataset"
            );
            combined
                .extend(table)
                .map_err(|reason| PipelineError::dataset(&source, reason))?;
        }
        Ok(combined)
    }

    /// Row indices of the (train, test) halves.
    pub fn split_indices(rows: usize, test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..rows).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));
        let test_count = ((rows as f64) * test_ratio).ceil() as usize;
        let test_count = test_count.clamp(1, rows.saturating_sub(1).max(1));
        let train = indices.split_off(test_count);
        (train, indices)
    }
}

impl Stage for DataIngestion {
    type Input = ();
    type Output = DataIngestionArtifact;

    fn kind(&self) -> StageKind {
        StageKind::Ingest
    }

    fn run(&self, _input: &()) -> Result<DataIngestionArtifact> {
        let table = self.load_sources()?;
        if table.row_count() < 2 {
            return Err(PipelineError::dataset(
                &self.train_path,
                format!(
                    "need at least 2 rows to split, found {}",
                    table.row_count()
                ),
            ));
        }

        let (train_idx, test_idx) =
            Self::split_indices(table.row_count(), self.config.test_ratio, self.config.seed);
        table.select_rows(&train_idx).write_csv(&self.train_path)?;
        table.select_rows(&test_idx).write_csv(&self.test_path)?;

        info!(
            train_rows = train_idx.len(),
            test_rows = test_idx.len(),
            train = %self.train_path.display(),
            test = %self.test_path.display(),
            "Train/test split written"
        );

        Ok(DataIngestionArtifact {
            train: DatasetRef::new(&self.train_path),
            test: DatasetRef::new(&self.test_path),
        })
    }
}
