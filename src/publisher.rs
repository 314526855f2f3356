use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::artifact::PublishedModelRef;
use crate::dataset::Table;
use crate::error::{PipelineError, Result, StorageError, StorageOp};
use crate::model::TrainedModelBundle;
use crate::storage::BlobStore;

/// Pushes models to, and serves predictions from, one fixed `bucket/key`.
pub struct ModelPublisher {
    store: Arc<dyn BlobStore>,
    bucket: String,
    key: String,
    loaded_model: OnceCell<TrainedModelBundle>,
}

impl ModelPublisher {
    pub fn new(
        store: Arc<dyn BlobStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            loaded_model: OnceCell::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_model_present(&self) -> Result<bool> {
        Ok(self.store.exists(&self.bucket, &self.key)?)
    }

    /// Uploads the model file; the local copy is kept.
    pub fn publish(&self, local_model_path: &Path) -> Result<PublishedModelRef> {
        info!(
            local = %local_model_path.display(),
            bucket = %self.bucket,
            key = %self.key,
            "Uploading model"
        );
        self.store
            .upload(local_model_path, &self.bucket, &self.key, false)?;
        Ok(PublishedModelRef {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
        })
    }

    /// Fetches and decodes the remote model without touching the cache.
    pub fn load_model(&self) -> Result<TrainedModelBundle> {
        let bytes = self.store.download(&self.bucket, &self.key)?;
        TrainedModelBundle::from_slice(&bytes).map_err(|err| {
            PipelineError::Storage(StorageError::new(
                StorageOp::Download,
                &self.bucket,
                &self.key,
                format!("object is not a model bundle: {err}"),
            ))
        })
    }

    /// The first call downloads the model; later calls reuse it for the
    /// lifetime of this publisher.
    pub fn predict(&self, dataset: &Table) -> Result<Vec<f64>> {
        let model = self.loaded_model.get_or_try_init(|| {
            info!(bucket = %self.bucket, key = %self.key, "Loading model for inference");
            self.load_model()
        })?;
        model.predict(dataset).map_err(|reason| PipelineError::Dataset {
            path: format!("{}/{}", self.bucket, self.key).into(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBlobStore;

    #[test]
    fn predict_without_remote_model_is_storage_error() {
        let store = Arc::new(InMemoryBlobStore::new());
        let publisher = ModelPublisher::new(store.clone(), "b1", "k1");
        let err = publisher.predict(&Table::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert_eq!(store.download_count(), 1);
    }

    #[test]
    fn corrupt_object_is_reported_with_location() {
        let store = Arc::new(InMemoryBlobStore::new());
        store.put("b1", "k1", b"not json".to_vec());
        let publisher = ModelPublisher::new(store, "b1", "k1");
        let err = publisher.load_model().unwrap_err();
        assert!(err.to_string().contains("b1/k1"));
    }
}
