//! Blob store gateway.
//!
//! A [`StorageConnection`] is built once at startup from the environment and
//! shared through `Arc` by every component that talks to the store.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{ConfigError, StorageError, StorageOp};

pub trait BlobStore: Send + Sync {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Copies `local` to `bucket/key`. With `remove_local`, the local file is
    /// deleted only after the object has been committed.
    fn upload(
        &self,
        local: &Path,
        bucket: &str,
        key: &str,
        remove_local: bool,
    ) -> Result<(), StorageError>;

    fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct StorageConnection {
    credentials: Credentials,
    region: String,
    root: PathBuf,
}

impl StorageConnection {
    pub fn new(
        credentials: Credentials,
        region: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            root: root.into(),
        }
    }

    pub fn from_env(config: &StorageConfig) -> Result<Arc<Self>, ConfigError> {
        Self::from_lookup(config, |var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(config: &StorageConfig, lookup: F) -> Result<Arc<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &str| {
            lookup(var).ok_or_else(|| ConfigError::MissingCredential {
                var: var.to_string(),
            })
        };
        let access = require(&config.access_key_env)?;
        let secret = require(&config.secret_key_env)?;
        info!(region = %config.region, root = %config.root.display(), "Storage connection ready");
        Ok(Arc::new(Self::new(
            Credentials::new(access, secret),
            config.region.clone(),
            config.root.clone(),
        )))
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Buckets are directories under the connection root; keys are relative paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    connection: Arc<StorageConnection>,
}

impl FsBlobStore {
    pub fn new(connection: Arc<StorageConnection>) -> Self {
        Self { connection }
    }

    fn object_path(
        &self,
        op: StorageOp,
        bucket: &str,
        key: &str,
    ) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::new(op, bucket, key, reason);
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(invalid("invalid bucket name"));
        }
        let key_path = Path::new(key);
        if key.is_empty()
            || key_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(invalid("key must be a relative path without '..'"));
        }
        Ok(self.connection.root().join(bucket).join(key_path))
    }
}

/// `model.json` stages as `model.json.partial`, so keys never share a staging file.
fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

impl BlobStore for FsBlobStore {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(StorageOp::Exists, bucket, key)?;
        path.try_exists()
            .map(|found| found && path.is_file())
            .map_err(|err| StorageError::new(StorageOp::Exists, bucket, key, err))
    }

    fn upload(
        &self,
        local: &Path,
        bucket: &str,
        key: &str,
        remove_local: bool,
    ) -> Result<(), StorageError> {
        let op = StorageOp::Upload;
        let fail = |err: std::io::Error| StorageError::new(op, bucket, key, err);
        let target = self.object_path(op, bucket, key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(fail)?;
        }

        let staging = staging_path(&target);
        let committed = fs::copy(local, &staging)
            .map_err(|err| {
                StorageError::new(op, bucket, key, format!("{} ({err})", local.display()))
            })
            .and_then(|_| fs::rename(&staging, &target).map_err(fail));
        if let Err(err) = committed {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        debug!(bucket, key, local = %local.display(), "Object committed");

        if remove_local {
            fs::remove_file(local).map_err(fail)?;
        }
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(StorageOp::Download, bucket, key)?;
        fs::read(&path).map_err(|err| StorageError::new(StorageOp::Download, bucket, key, err))
    }
}

/// Process-local store that counts operations.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), bytes);
        }
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn lock_error(op: StorageOp, bucket: &str, key: &str) -> StorageError {
        StorageError::new(op, bucket, key, "object map lock poisoned")
    }
}

impl BlobStore for InMemoryBlobStore {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| Self::lock_error(StorageOp::Exists, bucket, key))?;
        Ok(objects.contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn upload(
        &self,
        local: &Path,
        bucket: &str,
        key: &str,
        remove_local: bool,
    ) -> Result<(), StorageError> {
        let op = StorageOp::Upload;
        let bytes = fs::read(local).map_err(|err| {
            StorageError::new(op, bucket, key, format!("{} ({err})", local.display()))
        })?;
        self.objects
            .lock()
            .map_err(|_| Self::lock_error(op, bucket, key))?
            .insert((bucket.to_string(), key.to_string()), bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if remove_local {
            fs::remove_file(local).map_err(|err| StorageError::new(op, bucket, key, err))?;
        }
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let op = StorageOp::Download;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .map_err(|_| Self::lock_error(op, bucket, key))?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::new(op, bucket, key, "no such object"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(root: &Path) -> Arc<StorageConnection> {
        Arc::new(StorageConnection::new(
            Credentials::new("AKIA", "s3cr3t"),
            "us-east-1",
            root,
        ))
    }

    #[test]
    fn upload_then_download_from_fs_bucket() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(connection(&temp.path().join("blobs")));
        let local = temp.path().join("model.json");
        fs::write(&local, b"{}").unwrap();

        assert!(!store.exists("models", "prod/model.json").unwrap());
        store.upload(&local, "models", "prod/model.json", false).unwrap();
        assert!(store.exists("models", "prod/model.json").unwrap());
        assert_eq!(store.download("models", "prod/model.json").unwrap(), b"{}");
        assert!(local.exists());
    }

    #[test]
    fn remove_local_deletes_after_commit() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(connection(&temp.path().join("blobs")));
        let local = temp.path().join("model.json");
        fs::write(&local, b"payload").unwrap();

        store.upload(&local, "models", "model.json", true).unwrap();
        assert!(!local.exists());
        assert_eq!(store.download("models", "model.json").unwrap(), b"payload");
    }

    #[test]
    fn failed_upload_keeps_local_file() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(connection(&temp.path().join("blobs")));
        let local = temp.path().join("model.json");
        fs::write(&local, b"payload").unwrap();

        let err = store.upload(&local, "models", "../escape.json", true).unwrap_err();
        assert_eq!(err.operation, StorageOp::Upload);
        assert!(local.exists());
    }

    #[test]
    fn failed_commit_leaves_no_staging_file() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(connection(&temp.path().join("blobs")));
        let local = temp.path().join("model.json");
        fs::write(&local, b"payload").unwrap();
        // A non-empty directory at the object path cannot be replaced by rename.
        let target = temp.path().join("blobs/models/model.json");
        fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(store.upload(&local, "models", "model.json", true).is_err());
        assert!(!temp.path().join("blobs/models/model.json.partial").exists());
        assert!(local.exists());
    }

    #[test]
    fn staging_name_keeps_the_full_file_name() {
        assert_eq!(
            staging_path(Path::new("b/model.json")),
            PathBuf::from("b/model.json.partial")
        );
        assert_eq!(
            staging_path(Path::new("b/model")),
            PathBuf::from("b/model.partial")
        );
    }

    #[test]
    fn missing_object_error_has_context() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(connection(temp.path()));
        let err = store.download("models", "absent.json").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("download"));
        assert!(rendered.contains("models/absent.json"));
    }

    #[test]
    fn missing_credential_names_variable() {
        let config = StorageConfig::default();
        let err = StorageConnection::from_lookup(&config, |var| {
            (var == "AWS_ACCESS_KEY_ID").then(|| "AKIA".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential { ref var } if var == "AWS_SECRET_ACCESS_KEY"
        ));
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let conn = connection(Path::new("/tmp"));
        let rendered = format!("{conn:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("AKIA"));
    }
}
