mod common;

use std::sync::Arc;

use model_forge::dataset::Table;
use model_forge::storage::Credentials;
use model_forge::{
    BlobStore, FsBlobStore, InMemoryBlobStore, ModelPublisher, PipelineError, StorageConnection,
    TrainingPipeline,
};

fn trained_store() -> (tempfile::TempDir, Arc<InMemoryBlobStore>, Table) {
    let (temp, config) = common::project(common::SCHEMA);
    let store = Arc::new(InMemoryBlobStore::new());
    let report = TrainingPipeline::new(config, store.clone())
        .unwrap()
        .run()
        .unwrap();
    let test = report.ingestion.test.load().unwrap();
    (temp, store, test)
}

#[test]
fn predict_downloads_once_per_publisher() {
    let (_temp, store, test) = trained_store();
    let before = store.download_count();
    let publisher = ModelPublisher::new(store.clone(), "models", "forge/model.json");

    let first = publisher.predict(&test).unwrap();
    let second = publisher.predict(&test).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), test.row_count());
    assert_eq!(store.download_count() - before, 1);

    let fresh = ModelPublisher::new(store.clone(), "models", "forge/model.json");
    assert_eq!(fresh.predict(&test).unwrap(), first);
    assert_eq!(store.download_count() - before, 2);
}

#[test]
fn cached_model_survives_remote_replacement() {
    let (_temp, store, test) = trained_store();
    let publisher = ModelPublisher::new(store.clone(), "models", "forge/model.json");
    let expected = publisher.predict(&test).unwrap();

    store.put("models", "forge/model.json", b"garbage".to_vec());

    assert_eq!(publisher.predict(&test).unwrap(), expected);
    assert!(publisher.load_model().is_err(), "uncached load sees the new object");
}

#[test]
fn predict_ignores_missing_target_column() {
    let (_temp, store, test) = trained_store();
    let target = test.column_index("Response").unwrap();
    let unlabeled = Table::new(
        test.columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != target)
            .map(|(_, name)| name.clone())
            .collect(),
        test.rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != target)
                    .map(|(_, cell)| cell.clone())
                    .collect()
            })
            .collect(),
    );
    let publisher = ModelPublisher::new(store, "models", "forge/model.json");
    assert_eq!(
        publisher.predict(&unlabeled).unwrap(),
        publisher.predict(&test).unwrap()
    );
}

#[test]
fn publisher_is_bound_to_one_location() {
    let temp = tempfile::tempdir().unwrap();
    let connection = Arc::new(StorageConnection::new(
        Credentials::new("AKIA", "secret"),
        "us-east-1",
        temp.path().join("blobs"),
    ));
    let store = Arc::new(FsBlobStore::new(connection));
    let local = temp.path().join("model.json");
    std::fs::write(&local, b"{}").unwrap();

    let publisher = ModelPublisher::new(store.clone(), "prod", "v1/model.json");
    assert!(!publisher.is_model_present().unwrap());
    let location = publisher.publish(&local).unwrap();

    assert_eq!(location.bucket, "prod");
    assert_eq!(location.key, "v1/model.json");
    assert!(publisher.is_model_present().unwrap());
    assert!(temp.path().join("blobs/prod/v1/model.json").is_file());
    assert!(local.is_file());
    assert!(!store.exists("prod", "model.json").unwrap());

    let elsewhere = temp.path().join("retrained/model-v2.json");
    std::fs::create_dir_all(elsewhere.parent().unwrap()).unwrap();
    std::fs::write(&elsewhere, b"{\"version\":2}").unwrap();
    let second = publisher.publish(&elsewhere).unwrap();

    assert_eq!(second, location);
    assert_eq!(
        store.download("prod", "v1/model.json").unwrap(),
        b"{\"version\":2}"
    );
}

#[test]
fn missing_remote_model_is_a_storage_error() {
    let publisher = ModelPublisher::new(Arc::new(InMemoryBlobStore::new()), "b", "k");
    let err = publisher.predict(&Table::default()).unwrap_err();
    let PipelineError::Storage(storage) = err else {
        panic!("expected storage error");
    };
    assert_eq!(storage.bucket, "b");
    assert_eq!(storage.key, "k");
}

#[test]
fn ragged_rows_are_rejected_instead_of_indexed() {
    let (_temp, store, test) = trained_store();
    let publisher = ModelPublisher::new(store, "models", "forge/model.json");
    let ragged = Table::new(test.columns.clone(), vec![vec!["1".into()]]);

    let err = publisher.predict(&ragged).unwrap_err();

    let PipelineError::Dataset { reason, .. } = err else {
        panic!("expected dataset error");
    };
    assert!(reason.contains("row 1 has 1 field(s)"), "{reason}");
}
