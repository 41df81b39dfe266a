//! Experiment Schema Tests
//!
//! Persisted layout, store durability across reopen, and the append-only
//! checkpoint history.

use trueno_train::data::Phase;
use trueno_train::experiment::{
    content_ref, BlobRef, BlobStore, CheckpointEntry, ExperimentRecord, ExperimentStatus,
    ExperimentStore, FsBlobStore, FsExperimentStore, MemoryExperimentStore, RecordMetadata,
};
use trueno_train::result::TrainingResult;

// =============================================================================
// ExperimentRecord Tests
// =============================================================================

#[test]
fn test_experiment_record_creation() {
    let record = ExperimentRecord::new("accident-v1");

    assert_eq!(record.name(), "accident-v1");
    assert!(record.id().is_none());
    assert!(record.created_at().timestamp() > 0);
    assert_eq!(record.status(), ExperimentStatus::Created);
    assert!(record.architecture().is_null());
    assert!(record.metrics().is_empty());
}

#[test]
fn test_persisted_layout_has_every_field() {
    let record = ExperimentRecord::builder("accident-v1")
        .architecture(serde_json::json!({"layers": 3}))
        .log_location("logs/accident-v1.log")
        .build()
        .with_id("exp-000001");

    let json = serde_json::to_value(&record).expect("serialization failed");
    for field in [
        "id",
        "name",
        "architecture",
        "status",
        "log_location",
        "current_epoch",
        "current_batch",
        "max_batches_per_epoch",
        "max_epochs",
        "metrics",
        "checkpoints",
    ] {
        assert!(json.get(field).is_some(), "missing field {field}");
    }
    assert_eq!(json["metrics"]["validation"], serde_json::json!([]));
}

#[test]
fn test_status_serialization() {
    let statuses = [
        (ExperimentStatus::Created, "\"created\""),
        (ExperimentStatus::Training, "\"training\""),
        (ExperimentStatus::TrainingComplete, "\"training_complete\""),
        (ExperimentStatus::Testing, "\"testing\""),
        (ExperimentStatus::TestComplete, "\"test_complete\""),
    ];
    for (status, expected) in statuses {
        assert_eq!(serde_json::to_string(&status).unwrap(), expected);
    }
}

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_metadata_is_last_write_wins() {
    let store = MemoryExperimentStore::new();
    let id = store.create(&ExperimentRecord::new("run")).unwrap();

    let mut result = TrainingResult::new();
    for batch in 0..5 {
        result.update_snapshot(Some(0), Some(batch));
        let meta = RecordMetadata::from_result(ExperimentStatus::Training, None, &result);
        store.update_metadata(&id, &meta).unwrap();
    }

    let record = store.load(&id).unwrap().unwrap();
    assert_eq!(record.metadata().current_batch, 4);
    assert!(record.updated_at() >= record.created_at());
}

#[test]
fn test_metrics_are_replaced_not_merged() {
    let store = MemoryExperimentStore::new();
    let id = store.create(&ExperimentRecord::new("run")).unwrap();

    let mut result = TrainingResult::new();
    result.append_metric("loss", 0.9, Phase::Train, Some(0), Some(0));
    store.replace_metrics(&id, result.ledger()).unwrap();
    result.append_metric("loss", 0.8, Phase::Train, Some(0), Some(1));
    store.replace_metrics(&id, result.ledger()).unwrap();

    let record = store.load(&id).unwrap().unwrap();
    assert_eq!(record.metrics().series(Phase::Train, "loss"), vec![0.9, 0.8]);
}

#[test]
fn test_checkpoint_history_never_shrinks() {
    let store = MemoryExperimentStore::new();
    let id = store.create(&ExperimentRecord::new("run")).unwrap();

    let mut previous = 0;
    for epoch in 0..5 {
        let entry = CheckpointEntry::new(BlobRef::new(format!("blob-{epoch}")), epoch, 1);
        store.append_checkpoint(&id, &entry).unwrap();
        let len = store.load(&id).unwrap().unwrap().checkpoints().len();
        assert_eq!(len, previous + 1);
        previous = len;
    }
}

#[test]
fn test_fs_stores_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot = vec![7u8; 256];

    let (id, blob_ref) = {
        let experiments = FsExperimentStore::open(dir.path().join("experiments")).unwrap();
        let blobs = FsBlobStore::open(dir.path().join("blobs")).unwrap();
        let id = experiments.create(&ExperimentRecord::new("durable")).unwrap();
        let blob_ref = blobs.put(&snapshot).unwrap();
        experiments
            .append_checkpoint(&id, &CheckpointEntry::new(blob_ref.clone(), 0, 3))
            .unwrap();
        (id, blob_ref)
    };

    let experiments = FsExperimentStore::open(dir.path().join("experiments")).unwrap();
    let blobs = FsBlobStore::open(dir.path().join("blobs")).unwrap();
    let record = experiments.load(&id).unwrap().unwrap();
    assert_eq!(record.name(), "durable");
    assert_eq!(record.checkpoints()[0].blob_ref(), &blob_ref);
    assert_eq!(blobs.get(&blob_ref).unwrap(), Some(snapshot.clone()));
    assert_eq!(blob_ref, content_ref(&snapshot));
}

#[cfg(feature = "compression")]
#[test]
fn test_compressed_fs_blobs() {
    use trueno_train::experiment::{CompressedBlobStore, Compression};

    let dir = tempfile::tempdir().expect("tempdir");
    let store = CompressedBlobStore::new(FsBlobStore::open(dir.path()).unwrap(), Compression::Zstd);
    let snapshot = vec![0u8; 64 * 1024];
    let blob_ref = store.put(&snapshot).unwrap();

    assert_eq!(store.get(&blob_ref).unwrap(), Some(snapshot));
    let on_disk = store.inner().get(&blob_ref).unwrap().unwrap();
    assert!(on_disk.len() < 1024);
}
