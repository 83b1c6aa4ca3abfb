//! Batch driver tests: ordering, fail-fast, idempotence, resume, cleanup

use std::path::{Path, PathBuf};
use std::sync::Arc;

use s3sync_core::inventory::last_modified_secs;
use s3sync_core::ledger::{ledger_key, UploadStatus};
use s3sync_core::metrics::SyncMetrics;
use s3sync_core::split::{FileSplitter, Splitter};
use s3sync_core::storage::{object_key, part_key, StorageClass};
use s3sync_core::test_utils::{FlakyLedger, RecordingStore, ScriptedSplitter};
use s3sync_core::{BatchDriver, BatchReport, JsonLedger, Ledger, ShutdownSignal, SyncConfig, SyncError};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Config with a 4-byte object limit so tiny files exercise splitting
fn small_config(root: &Path) -> SyncConfig {
    SyncConfig {
        max_object_size: 4,
        piece_size: 4,
        ..SyncConfig::new(root)
    }
}

fn driver(store: &Arc<RecordingStore>, splitter: Arc<dyn Splitter>, root: &Path) -> BatchDriver {
    BatchDriver::new(
        store.clone(),
        splitter,
        &small_config(root),
        Arc::new(SyncMetrics::new()),
        ShutdownSignal::new(),
    )
}

/// Piece files left in the staging directory
fn staged_files(root: &Path) -> usize {
    let staging = small_config(root).staging_dir;
    WalkDir::new(staging)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();

    let report = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[], false)
        .await
        .unwrap();

    assert_eq!(report, BatchReport::default());
    assert!(store.attempted_keys().is_empty());
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_error() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.txt", b"aa");
    let b = write(dir.path(), "b.txt", b"bb");
    let c = write(dir.path(), "c.txt", b"cc");

    let store = Arc::new(RecordingStore::new());
    store.fail_on(&object_key(&b));
    let ledger = JsonLedger::in_memory();

    let err = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[a.clone(), b.clone(), c.clone()], false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::StorageError { .. }));
    assert_eq!(store.attempted_keys(), vec![object_key(&a), object_key(&b)]);
    assert_eq!(
        ledger.file_status(&ledger_key(&a)).unwrap().unwrap().upload_status,
        UploadStatus::Uploaded
    );
    assert_eq!(
        ledger.file_status(&ledger_key(&b)).unwrap().unwrap().upload_status,
        UploadStatus::Pending
    );
    assert!(ledger.file_status(&ledger_key(&c)).unwrap().is_none());
}

#[tokio::test]
async fn test_rerun_of_uploaded_units_makes_no_puts() {
    let dir = TempDir::new().unwrap();
    let small = write(dir.path(), "small.txt", b"abc");
    let big = write(dir.path(), "big.bin", &[5u8; 10]);
    let units = vec![small, big];

    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();
    let driver = driver(&store, Arc::new(FileSplitter::new()), dir.path());

    let first = driver.upload_all(&ledger, &units, false).await.unwrap();
    assert_eq!(first.files_uploaded, 1);
    assert_eq!(first.files_split, 1);
    assert_eq!(first.parts_uploaded, 3);
    let puts_after_first = store.attempted_keys().len();
    assert_eq!(puts_after_first, 4);

    let second = driver.upload_all(&ledger, &units, false).await.unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(store.attempted_keys().len(), puts_after_first);
}

#[tokio::test]
async fn test_split_file_uploads_parts_in_order() {
    let dir = TempDir::new().unwrap();
    let content: Vec<u8> = (0..10u8).collect();
    let big = write(dir.path(), "big.bin", &content);

    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();
    driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[big.clone()], true)
        .await
        .unwrap();

    let expected: Vec<String> = (0..3).map(|seq| part_key(&big, seq)).collect();
    assert_eq!(store.put_keys(), expected);

    let objects: Vec<Vec<u8>> = expected
        .iter()
        .map(|key| store.store().get(key).unwrap().data.to_vec())
        .collect();
    assert_eq!(objects, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    assert_eq!(store.store().get(&expected[0]).unwrap().class, StorageClass::DeepArchive);

    let transfer = ledger.latest_transfer(&ledger_key(&big)).unwrap().unwrap();
    let parts = ledger.parts(&transfer.transfer_id).unwrap();
    let sequences: Vec<u32> = parts.iter().map(|p| p.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(parts.iter().all(|p| p.is_uploaded()));

    assert!(parts.iter().all(|p| p.transfer_id == transfer.transfer_id));

    // Whole-file status is never created for split files
    assert!(ledger.file_status(&ledger_key(&big)).unwrap().is_none());

    assert_eq!(staged_files(dir.path()), 0);
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != ".s3sync")
        .collect();
    assert_eq!(names, vec!["big.bin".to_string()]);
}

#[tokio::test]
async fn test_resume_uploads_only_remaining_parts() {
    let dir = TempDir::new().unwrap();
    let big = write(dir.path(), "big.bin", &[9u8; 10]);
    let last_key = part_key(&big, 2);

    let store = Arc::new(RecordingStore::new());
    store.fail_on(&last_key);
    let ledger_path = dir.path().join(".s3sync").join("ledger.json");

    let first_transfer = {
        let ledger = JsonLedger::open(&ledger_path).unwrap();
        let err = driver(&store, Arc::new(FileSplitter::new()), dir.path())
            .upload_all(&ledger, &[big.clone()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StorageError { .. }));
        ledger.latest_transfer(&ledger_key(&big)).unwrap().unwrap()
    };

    // Pieces are gone even though the upload failed
    assert_eq!(staged_files(dir.path()), 0);

    store.heal(&last_key);
    let ledger = JsonLedger::open(&ledger_path).unwrap();
    let before = store.put_keys().len();
    let report = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[big.clone()], false)
        .await
        .unwrap();

    assert_eq!(report.parts_uploaded, 1);
    assert_eq!(store.put_keys()[before..].to_vec(), vec![last_key]);

    let transfer = ledger.latest_transfer(&ledger_key(&big)).unwrap().unwrap();
    assert_eq!(transfer.transfer_id, first_transfer.transfer_id);
    assert!(ledger.transfer_complete(&transfer.transfer_id).unwrap());
}

#[tokio::test]
async fn test_splitter_failure_aborts_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let big = write(dir.path(), "big.bin", &[1u8; 10]);
    let after = write(dir.path(), "after.txt", b"x");

    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();
    let err = driver(&store, Arc::new(ScriptedSplitter::failing_after(2, 4)), dir.path())
        .upload_all(&ledger, &[big.clone(), after], false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SplitFailed { .. }));
    assert!(store.attempted_keys().is_empty());
    assert_eq!(staged_files(dir.path()), 0);

    let transfer = ledger.latest_transfer(&ledger_key(&big)).unwrap().unwrap();
    let parts = ledger.parts(&transfer.transfer_id).unwrap();
    assert_eq!(parts.len(), 2);
    assert!(parts.iter().all(|p| !p.is_uploaded()));
}

#[tokio::test]
async fn test_shutdown_stops_batch() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.txt", b"a");

    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();
    let shutdown = ShutdownSignal::new();
    shutdown.shutdown();

    let driver = BatchDriver::new(
        store.clone(),
        Arc::new(FileSplitter::new()),
        &small_config(dir.path()),
        Arc::new(SyncMetrics::new()),
        shutdown,
    );
    let err = driver.upload_all(&ledger, &[a], false).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(store.attempted_keys().is_empty());
}

#[tokio::test]
async fn test_missing_unit_is_io_error() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();

    let err = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[dir.path().join("vanished.txt")], false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Io { .. }));
}

#[tokio::test]
async fn test_commit_failure_after_put_stops_batch() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.txt", b"aa");
    let b = write(dir.path(), "b.txt", b"bb");
    let c = write(dir.path(), "c.txt", b"cc");

    let store = Arc::new(RecordingStore::new());
    let ledger = FlakyLedger::new();
    ledger.fail_commit(&ledger_key(&b));

    let err = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[a.clone(), b.clone(), c.clone()], false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Ledger { .. }));
    // b reached the store but its status was never committed
    assert_eq!(store.put_keys(), vec![object_key(&a), object_key(&b)]);
    assert_eq!(
        ledger.file_status(&ledger_key(&b)).unwrap().unwrap().upload_status,
        UploadStatus::Pending
    );
    assert!(!store.attempted_keys().contains(&object_key(&c)));
    assert!(ledger.file_status(&ledger_key(&c)).unwrap().is_none());
}

#[tokio::test]
async fn test_part_commit_failure_stops_remaining_parts() {
    let dir = TempDir::new().unwrap();
    let big = write(dir.path(), "big.bin", &[4u8; 10]);
    let last_modified = last_modified_secs(&std::fs::metadata(&big).unwrap());

    // An open transfer for this version is reused, so its staging path is known
    let ledger = FlakyLedger::new();
    let transfer = ledger.create_transfer(&ledger_key(&big), last_modified, 4).unwrap();
    let first_piece = small_config(dir.path())
        .staging_dir
        .join(transfer.transfer_id.to_string())
        .join("part0000");
    ledger.fail_commit(&ledger_key(&first_piece));

    let store = Arc::new(RecordingStore::new());
    let err = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[big.clone()], false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Ledger { .. }));
    assert_eq!(store.attempted_keys(), vec![part_key(&big, 0)]);
    let parts = ledger.parts(&transfer.transfer_id).unwrap();
    assert_eq!(parts.len(), 3);
    assert!(parts.iter().all(|p| !p.is_uploaded()));
    assert_eq!(staged_files(dir.path()), 0);
}

#[tokio::test]
async fn test_files_named_like_parts_are_never_touched() {
    let dir = TempDir::new().unwrap();
    let big = write(dir.path(), "big.dat", &[6u8; 10]);
    let lookalike = write(dir.path(), "big.dat.part0000", b"precious user data");

    let config = small_config(dir.path());
    let inventory =
        s3sync_core::inventory::scan(dir.path(), &[], &config.scan_excludes()).unwrap();
    assert!(inventory.contains_key(&lookalike));

    let store = Arc::new(RecordingStore::new());
    let ledger = JsonLedger::in_memory();
    let err = driver(&store, Arc::new(FileSplitter::new()), dir.path())
        .upload_all(&ledger, &[big.clone(), lookalike.clone()], false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::KeyCollision { .. }));
    assert!(store.attempted_keys().is_empty());
    assert_eq!(std::fs::read(&lookalike).unwrap(), b"precious user data");
    assert_eq!(staged_files(dir.path()), 0);
}
