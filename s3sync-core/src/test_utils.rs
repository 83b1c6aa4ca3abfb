//! Test doubles for the object store, splitter and ledger seams

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::ledger::{
    FileStatusRecord, JsonLedger, Ledger, PartRecord, PieceInfo, TransferId, TransferRecord,
    UploadStatus,
};
use crate::runtime::ShutdownSignal;
use crate::split::{piece_path, SplitEvent, SplitRequest, Splitter};
use crate::storage::{MemoryObjectStore, ObjectBody, ObjectInfo, ObjectStore, PutOptions};

/// Memory store that records every PUT attempt and fails chosen keys
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryObjectStore,
    attempts: Mutex<Vec<String>>,
    puts: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every PUT of `key` fail with a transport error
    pub fn fail_on(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    /// Let PUTs of `key` succeed again
    pub fn heal(&self, key: &str) {
        self.failing.lock().remove(key);
    }

    /// Keys of successful PUTs, in order
    pub fn put_keys(&self) -> Vec<String> {
        self.puts.lock().clone()
    }

    /// Keys of every PUT attempt, in order
    pub fn attempted_keys(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }

    pub fn store(&self) -> &MemoryObjectStore {
        &self.inner
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put(&self, key: &str, body: ObjectBody, options: &PutOptions) -> Result<()> {
        self.attempts.lock().push(key.to_string());
        let failing = self.failing.lock().contains(key);
        if failing {
            return Err(SyncError::StorageError {
                message: format!("Put object failed for {}: status 503 Service Unavailable", key),
            });
        }
        self.inner.put(key, body, options).await?;
        self.puts.lock().push(key.to_string());
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        self.inner.head(key).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Script {
    /// Write `pieces` real pieces, then report failure
    FailAfter { pieces: u32, piece_size: u64 },
    /// Drop the channel without a terminal value
    Silent,
}

/// Splitter with scripted misbehaviour
#[derive(Debug, Clone)]
pub struct ScriptedSplitter {
    script: Script,
}

impl ScriptedSplitter {
    pub fn failing_after(pieces: u32, piece_size: u64) -> Self {
        Self {
            script: Script::FailAfter { pieces, piece_size },
        }
    }

    pub fn silent() -> Self {
        Self {
            script: Script::Silent,
        }
    }
}

#[async_trait]
impl Splitter for ScriptedSplitter {
    async fn split(
        &self,
        request: SplitRequest,
        events: mpsc::Sender<SplitEvent>,
        _shutdown: ShutdownSignal,
    ) {
        let Script::FailAfter { pieces, piece_size } = self.script else {
            return;
        };

        let data = match std::fs::read(&request.source) {
            Ok(data) => data,
            Err(e) => {
                let _ = events
                    .send(SplitEvent::Done(Err(SyncError::io(&request.source, e))))
                    .await;
                return;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&request.staging_dir) {
            let _ = events
                .send(SplitEvent::Done(Err(SyncError::io(&request.staging_dir, e))))
                .await;
            return;
        }

        for (sequence, chunk) in data
            .chunks(piece_size as usize)
            .take(pieces as usize)
            .enumerate()
        {
            let path = piece_path(&request.staging_dir, sequence as u32);
            if let Err(e) = std::fs::write(&path, chunk) {
                let _ = events.send(SplitEvent::Done(Err(SyncError::io(&path, e)))).await;
                return;
            }
            let piece = PieceInfo {
                path,
                size_bytes: chunk.len() as u64,
            };
            let _ = events.send(SplitEvent::Piece(piece)).await;
        }

        let _ = events
            .send(SplitEvent::Done(Err(SyncError::SplitFailed {
                path: request.source.clone(),
                reason: "No space left on device".into(),
            })))
            .await;
    }
}

/// Ledger whose status commits fail for chosen paths
///
/// Reads and all other writes go to an in-memory [`JsonLedger`].
pub struct FlakyLedger {
    inner: JsonLedger,
    failing: Mutex<HashSet<String>>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self {
            inner: JsonLedger::in_memory(),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make marking `path` (a file or part path) uploaded fail
    pub fn fail_commit(&self, path: &str) {
        self.failing.lock().insert(path.to_string());
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.failing.lock().contains(path) {
            return Err(SyncError::Ledger {
                reason: format!("No space left on device while committing {}", path),
            });
        }
        Ok(())
    }
}

impl Default for FlakyLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for FlakyLedger {
    fn upsert_file_status(
        &self,
        path: &str,
        last_modified: i64,
        status: UploadStatus,
    ) -> Result<FileStatusRecord> {
        self.inner.upsert_file_status(path, last_modified, status)
    }

    fn file_status(&self, path: &str) -> Result<Option<FileStatusRecord>> {
        self.inner.file_status(path)
    }

    fn mark_file_uploaded(&self, path: &str) -> Result<()> {
        self.check(path)?;
        self.inner.mark_file_uploaded(path)
    }

    fn create_transfer(
        &self,
        source_path: &str,
        last_modified: i64,
        piece_size: u64,
    ) -> Result<TransferRecord> {
        self.inner.create_transfer(source_path, last_modified, piece_size)
    }

    fn latest_transfer(&self, source_path: &str) -> Result<Option<TransferRecord>> {
        self.inner.latest_transfer(source_path)
    }

    fn record_parts(&self, transfer_id: &TransferId, pieces: &[PieceInfo])
        -> Result<Vec<PartRecord>> {
        self.inner.record_parts(transfer_id, pieces)
    }

    fn parts(&self, transfer_id: &TransferId) -> Result<Vec<PartRecord>> {
        self.inner.parts(transfer_id)
    }

    fn mark_part_uploaded(&self, part_path: &str) -> Result<()> {
        self.check(part_path)?;
        self.inner.mark_part_uploaded(part_path)
    }

    fn unfinished_transfers(&self) -> Result<Vec<TransferRecord>> {
        self.inner.unfinished_transfers()
    }
}
