//! Split coordinator
//!
//! Runs a splitter on its own task, drains its event channel into an ordered
//! list of pieces, and records them in the ledger under one transfer.
//! Pieces of a transfer are staged in `<staging root>/<transfer id>/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::cleanup::PieceCleanup;
use super::splitter::{SplitEvent, SplitRequest, Splitter};
use crate::error::{Result, SyncError};
use crate::ledger::{ledger_key, Ledger, PartRecord, PieceInfo, TransferId, TransferRecord};
use crate::runtime::ShutdownSignal;

/// Capacity of the splitter event channel
pub const SPLIT_CHANNEL_CAPACITY: usize = 16;

/// Result of a successful split
///
/// Dropping it removes the piece files.
#[derive(Debug)]
pub struct SplitOutcome {
    pub transfer: TransferRecord,
    /// Recorded parts ordered by sequence
    pub parts: Vec<PartRecord>,
    pub cleanup: PieceCleanup,
}

/// Coordinates one splitter run per oversized file
pub struct SplitCoordinator {
    splitter: Arc<dyn Splitter>,
    piece_size: u64,
    staging_root: PathBuf,
}

impl SplitCoordinator {
    pub fn new(splitter: Arc<dyn Splitter>, piece_size: u64, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            splitter,
            piece_size,
            staging_root: staging_root.into(),
        }
    }

    pub fn piece_size(&self) -> u64 {
        self.piece_size
    }

    /// Directory holding the pieces of `transfer_id`
    pub fn staging_dir(&self, transfer_id: &TransferId) -> PathBuf {
        self.staging_root.join(transfer_id.to_string())
    }

    /// Split `source` and record its parts.
    ///
    /// An unfinished transfer for the same version of the source is reused,
    /// so parts already uploaded stay uploaded. On splitter failure the
    /// pieces that were produced are recorded as pending and removed from
    /// disk, and the splitter's error is returned.
    pub async fn split(
        &self,
        ledger: &dyn Ledger,
        source: &Path,
        last_modified: i64,
        shutdown: &ShutdownSignal,
    ) -> Result<SplitOutcome> {
        let source_key = ledger_key(source);
        let transfer = match ledger.find_open_transfer(&source_key, last_modified, self.piece_size)? {
            Some(transfer) => {
                info!("Resuming transfer {} for {}", transfer.transfer_id, source.display());
                transfer
            }
            None => ledger.create_transfer(&source_key, last_modified, self.piece_size)?,
        };

        let (tx, mut rx) = mpsc::channel(SPLIT_CHANNEL_CAPACITY);
        let splitter = self.splitter.clone();
        let staging_dir = self.staging_dir(&transfer.transfer_id);
        let request = SplitRequest {
            source: source.to_path_buf(),
            piece_size: self.piece_size,
            staging_dir: staging_dir.clone(),
        };
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move { splitter.split(request, tx, signal).await });

        let mut cleanup = PieceCleanup::new(staging_dir);
        let mut pieces: Vec<PieceInfo> = Vec::new();
        let terminal = loop {
            match rx.recv().await {
                Some(SplitEvent::Piece(piece)) => {
                    debug!(
                        "Piece {} of {} ready: {}",
                        pieces.len(),
                        source.display(),
                        piece.path.display()
                    );
                    cleanup.track(piece.path.clone());
                    pieces.push(piece);
                }
                Some(SplitEvent::Done(result)) => break result,
                None => {
                    break Err(SyncError::SplitterDisconnected {
                        path: source.to_path_buf(),
                    })
                }
            }
        };
        drop(rx);

        if let Err(e) = handle.await {
            warn!("Splitter task for {} did not finish cleanly: {}", source.display(), e);
        }

        match terminal {
            Ok(()) => {
                let parts = ledger.record_parts(&transfer.transfer_id, &pieces)?;
                info!(
                    "Split {} into {} parts (transfer {})",
                    source.display(),
                    cleanup.len(),
                    transfer.transfer_id
                );
                Ok(SplitOutcome {
                    transfer,
                    parts,
                    cleanup,
                })
            }
            Err(e) => {
                if !pieces.is_empty() {
                    if let Err(ledger_err) = ledger.record_parts(&transfer.transfer_id, &pieces) {
                        warn!(
                            "Failed to record {} partial pieces of {}: {}",
                            pieces.len(),
                            source.display(),
                            ledger_err
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JsonLedger, UploadStatus};
    use crate::split::{piece_path, FileSplitter};
    use crate::test_utils::ScriptedSplitter;
    use tempfile::TempDir;

    fn coordinator(splitter: Arc<dyn Splitter>, dir: &TempDir) -> SplitCoordinator {
        SplitCoordinator::new(splitter, 4, dir.path().join(".s3sync").join("pieces"))
    }

    #[tokio::test]
    async fn test_split_records_parts_in_order() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.bin");
        std::fs::write(&source, vec![3u8; 10]).unwrap();

        let ledger = JsonLedger::in_memory();
        let coordinator = coordinator(Arc::new(FileSplitter::new()), &dir);
        let outcome = coordinator
            .split(&ledger, &source, 55, &ShutdownSignal::new())
            .await
            .unwrap();

        let sequences: Vec<u32> = outcome.parts.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(outcome.parts.iter().all(|p| p.upload_status == UploadStatus::Pending));
        assert_eq!(outcome.parts[1].object_key, format!("{}.part0001", crate::storage::object_key(&source)));
        assert_eq!(outcome.transfer.last_modified, 55);

        let staging = coordinator.staging_dir(&outcome.transfer.transfer_id);
        assert!(piece_path(&staging, 2).exists());

        drop(outcome);
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_failure_keeps_pending_records_and_removes_pieces() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.bin");
        std::fs::write(&source, vec![3u8; 10]).unwrap();

        let ledger = JsonLedger::in_memory();
        let coordinator = coordinator(Arc::new(ScriptedSplitter::failing_after(1, 4)), &dir);
        let err = coordinator
            .split(&ledger, &source, 1, &ShutdownSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::SplitFailed { .. }));

        let transfer = ledger.latest_transfer(&ledger_key(&source)).unwrap().unwrap();
        assert!(!coordinator.staging_dir(&transfer.transfer_id).exists());
        let parts = ledger.parts(&transfer.transfer_id).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].upload_status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_disconnected_splitter() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.bin");
        std::fs::write(&source, vec![3u8; 10]).unwrap();

        let ledger = JsonLedger::in_memory();
        let coordinator = coordinator(Arc::new(ScriptedSplitter::silent()), &dir);
        let err = coordinator
            .split(&ledger, &source, 1, &ShutdownSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::SplitterDisconnected { .. }));
    }

    #[tokio::test]
    async fn test_resplit_reuses_open_transfer() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.bin");
        std::fs::write(&source, vec![3u8; 10]).unwrap();

        let ledger = JsonLedger::in_memory();
        let coordinator = coordinator(Arc::new(FileSplitter::new()), &dir);
        let shutdown = ShutdownSignal::new();

        let first = coordinator.split(&ledger, &source, 9, &shutdown).await.unwrap();
        ledger.mark_part_uploaded(&first.parts[0].part_path).unwrap();
        let first_id = first.transfer.transfer_id;
        drop(first);

        let second = coordinator.split(&ledger, &source, 9, &shutdown).await.unwrap();
        assert_eq!(second.transfer.transfer_id, first_id);
        assert!(second.parts[0].is_uploaded());
        assert!(!second.parts[1].is_uploaded());
    }
}
