//! File-backed ledger
//!
//! The whole ledger is one JSON document. Every mutation is applied to a
//! copy, written to a temporary file, synced, and renamed over the previous
//! document, so a crash leaves either the old or the new state on disk.
//!
//! Commits are blocking filesystem calls made from async callers while the
//! state lock is held. Uploads are strictly sequential, so the lock is never
//! contended, and a commit costs one small write and fsync next to a PUT of
//! up to 4 GiB.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::records::{
    FileStatusRecord, PartRecord, PieceInfo, TransferId, TransferRecord, UploadStatus,
};
use super::{ledger_key, Ledger};
use crate::error::{Result, SyncError};
use crate::storage::part_key;

/// On-disk ledger document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    version: u32,
    files: BTreeMap<String, FileStatusRecord>,
    /// Keyed by transfer id string
    transfers: BTreeMap<String, TransferEntry>,
    /// Source path -> transfer ids, oldest first
    transfers_by_source: BTreeMap<String, Vec<TransferId>>,
    /// Part path -> owning transfer and sequence (latest recording wins)
    part_index: BTreeMap<String, PartLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransferEntry {
    record: TransferRecord,
    parts: Vec<PartRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PartLocation {
    transfer_id: TransferId,
    sequence: u32,
}

impl LedgerState {
    fn entry_mut(&mut self, transfer_id: &TransferId) -> Result<&mut TransferEntry> {
        self.transfers
            .get_mut(&transfer_id.to_string())
            .ok_or_else(|| SyncError::UnknownTransfer {
                transfer_id: transfer_id.to_string(),
            })
    }

    fn is_finished(entry: &TransferEntry) -> bool {
        !entry.parts.is_empty() && entry.parts.iter().all(PartRecord::is_uploaded)
    }
}

/// Ledger persisted as a JSON document
pub struct JsonLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl JsonLedger {
    /// Current document version
    pub const CURRENT_VERSION: u32 = 1;

    /// Open the ledger at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let json = std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
            Self::parse(&json)?
        } else {
            LedgerState {
                version: Self::CURRENT_VERSION,
                ..Default::default()
            }
        };

        debug!(
            "Opened ledger {} ({} files, {} transfers)",
            path.display(),
            state.files.len(),
            state.transfers.len()
        );

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Ledger that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState {
                version: Self::CURRENT_VERSION,
                ..Default::default()
            }),
        }
    }

    /// Location of the backing document, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn parse(json: &str) -> Result<LedgerState> {
        let state: LedgerState = serde_json::from_str(json).map_err(|e| SyncError::Ledger {
            reason: format!("Deserialization failed: {}", e),
        })?;

        if state.version > Self::CURRENT_VERSION {
            return Err(SyncError::Ledger {
                reason: format!(
                    "Ledger version {} is newer than supported {}",
                    state.version,
                    Self::CURRENT_VERSION
                ),
            });
        }

        Ok(state)
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(state).map_err(|e| SyncError::Ledger {
            reason: format!("Serialization failed: {}", e),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let tmp = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| SyncError::io(&tmp, e))?;
        file.write_all(&json).map_err(|e| SyncError::io(&tmp, e))?;
        file.sync_all().map_err(|e| SyncError::io(&tmp, e))?;
        drop(file);

        std::fs::rename(&tmp, path).map_err(|e| SyncError::io(path, e))?;
        Ok(())
    }

    /// Apply `f` to a copy of the state and make it current only once it is on disk
    fn commit<T>(&self, f: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }
}

impl Ledger for JsonLedger {
    fn upsert_file_status(
        &self,
        path: &str,
        last_modified: i64,
        status: UploadStatus,
    ) -> Result<FileStatusRecord> {
        self.commit(|state| {
            let record = match state.files.get(path) {
                Some(existing) if existing.is_current(last_modified) => existing.clone(),
                _ => FileStatusRecord {
                    path: path.to_string(),
                    last_modified,
                    upload_status: status,
                },
            };
            state.files.insert(path.to_string(), record.clone());
            Ok(record)
        })
    }

    fn file_status(&self, path: &str) -> Result<Option<FileStatusRecord>> {
        Ok(self.state.lock().files.get(path).cloned())
    }

    fn mark_file_uploaded(&self, path: &str) -> Result<()> {
        self.commit(|state| {
            let record = state
                .files
                .get_mut(path)
                .ok_or_else(|| SyncError::UnknownFile { path: path.into() })?;
            record.upload_status = UploadStatus::Uploaded;
            Ok(())
        })
    }

    fn create_transfer(
        &self,
        source_path: &str,
        last_modified: i64,
        piece_size: u64,
    ) -> Result<TransferRecord> {
        self.commit(|state| {
            let record = TransferRecord::new(source_path.to_string(), last_modified, piece_size);
            state.transfers.insert(
                record.transfer_id.to_string(),
                TransferEntry {
                    record: record.clone(),
                    parts: Vec::new(),
                },
            );
            state
                .transfers_by_source
                .entry(source_path.to_string())
                .or_default()
                .push(record.transfer_id);
            Ok(record)
        })
    }

    fn latest_transfer(&self, source_path: &str) -> Result<Option<TransferRecord>> {
        let state = self.state.lock();
        Ok(state
            .transfers_by_source
            .get(source_path)
            .and_then(|ids| ids.last())
            .and_then(|id| state.transfers.get(&id.to_string()))
            .map(|entry| entry.record.clone()))
    }

    fn record_parts(
        &self,
        transfer_id: &TransferId,
        pieces: &[PieceInfo],
    ) -> Result<Vec<PartRecord>> {
        self.commit(|state| {
            let entry = state.entry_mut(transfer_id)?;
            let source = PathBuf::from(&entry.record.source_path);
            let mut recorded = Vec::with_capacity(pieces.len());

            for (sequence, piece) in pieces.iter().enumerate() {
                let sequence = sequence as u32;
                let part_path = ledger_key(&piece.path);
                let object_key = part_key(&source, sequence);
                let keep_uploaded = entry.parts.iter().any(|p| {
                    p.sequence == sequence
                        && p.part_path == part_path
                        && p.object_key == object_key
                        && p.size_bytes == piece.size_bytes
                        && p.is_uploaded()
                });
                let part = PartRecord {
                    transfer_id: *transfer_id,
                    part_path,
                    object_key,
                    sequence,
                    size_bytes: piece.size_bytes,
                    upload_status: if keep_uploaded {
                        UploadStatus::Uploaded
                    } else {
                        UploadStatus::Pending
                    },
                };

                match entry.parts.iter_mut().find(|p| p.sequence == sequence) {
                    Some(slot) => *slot = part.clone(),
                    None => entry.parts.push(part.clone()),
                }
                recorded.push(part);
            }
            entry.parts.sort_by_key(|p| p.sequence);

            for part in &recorded {
                state.part_index.insert(
                    part.part_path.clone(),
                    PartLocation {
                        transfer_id: *transfer_id,
                        sequence: part.sequence,
                    },
                );
            }

            Ok(recorded)
        })
    }

    fn parts(&self, transfer_id: &TransferId) -> Result<Vec<PartRecord>> {
        let state = self.state.lock();
        state
            .transfers
            .get(&transfer_id.to_string())
            .map(|entry| entry.parts.clone())
            .ok_or_else(|| SyncError::UnknownTransfer {
                transfer_id: transfer_id.to_string(),
            })
    }

    fn mark_part_uploaded(&self, part_path: &str) -> Result<()> {
        self.commit(|state| {
            let location = state
                .part_index
                .get(part_path)
                .cloned()
                .ok_or_else(|| SyncError::UnknownPart {
                    part_path: part_path.into(),
                })?;
            let entry = state.entry_mut(&location.transfer_id)?;
            let part = entry
                .parts
                .iter_mut()
                .find(|p| p.sequence == location.sequence)
                .ok_or_else(|| SyncError::UnknownPart {
                    part_path: part_path.into(),
                })?;
            part.upload_status = UploadStatus::Uploaded;
            Ok(())
        })
    }

    fn unfinished_transfers(&self) -> Result<Vec<TransferRecord>> {
        let state = self.state.lock();
        Ok(state
            .transfers_by_source
            .values()
            .filter_map(|ids| ids.last())
            .filter_map(|id| state.transfers.get(&id.to_string()))
            .filter(|entry| !entry.parts.is_empty() && !LedgerState::is_finished(entry))
            .map(|entry| entry.record.clone())
            .collect())
    }
}
