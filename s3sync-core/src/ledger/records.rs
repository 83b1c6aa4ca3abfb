//! Ledger record types
//!
//! One `FileStatusRecord` per whole file, one `TransferRecord` per split
//! attempt, and one `PartRecord` per piece of a transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::storage::object_key;

/// Upload state of a file or part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Pending,
    Uploaded,
}

/// Identifier of one split operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Allocate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A path scheduled for upload, either a whole source file or a piece
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUnit {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Key the unit is stored under
    pub object_key: String,
    /// Owning transfer when the unit is a part
    pub transfer_id: Option<TransferId>,
}

impl FileUnit {
    pub fn whole(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        Self {
            object_key: object_key(&path),
            path,
            size_bytes,
            transfer_id: None,
        }
    }

    /// The staged piece of a recorded part
    pub fn part(part: &PartRecord) -> Self {
        Self {
            path: PathBuf::from(&part.part_path),
            size_bytes: part.size_bytes,
            object_key: part.object_key.clone(),
            transfer_id: Some(part.transfer_id),
        }
    }

    pub fn is_part(&self) -> bool {
        self.transfer_id.is_some()
    }
}

/// Created once per oversized source file and split attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub source_path: String,
    /// Fingerprint of the source when it was split (Unix seconds)
    pub last_modified: i64,
    /// Piece size the source was split with
    pub piece_size: u64,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(source_path: String, last_modified: i64, piece_size: u64) -> Self {
        Self {
            transfer_id: TransferId::new(),
            source_path,
            last_modified,
            piece_size,
            created_at: Utc::now(),
        }
    }

    /// True if this transfer was split from the same version of the source
    pub fn matches(&self, last_modified: i64, piece_size: u64) -> bool {
        self.last_modified == last_modified && self.piece_size == piece_size
    }
}

/// One piece of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub transfer_id: TransferId,
    /// Staged piece file
    pub part_path: String,
    /// Key derived from the source path and sequence, stable across transfers
    pub object_key: String,
    /// Emission order within the transfer, starting at 0
    pub sequence: u32,
    pub size_bytes: u64,
    pub upload_status: UploadStatus,
}

impl PartRecord {
    pub fn is_uploaded(&self) -> bool {
        self.upload_status == UploadStatus::Uploaded
    }
}

/// Status of a whole (non-split) source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusRecord {
    pub path: String,
    /// Change-detection fingerprint (Unix seconds)
    pub last_modified: i64,
    pub upload_status: UploadStatus,
}

impl FileStatusRecord {
    /// True if this exact version of the file is already in the store
    pub fn is_current(&self, last_modified: i64) -> bool {
        self.last_modified == last_modified && self.upload_status == UploadStatus::Uploaded
    }
}

/// A piece reported by the splitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
}
