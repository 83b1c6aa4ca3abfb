//! Upload ledger
//!
//! Durable record of which files and parts are already in the object store.
//! Every component that reads or writes status takes the ledger as an
//! explicit `&dyn Ledger` argument.

pub mod json;
pub mod records;

pub use json::JsonLedger;
pub use records::{
    FileStatusRecord, FileUnit, PartRecord, PieceInfo, TransferId, TransferRecord, UploadStatus,
};

use std::path::Path;

use crate::error::Result;

/// Persistent store of file and part upload status
pub trait Ledger: Send + Sync {
    /// Create or refresh the status of a whole file.
    ///
    /// A record that is already `Uploaded` for the same `last_modified`
    /// never reverts to `Pending`.
    fn upsert_file_status(
        &self,
        path: &str,
        last_modified: i64,
        status: UploadStatus,
    ) -> Result<FileStatusRecord>;

    /// Point lookup of a whole file's status
    fn file_status(&self, path: &str) -> Result<Option<FileStatusRecord>>;

    /// Mark a whole file uploaded. Fails if the file has no record.
    fn mark_file_uploaded(&self, path: &str) -> Result<()>;

    /// Allocate a new transfer for a source file
    fn create_transfer(
        &self,
        source_path: &str,
        last_modified: i64,
        piece_size: u64,
    ) -> Result<TransferRecord>;

    /// Most recently created transfer for a source file
    fn latest_transfer(&self, source_path: &str) -> Result<Option<TransferRecord>>;

    /// Record pieces of a transfer. Sequences are assigned in slice order
    /// starting at 0; a part already `Uploaded` under the same sequence and
    /// path keeps its status.
    fn record_parts(&self, transfer_id: &TransferId, pieces: &[PieceInfo])
        -> Result<Vec<PartRecord>>;

    /// All parts of a transfer ordered by sequence
    fn parts(&self, transfer_id: &TransferId) -> Result<Vec<PartRecord>>;

    /// Mark the part recorded under this path uploaded
    fn mark_part_uploaded(&self, part_path: &str) -> Result<()>;

    /// Latest transfer of each source that still has pending parts
    fn unfinished_transfers(&self) -> Result<Vec<TransferRecord>>;

    /// True once every recorded part of the transfer is uploaded
    fn transfer_complete(&self, transfer_id: &TransferId) -> Result<bool> {
        let parts = self.parts(transfer_id)?;
        Ok(!parts.is_empty() && parts.iter().all(PartRecord::is_uploaded))
    }

    /// Unfinished transfer for this exact version of the source, if any
    fn find_open_transfer(
        &self,
        source_path: &str,
        last_modified: i64,
        piece_size: u64,
    ) -> Result<Option<TransferRecord>> {
        let Some(transfer) = self.latest_transfer(source_path)? else {
            return Ok(None);
        };
        if !transfer.matches(last_modified, piece_size)
            || self.transfer_complete(&transfer.transfer_id)?
        {
            return Ok(None);
        }
        Ok(Some(transfer))
    }
}

/// Key a local path is stored under in the ledger
pub fn ledger_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
