//! Startup reconciliation of abandoned transfers
//!
//! A crash between a part's PUT and its status commit leaves the part
//! pending although the object exists. Before a run, every pending part of
//! an unfinished transfer is checked against the store and marked uploaded
//! when the stored object has the recorded size and was written by that
//! same transfer. Part keys are shared by every version of a source file,
//! so an object left by an earlier transfer never counts.

use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::storage::ObjectStore;

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub transfers_checked: usize,
    /// Pending parts found in the store and marked uploaded
    pub parts_confirmed: usize,
    /// Pending parts still missing from the store
    pub parts_pending: usize,
}

/// Confirm pending parts that already exist in the store. Never deletes.
pub async fn reconcile(ledger: &dyn Ledger, store: &dyn ObjectStore) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for transfer in ledger.unfinished_transfers()? {
        report.transfers_checked += 1;
        let transfer_id = transfer.transfer_id.to_string();
        for part in ledger.parts(&transfer.transfer_id)? {
            if part.is_uploaded() {
                continue;
            }

            match store.head(&part.object_key).await? {
                Some(info)
                    if info.size == part.size_bytes
                        && info.transfer_id.as_deref() == Some(transfer_id.as_str()) =>
                {
                    debug!("Part {} found in store, marking uploaded", part.object_key);
                    ledger.mark_part_uploaded(&part.part_path)?;
                    report.parts_confirmed += 1;
                }
                Some(_) => {
                    debug!("Part {} in store belongs to another upload", part.object_key);
                    report.parts_pending += 1;
                }
                None => report.parts_pending += 1,
            }
        }
    }

    if report.transfers_checked > 0 {
        info!(
            "Reconciled {} unfinished transfers: {} parts confirmed, {} still pending",
            report.transfers_checked, report.parts_confirmed, report.parts_pending
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JsonLedger, PieceInfo};
    use crate::storage::{MemoryObjectStore, PutOptions, StorageClass};

    fn pieces() -> Vec<PieceInfo> {
        (0..3)
            .map(|seq| PieceInfo {
                path: format!(".s3sync/pieces/t/part{:04}", seq).into(),
                size_bytes: 4,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_confirms_existing_parts() {
        let ledger = JsonLedger::in_memory();
        let transfer = ledger.create_transfer("media/big.iso", 1, 4).unwrap();
        ledger.record_parts(&transfer.transfer_id, &pieces()).unwrap();
        let tagged = PutOptions::new(StorageClass::Standard).for_transfer(transfer.transfer_id.to_string());

        let store = MemoryObjectStore::new();
        store.insert("media/big.iso.part0000", vec![0u8; 4], tagged.clone());
        // Wrong size: not trusted
        store.insert("media/big.iso.part0001", vec![0u8; 3], tagged);

        let report = reconcile(&ledger, &store).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                transfers_checked: 1,
                parts_confirmed: 1,
                parts_pending: 2,
            }
        );

        let parts = ledger.parts(&transfer.transfer_id).unwrap();
        assert!(parts[0].is_uploaded());
        assert!(!parts[1].is_uploaded());
    }

    #[tokio::test]
    async fn test_objects_from_other_transfers_are_not_trusted() {
        let ledger = JsonLedger::in_memory();
        let old = ledger.create_transfer("media/big.iso", 1, 4).unwrap();
        let current = ledger.create_transfer("media/big.iso", 2, 4).unwrap();
        ledger.record_parts(&current.transfer_id, &pieces()).unwrap();

        let store = MemoryObjectStore::new();
        let stale = PutOptions::new(StorageClass::Standard).for_transfer(old.transfer_id.to_string());
        store.insert("media/big.iso.part0000", vec![0u8; 4], stale);
        store.insert("media/big.iso.part0001", vec![0u8; 4], PutOptions::default());

        let report = reconcile(&ledger, &store).await.unwrap();
        assert_eq!(report.parts_confirmed, 0);
        assert_eq!(report.parts_pending, 3);
        assert!(!ledger.transfer_complete(&current.transfer_id).unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_without_transfers_is_noop() {
        let ledger = JsonLedger::in_memory();
        let store = MemoryObjectStore::new();
        let report = reconcile(&ledger, &store).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }
}
