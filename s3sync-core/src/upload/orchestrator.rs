//! Upload orchestrator
//!
//! Uploads one unit at a time and commits its ledger status only after the
//! object store has accepted it.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::ledger::{ledger_key, FileUnit, Ledger, PartRecord};
use crate::metrics::SyncMetrics;
use crate::runtime::ShutdownSignal;
use crate::storage::{ObjectBody, ObjectStore, PutOptions, StorageClass};

/// Sequential uploader for whole files and parts
pub struct UploadOrchestrator {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<SyncMetrics>,
    shutdown: ShutdownSignal,
}

impl UploadOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Arc<SyncMetrics>, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            metrics,
            shutdown,
        }
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Upload `unit` and mark it uploaded.
    ///
    /// Returns the first error from open, PUT, or the status commit. A
    /// shutdown request abandons an in-flight PUT without committing. The
    /// local file is left in place.
    pub async fn upload_unit(&self, ledger: &dyn Ledger, unit: &FileUnit, deep: bool) -> Result<()> {
        let body = ObjectBody::open(&unit.path).await?;
        let len = body.len();
        let key = &unit.object_key;
        let mut options = PutOptions::new(StorageClass::from_deep(deep));
        if let Some(transfer_id) = unit.transfer_id {
            options = options.for_transfer(transfer_id.to_string());
        }

        let start = Instant::now();
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                warn!("Shutdown requested, abandoning upload of {}", key);
                return Err(SyncError::Cancelled);
            }
            result = self.store.put(key, body, &options) => result?,
        }
        self.metrics.put_duration.observe_since(start);

        let path = ledger_key(&unit.path);
        if unit.is_part() {
            ledger.mark_part_uploaded(&path)?;
            self.metrics.parts_uploaded.inc();
        } else {
            ledger.mark_file_uploaded(&path)?;
            self.metrics.files_uploaded.inc();
        }
        self.metrics.bytes_uploaded.inc_by(len);

        debug!("Uploaded {} as {} ({} bytes)", unit.path.display(), key, len);
        Ok(())
    }

    /// Upload the pending parts of a transfer in sequence order, committing
    /// each part as soon as its PUT succeeds. Returns the number uploaded.
    pub async fn upload_parts(
        &self,
        ledger: &dyn Ledger,
        parts: &[PartRecord],
        deep: bool,
    ) -> Result<usize> {
        let mut ordered: Vec<&PartRecord> = parts.iter().collect();
        ordered.sort_by_key(|p| p.sequence);

        let total = ordered.len();
        let mut uploaded = 0;
        for part in ordered {
            if part.is_uploaded() {
                debug!("Part {} already uploaded, skipping", part.object_key);
                continue;
            }

            info!(
                "Uploading part {}/{}: {}",
                part.sequence + 1,
                total,
                part.object_key
            );
            self.upload_unit(ledger, &FileUnit::part(part), deep).await?;
            uploaded += 1;
        }

        Ok(uploaded)
    }
}
