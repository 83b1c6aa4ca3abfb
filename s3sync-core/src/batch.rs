//! Batch driver
//!
//! Uploads a caller-supplied list of changed files one at a time, splitting
//! the ones too large for a single object. Stops at the first error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::classify::{classify_with_limit, SizeClass};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::inventory::last_modified_secs;
use crate::ledger::{ledger_key, FileUnit, Ledger, UploadStatus};
use crate::metrics::SyncMetrics;
use crate::runtime::ShutdownSignal;
use crate::split::{SplitCoordinator, Splitter};
use crate::storage::{part_key, ObjectStore, PART_KEY_SUFFIX};
use crate::upload::UploadOrchestrator;

/// What a batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Whole files uploaded
    pub files_uploaded: usize,
    /// Oversized files split and uploaded
    pub files_split: usize,
    /// Parts uploaded across all split files
    pub parts_uploaded: usize,
    /// Units already uploaded for their current version
    pub skipped: usize,
}

/// Sequential driver over a set of changed paths
pub struct BatchDriver {
    orchestrator: UploadOrchestrator,
    coordinator: SplitCoordinator,
    max_object_size: u64,
    shutdown: ShutdownSignal,
}

impl BatchDriver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        splitter: Arc<dyn Splitter>,
        config: &SyncConfig,
        metrics: Arc<SyncMetrics>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            orchestrator: UploadOrchestrator::new(store, metrics, shutdown.clone()),
            coordinator: SplitCoordinator::new(splitter, config.piece_size, &config.staging_dir),
            max_object_size: config.max_object_size,
            shutdown,
        }
    }

    /// Upload every unit in order, aborting on the first failure.
    ///
    /// Status already committed for earlier units is kept.
    pub async fn upload_all(
        &self,
        ledger: &dyn Ledger,
        units: &[PathBuf],
        deep: bool,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let count = units.len();
        if count == 0 {
            info!("No files to update");
            return Ok(report);
        }

        for (i, path) in units.iter().enumerate() {
            if self.shutdown.is_triggered() {
                warn!("Shutdown requested, stopping before {}", path.display());
                return Err(SyncError::Cancelled);
            }

            info!("Uploading file: {} ({}/{})", path.display(), i + 1, count);
            if let Err(e) = self.upload_one(ledger, path, deep, &mut report).await {
                error!("Failed to upload {}: {}", path.display(), e);
                return Err(e);
            }
        }

        info!(
            "Batch complete: {} files, {} split files ({} parts), {} already uploaded",
            report.files_uploaded, report.files_split, report.parts_uploaded, report.skipped
        );
        Ok(report)
    }

    async fn upload_one(
        &self,
        ledger: &dyn Ledger,
        path: &Path,
        deep: bool,
        report: &mut BatchReport,
    ) -> Result<()> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        let size = metadata.len();
        let last_modified = last_modified_secs(&metadata);
        let key = ledger_key(path);

        match classify_with_limit(size, self.max_object_size) {
            SizeClass::Whole => {
                if let Some(status) = ledger.file_status(&key)? {
                    if status.is_current(last_modified) {
                        info!("{} already uploaded, skipping", path.display());
                        report.skipped += 1;
                        return Ok(());
                    }
                }

                ledger.upsert_file_status(&key, last_modified, UploadStatus::Pending)?;
                self.orchestrator
                    .upload_unit(ledger, &FileUnit::whole(path, size), deep)
                    .await?;
                report.files_uploaded += 1;
                info!("Successfully uploaded file: {}", path.display());
            }
            SizeClass::Split => {
                if let Some(transfer) = ledger.latest_transfer(&key)? {
                    if transfer.matches(last_modified, self.coordinator.piece_size())
                        && ledger.transfer_complete(&transfer.transfer_id)?
                    {
                        info!("{} already uploaded in parts, skipping", path.display());
                        report.skipped += 1;
                        return Ok(());
                    }
                }

                check_part_keys(path, size, self.coordinator.piece_size())?;
                warn!(
                    "{} too big for a single object ({} bytes), splitting",
                    path.display(),
                    size
                );
                let outcome = self
                    .coordinator
                    .split(ledger, path, last_modified, &self.shutdown)
                    .await?;
                self.orchestrator.metrics().files_split.inc();

                // Pieces are removed when `outcome` drops, after the uploads
                let uploaded = self
                    .orchestrator
                    .upload_parts(ledger, &outcome.parts, deep)
                    .await?;
                report.files_split += 1;
                report.parts_uploaded += uploaded;
                info!(
                    "Successfully uploaded {} in {} parts ({} this run)",
                    path.display(),
                    outcome.parts.len(),
                    uploaded
                );
            }
        }

        Ok(())
    }
}

/// Fail if a sibling of `path` would be stored under one of its part keys
fn check_part_keys(path: &Path, size: u64, piece_size: u64) -> Result<()> {
    let parts = size.div_ceil(piece_size.max(1));
    for sequence in 0..parts {
        let sequence = sequence as u32;
        let mut name = path.as_os_str().to_os_string();
        name.push(format!("{}{:04}", PART_KEY_SUFFIX, sequence));
        if Path::new(&name).exists() {
            return Err(SyncError::KeyCollision {
                path: path.to_path_buf(),
                key: part_key(path, sequence),
            });
        }
    }
    Ok(())
}
