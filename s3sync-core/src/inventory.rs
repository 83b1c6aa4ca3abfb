//! Local inventory and change detection
//!
//! Walks the sync root, keeps files matching the suffix filters, and diffs
//! the result against the ledger to produce the units of a batch.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classify::{classify_with_limit, SizeClass};
use crate::error::{Result, SyncError};
use crate::ledger::{ledger_key, Ledger, UploadStatus};

/// One inventoried file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryEntry {
    pub size_bytes: u64,
    /// Modification time in Unix seconds
    pub last_modified: i64,
}

/// Inventoried files keyed by path, in path order
pub type Inventory = BTreeMap<PathBuf, InventoryEntry>;

/// Modification time of a file in Unix seconds (0 if unavailable)
pub fn last_modified_secs(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// True if `name` ends with one of `filters`, or `filters` is empty
pub fn matches_filters(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| name.ends_with(f.as_str()))
}

/// Walk `root` and record every regular file matching `filters`.
///
/// Directories in `excludes` (ledger and piece staging) are not descended
/// into, and unreadable entries are skipped with a warning.
pub fn scan(root: &Path, filters: &[String], excludes: &[PathBuf]) -> Result<Inventory> {
    if !root.is_dir() {
        return Err(SyncError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "sync root is not a directory"),
        ));
    }

    let mut inventory = Inventory::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !excludes.iter().any(|ex| e.path() == ex.as_path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !matches_filters(&name, filters) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| SyncError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?;
        inventory.insert(
            entry.path().to_path_buf(),
            InventoryEntry {
                size_bytes: metadata.len(),
                last_modified: last_modified_secs(&metadata),
            },
        );
    }

    info!("Inventoried {} files under {}", inventory.len(), root.display());
    Ok(inventory)
}

/// Record a pending status for every whole-size file that is new or changed.
/// Returns the number of records written.
pub fn update_manifest(ledger: &dyn Ledger, inventory: &Inventory, max_object_size: u64) -> Result<usize> {
    let mut updated = 0;
    for (path, entry) in inventory {
        if classify_with_limit(entry.size_bytes, max_object_size) == SizeClass::Split {
            continue;
        }

        let key = ledger_key(path);
        let unchanged = ledger
            .file_status(&key)?
            .is_some_and(|s| s.last_modified == entry.last_modified);
        if !unchanged {
            ledger.upsert_file_status(&key, entry.last_modified, UploadStatus::Pending)?;
            updated += 1;
        }
    }

    debug!("Manifest updated for {} files", updated);
    Ok(updated)
}

/// Paths whose current version is not yet fully uploaded, in path order
pub fn changed_units(
    ledger: &dyn Ledger,
    inventory: &Inventory,
    max_object_size: u64,
    piece_size: u64,
) -> Result<Vec<PathBuf>> {
    let mut units = Vec::new();
    for (path, entry) in inventory {
        let key = ledger_key(path);
        let done = match classify_with_limit(entry.size_bytes, max_object_size) {
            SizeClass::Whole => ledger
                .file_status(&key)?
                .is_some_and(|s| s.is_current(entry.last_modified)),
            SizeClass::Split => match ledger.latest_transfer(&key)? {
                Some(t) if t.matches(entry.last_modified, piece_size) => {
                    ledger.transfer_complete(&t.transfer_id)?
                }
                _ => false,
            },
        };
        if !done {
            units.push(path.clone());
        }
    }

    Ok(units)
}
