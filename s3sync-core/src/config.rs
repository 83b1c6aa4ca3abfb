//! Sync configuration

use std::path::PathBuf;

use crate::error::{Result, SyncError};
use crate::storage::S3Config;
use crate::{LEDGER_DIR_NAME, LEDGER_FILE_NAME, MAX_SINGLE_OBJECT_SIZE, STAGING_DIR_NAME};

/// Configuration for one sync run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory tree to sync
    pub root: PathBuf,
    /// File name suffixes to include; empty includes everything
    pub filters: Vec<String>,
    /// Ledger document location
    pub ledger_path: PathBuf,
    /// Where split pieces are written before upload; never scanned
    pub staging_dir: PathBuf,
    /// Upload to the archival tier
    pub deep: bool,
    /// Largest file uploaded with a single PUT
    pub max_object_size: u64,
    /// Size of the pieces oversized files are split into
    pub piece_size: u64,
    /// Object store settings
    pub s3: S3Config,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl SyncConfig {
    /// Defaults for syncing `root`, with the ledger stored inside it
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ledger_dir = root.join(LEDGER_DIR_NAME);
        Self {
            ledger_path: ledger_dir.join(LEDGER_FILE_NAME),
            staging_dir: ledger_dir.join(STAGING_DIR_NAME),
            root,
            filters: Vec::new(),
            deep: false,
            max_object_size: MAX_SINGLE_OBJECT_SIZE,
            piece_size: MAX_SINGLE_OBJECT_SIZE,
            s3: S3Config::default(),
        }
    }

    /// Move the ledger, keeping the staging directory next to it
    pub fn set_ledger_path(&mut self, ledger_path: impl Into<PathBuf>) {
        self.ledger_path = ledger_path.into();
        if let Some(dir) = self.ledger_path.parent() {
            self.staging_dir = dir.join(STAGING_DIR_NAME);
        }
    }

    /// Directories the inventory scan must not descend into
    pub fn scan_excludes(&self) -> Vec<PathBuf> {
        let mut excludes = vec![self.staging_dir.clone()];
        if let Some(dir) = self.ledger_path.parent() {
            if dir != self.root.as_path() && !dir.as_os_str().is_empty() {
                excludes.push(dir.to_path_buf());
            }
        }
        excludes
    }

    /// Check size settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_object_size == 0 {
            return Err(SyncError::Config {
                reason: "max_object_size must be positive".into(),
            });
        }
        if self.piece_size == 0 || self.piece_size > self.max_object_size {
            return Err(SyncError::Config {
                reason: format!(
                    "piece_size {} must be between 1 and max_object_size {}",
                    self.piece_size, self.max_object_size
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("/data/photos");
        assert_eq!(config.ledger_path, PathBuf::from("/data/photos/.s3sync/ledger.json"));
        assert_eq!(config.staging_dir, PathBuf::from("/data/photos/.s3sync/pieces"));
        assert_eq!(
            config.scan_excludes(),
            vec![PathBuf::from("/data/photos/.s3sync/pieces"), PathBuf::from("/data/photos/.s3sync")]
        );
        assert_eq!(config.piece_size, MAX_SINGLE_OBJECT_SIZE);
        config.validate().unwrap();
    }

    #[test]
    fn test_ledger_in_root_still_excludes_staging() {
        let mut config = SyncConfig::new("/data/photos");
        config.set_ledger_path("/data/photos/ledger.json");
        assert_eq!(config.staging_dir, PathBuf::from("/data/photos/pieces"));
        assert_eq!(config.scan_excludes(), vec![PathBuf::from("/data/photos/pieces")]);
    }

    #[test]
    fn test_piece_size_must_fit_one_object() {
        let config = SyncConfig {
            piece_size: 10,
            max_object_size: 4,
            ..SyncConfig::new("x")
        };
        assert!(matches!(config.validate(), Err(SyncError::Config { .. })));
    }
}
