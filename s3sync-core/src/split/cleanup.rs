//! Scoped removal of piece files

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Owns the piece files of one split and removes them when dropped.
///
/// Held until the part uploads finish, so pieces disappear on success,
/// on upload failure, and on splitter failure alike. The staging directory
/// is removed too once it is empty.
#[derive(Debug)]
pub struct PieceCleanup {
    staging_dir: PathBuf,
    pieces: Vec<PathBuf>,
}

impl PieceCleanup {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            pieces: Vec::new(),
        }
    }

    /// Take ownership of a piece file
    pub fn track(&mut self, path: PathBuf) {
        self.pieces.push(path);
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    fn remove(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed piece {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove piece {}: {}", path.display(), e),
        }
    }
}

impl Drop for PieceCleanup {
    fn drop(&mut self) {
        for path in self.pieces.drain(..) {
            Self::remove(&path);
        }
        match std::fs::remove_dir(&self.staging_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging directory {}: {}",
                self.staging_dir.display(),
                e
            ),
        }
    }
}
