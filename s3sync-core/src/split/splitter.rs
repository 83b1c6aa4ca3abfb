//! Splitter task
//!
//! Reads one large file and writes it back out as bounded-size piece files
//! in a staging directory outside the synced tree. Progress and the terminal
//! outcome travel on a single channel so the consumer sees every piece
//! before `Done`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::ledger::PieceInfo;
use crate::runtime::ShutdownSignal;

/// Read/write block size used while copying a piece
pub const SPLIT_BLOCK_SIZE: usize = 8 * 1024 * 1024;

/// Message emitted by a splitter
#[derive(Debug)]
pub enum SplitEvent {
    /// A piece has been fully written
    Piece(PieceInfo),
    /// Terminal outcome; nothing follows it
    Done(Result<()>),
}

/// What to split and how
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub source: PathBuf,
    pub piece_size: u64,
    /// Directory the pieces are written to; created if missing
    pub staging_dir: PathBuf,
}

/// A unit of work that splits a file into pieces.
///
/// Implementations send zero or more `Piece` events in file-offset order,
/// then exactly one `Done`, and must stop early once `shutdown` triggers.
#[async_trait]
pub trait Splitter: Send + Sync {
    async fn split(
        &self,
        request: SplitRequest,
        events: mpsc::Sender<SplitEvent>,
        shutdown: ShutdownSignal,
    );
}

/// Path of piece `sequence` inside `staging_dir`: `<staging_dir>/partNNNN`
pub fn piece_path(staging_dir: &Path, sequence: u32) -> PathBuf {
    staging_dir.join(format!("part{:04}", sequence))
}

/// Splitter writing pieces to the local filesystem
#[derive(Debug, Clone)]
pub struct FileSplitter {
    block_size: usize,
}

impl FileSplitter {
    pub fn new() -> Self {
        Self {
            block_size: SPLIT_BLOCK_SIZE,
        }
    }

    /// Use a smaller copy block, mostly for tests
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    async fn write_pieces(
        &self,
        request: &SplitRequest,
        events: &mpsc::Sender<SplitEvent>,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        if request.piece_size == 0 {
            return Err(SyncError::SplitFailed {
                path: request.source.clone(),
                reason: "piece size must be positive".into(),
            });
        }

        let mut source = File::open(&request.source)
            .await
            .map_err(|e| SyncError::io(&request.source, e))?;
        tokio::fs::create_dir_all(&request.staging_dir)
            .await
            .map_err(|e| SyncError::io(&request.staging_dir, e))?;
        let mut buf = vec![0u8; self.block_size.min(request.piece_size as usize).max(1)];
        let mut sequence = 0u32;

        loop {
            let path = piece_path(&request.staging_dir, sequence);
            let written = match self
                .write_piece(&mut source, &path, request, &mut buf, shutdown)
                .await
            {
                Ok(written) => written,
                Err(e) => {
                    if let Err(remove_err) = std::fs::remove_file(&path) {
                        if remove_err.kind() != std::io::ErrorKind::NotFound {
                            warn!("Failed to remove partial piece {}: {}", path.display(), remove_err);
                        }
                    }
                    return Err(e);
                }
            };

            if written == 0 {
                break;
            }

            debug!("Wrote piece {} ({} bytes)", path.display(), written);
            let piece = PieceInfo {
                path,
                size_bytes: written,
            };
            if events.send(SplitEvent::Piece(piece)).await.is_err() {
                return Err(SyncError::SplitFailed {
                    path: request.source.clone(),
                    reason: "piece consumer went away".into(),
                });
            }

            sequence += 1;
            if written < request.piece_size {
                break;
            }
        }

        Ok(())
    }

    /// Copy up to `piece_size` bytes into `path`; the file is only created
    /// once there is data for it.
    async fn write_piece(
        &self,
        source: &mut File,
        path: &Path,
        request: &SplitRequest,
        buf: &mut [u8],
        shutdown: &ShutdownSignal,
    ) -> Result<u64> {
        let mut out: Option<File> = None;
        let mut remaining = request.piece_size;
        let mut written = 0u64;

        while remaining > 0 {
            if shutdown.is_triggered() {
                return Err(SyncError::SplitCancelled {
                    path: request.source.clone(),
                });
            }

            let want = remaining.min(buf.len() as u64) as usize;
            let n = source
                .read(&mut buf[..want])
                .await
                .map_err(|e| SyncError::io(&request.source, e))?;
            if n == 0 {
                break;
            }

            if out.is_none() {
                out = Some(File::create(path).await.map_err(|e| SyncError::io(path, e))?);
            }
            if let Some(file) = out.as_mut() {
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| SyncError::io(path, e))?;
            }

            written += n as u64;
            remaining -= n as u64;
        }

        if let Some(mut file) = out {
            file.flush().await.map_err(|e| SyncError::io(path, e))?;
            file.sync_all().await.map_err(|e| SyncError::io(path, e))?;
        }

        Ok(written)
    }
}

impl Default for FileSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Splitter for FileSplitter {
    async fn split(
        &self,
        request: SplitRequest,
        events: mpsc::Sender<SplitEvent>,
        shutdown: ShutdownSignal,
    ) {
        let result = self.write_pieces(&request, &events, &shutdown).await;
        let _ = events.send(SplitEvent::Done(result)).await;
    }
}
