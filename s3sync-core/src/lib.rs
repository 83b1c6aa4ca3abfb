//! s3sync core - incremental directory sync to object storage
//!
//! This crate provides:
//! - Inventory of a local tree and diffing against the upload ledger
//! - Splitting of files larger than one object into pieces
//! - Sequential, resumable upload of whole files and parts
//! - A durable ledger of file and part upload status

pub mod batch;
pub mod classify;
pub mod config;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod metrics;
pub mod runtime;
pub mod split;
pub mod storage;
pub mod upload;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use batch::{BatchDriver, BatchReport};
pub use classify::{classify, SizeClass};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use ledger::{JsonLedger, Ledger};
pub use runtime::ShutdownSignal;

/// Largest object a single PUT may store (4 GiB)
pub const MAX_SINGLE_OBJECT_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Directory under the sync root holding the ledger
pub const LEDGER_DIR_NAME: &str = ".s3sync";

/// Ledger document file name
pub const LEDGER_FILE_NAME: &str = "ledger.json";

/// Directory under the ledger directory where pieces are staged
pub const STAGING_DIR_NAME: &str = "pieces";
