//! Object store interface
//!
//! The upload path only needs two operations: a streaming PUT with a storage
//! class, and a HEAD used by reconciliation. Parts are tagged with the id of
//! the transfer that uploaded them so reconciliation can tell one version of
//! a file from another.

use async_trait::async_trait;
use std::path::{Component, Path};

use crate::error::{Result, SyncError};

/// Suffix separating a source object key from a part number
pub const PART_KEY_SUFFIX: &str = ".part";

/// Storage tier for uploaded objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageClass {
    #[default]
    Standard,
    DeepArchive,
}

impl StorageClass {
    /// Cold tier when `deep` is set, standard otherwise
    pub fn from_deep(deep: bool) -> Self {
        if deep {
            StorageClass::DeepArchive
        } else {
            StorageClass::Standard
        }
    }

    /// Value of the `x-amz-storage-class` header
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

/// Per-object settings of a PUT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub class: StorageClass,
    /// Transfer that produced the object, for parts of split files
    pub transfer_id: Option<String>,
}

impl PutOptions {
    pub fn new(class: StorageClass) -> Self {
        Self {
            class,
            transfer_id: None,
        }
    }

    /// Tag the object with the transfer it belongs to
    pub fn for_transfer(mut self, transfer_id: impl Into<String>) -> Self {
        self.transfer_id = Some(transfer_id.into());
        self
    }
}

/// What HEAD reports about a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    /// Transfer tag written by the PUT, if any
    pub transfer_id: Option<String>,
}

/// An opened local file ready to be streamed as a request body
#[derive(Debug)]
pub struct ObjectBody {
    file: tokio::fs::File,
    len: u64,
}

impl ObjectBody {
    /// Open `path` for reading
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| SyncError::io(path, e))?
            .len();
        Ok(Self { file, len })
    }

    /// Body length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn into_file(self) -> tokio::fs::File {
        self.file
    }
}

/// Remote object storage used as the sync target
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`. No internal retry.
    async fn put(&self, key: &str, body: ObjectBody, options: &PutOptions) -> Result<()>;

    /// Metadata of the object under `key`, or `None` if it does not exist
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;
}

/// Object key for a local path: separators normalized to `/`, with no
/// leading `/` or `./`.
pub fn object_key(path: &Path) -> String {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::ParentDir => segments.push("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    segments.join("/").replace('\\', "/")
}

/// Object key of part `sequence` of `source`: `<source key>.partNNNN`
pub fn part_key(source: &Path, sequence: u32) -> String {
    format!("{}{}{:04}", object_key(source), PART_KEY_SUFFIX, sequence)
}
