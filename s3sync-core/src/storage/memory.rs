//! In-process object store
//!
//! Used for dry runs and tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::io::AsyncReadExt;

use super::object_store::{ObjectBody, ObjectInfo, ObjectStore, PutOptions, StorageClass};
use crate::error::{Result, SyncError};

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub class: StorageClass,
    pub transfer_id: Option<String>,
}

/// Object store backed by a map
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Total bytes held
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .values()
            .map(|o| o.data.len() as u64)
            .sum()
    }

    /// Store an object directly, bypassing `put`
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, options: PutOptions) {
        self.objects.write().insert(
            key.into(),
            StoredObject {
                data: data.into(),
                class: options.class,
                transfer_id: options.transfer_id,
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: ObjectBody, options: &PutOptions) -> Result<()> {
        let mut data = Vec::with_capacity(body.len() as usize);
        body.into_file()
            .read_to_end(&mut data)
            .await
            .map_err(|e| SyncError::StorageError {
                message: format!("Failed to read body for {}: {}", key, e),
            })?;
        self.insert(key, data, options.clone());
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        Ok(self.get(key).map(|o| ObjectInfo {
            size: o.data.len() as u64,
            transfer_id: o.transfer_id,
        }))
    }
}
