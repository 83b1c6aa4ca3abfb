//! Object storage targets
//!
//! The `ObjectStore` trait plus an S3-compatible HTTP client and an
//! in-process store.

pub mod memory;
pub mod object_store;
pub mod s3;
pub mod sigv4;

pub use memory::MemoryObjectStore;
pub use object_store::{
    object_key, part_key, ObjectBody, ObjectInfo, ObjectStore, PutOptions, StorageClass,
    PART_KEY_SUFFIX,
};
pub use s3::{S3Client, S3Config};
