//! Uploading units to the object store

pub mod orchestrator;
pub mod reconcile;

pub use orchestrator::UploadOrchestrator;
pub use reconcile::{reconcile, ReconcileReport};
