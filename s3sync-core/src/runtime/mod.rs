//! Runtime support for sync runs

pub mod shutdown;

pub use shutdown::ShutdownSignal;
