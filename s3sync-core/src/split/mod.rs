//! Splitting of files larger than one object
//!
//! A splitter task produces pieces; the coordinator records them and owns
//! their cleanup.

pub mod cleanup;
pub mod coordinator;
pub mod splitter;

pub use cleanup::PieceCleanup;
pub use coordinator::{SplitCoordinator, SplitOutcome};
pub use splitter::{piece_path, FileSplitter, SplitEvent, SplitRequest, Splitter};
