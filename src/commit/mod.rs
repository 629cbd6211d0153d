//! Commit path: per-dataset serialization and the staged-to-canonical merge.

pub mod locks;
pub mod merge;

pub use locks::{DatasetGuard, DatasetLocks};
pub use merge::{MergeEngine, MergeReceipt, OverwriteReceipt};
