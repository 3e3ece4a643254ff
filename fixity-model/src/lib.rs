//! Core data model definitions shared across Fixity crates.
#![allow(missing_docs)]

pub mod error;
pub mod event;
pub mod file;
pub mod filter_types;
pub mod ids;
pub mod scan;
pub mod target;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use event::{ChangeEvent, ChangeEventKind};
pub use file::FileRecord;
pub use filter_types::{ChangeEventFilter, ScanFilter};
pub use ids::{CheckpointId, EventId, FileId, ScanId, TargetId};
pub use scan::{MAX_SCAN_ERRORS, Scan, ScanCheckpoint, ScanStatus};
pub use target::{BackendKind, DigestAlgorithm, StorageTarget};
