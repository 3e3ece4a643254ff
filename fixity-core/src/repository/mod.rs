//! Repository ports.
//!
//! Implementations live in persistence adapters and must not leak their
//! storage types into the engine. The engine is the single writer for a
//! scan; its only transactional requirement is that one [`WriteBatch`]
//! lands atomically.

mod memory;

use async_trait::async_trait;
use fixity_model::{
    ChangeEvent, ChangeEventFilter, FileRecord, Scan, ScanCheckpoint, ScanFilter, ScanId,
    StorageTarget, TargetId,
};

use crate::error::Result;

pub use memory::InMemoryRepository;

/// A buffered group of writes the engine flushes in one transaction:
/// file upserts keyed on `(target, path, active)`, appended change events,
/// and at most one checkpoint.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub file_upserts: Vec<FileRecord>,
    pub events: Vec<ChangeEvent>,
    pub checkpoint: Option<ScanCheckpoint>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.file_upserts.is_empty() && self.events.is_empty() && self.checkpoint.is_none()
    }

    /// Number of buffered row writes, used against the target's
    /// `batch_size` flush threshold.
    pub fn len(&self) -> usize {
        self.file_upserts.len() + self.events.len()
    }
}

/// Transactional persistence consumed by the scan engine and coordinator.
#[async_trait]
pub trait FixityRepository: Send + Sync {
    // Targets. Deleting a target cascades to its files, scans,
    // checkpoints and change events.
    async fn create_target(&self, target: StorageTarget) -> Result<TargetId>;
    async fn update_target(&self, target: StorageTarget) -> Result<()>;
    async fn delete_target(&self, id: TargetId) -> Result<()>;
    async fn get_target(&self, id: TargetId) -> Result<Option<StorageTarget>>;
    async fn list_enabled_targets(&self) -> Result<Vec<StorageTarget>>;

    /// Previous snapshot: the active file records of a target.
    async fn list_active_files(&self, target_id: TargetId) -> Result<Vec<FileRecord>>;

    // Scans.
    async fn create_scan(&self, scan: Scan) -> Result<ScanId>;
    async fn update_scan(&self, scan: Scan) -> Result<()>;
    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>>;
    async fn list_scans(&self, filter: ScanFilter) -> Result<Vec<Scan>>;

    // Checkpoints. At least the most recent checkpoint per scan is kept.
    async fn create_checkpoint(&self, checkpoint: ScanCheckpoint) -> Result<()>;
    async fn latest_checkpoint(&self, scan_id: ScanId) -> Result<Option<ScanCheckpoint>>;

    // Change events.
    async fn list_change_events(&self, filter: ChangeEventFilter) -> Result<Vec<ChangeEvent>>;

    /// Apply a batch atomically: either every upsert, event and checkpoint
    /// in it becomes visible, or none do.
    async fn apply_batch(&self, target_id: TargetId, batch: WriteBatch) -> Result<()>;
}
