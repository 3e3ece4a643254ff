//! In-memory repository adapter.
//!
//! Backs tests and embedded deployments. The whole state sits behind one
//! async mutex, so a [`WriteBatch`] application is atomic by construction
//! and uniqueness of `(target, path, active=true)` is enforced at upsert.

use std::collections::HashMap;

use async_trait::async_trait;
use fixity_model::{
    ChangeEvent, ChangeEventFilter, FileRecord, Scan, ScanCheckpoint, ScanFilter, ScanId,
    StorageTarget, TargetId,
};
use tokio::sync::Mutex;

use super::{FixityRepository, WriteBatch};
use crate::error::{FixityError, Result};

#[derive(Debug, Default)]
struct RepoState {
    targets: HashMap<TargetId, StorageTarget>,
    files: Vec<FileRecord>,
    scans: HashMap<ScanId, Scan>,
    checkpoints: Vec<ScanCheckpoint>,
    events: Vec<ChangeEvent>,
}

impl RepoState {
    fn upsert_file(&mut self, record: FileRecord) {
        let slot = self
            .files
            .iter_mut()
            .find(|f| f.target_id == record.target_id && f.path == record.path && f.active);
        match slot {
            Some(existing) => *existing = record,
            None => self.files.push(record),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<RepoState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FixityRepository for InMemoryRepository {
    async fn create_target(&self, target: StorageTarget) -> Result<TargetId> {
        target.validate()?;
        let id = target.id;
        let mut state = self.state.lock().await;
        state.targets.insert(id, target);
        Ok(id)
    }

    async fn update_target(&self, target: StorageTarget) -> Result<()> {
        target.validate()?;
        let mut state = self.state.lock().await;
        if !state.targets.contains_key(&target.id) {
            return Err(FixityError::TargetNotFound(target.id));
        }
        state.targets.insert(target.id, target);
        Ok(())
    }

    async fn delete_target(&self, id: TargetId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.targets.remove(&id).is_none() {
            return Err(FixityError::TargetNotFound(id));
        }
        state.files.retain(|f| f.target_id != id);
        let removed_scans: Vec<ScanId> = state
            .scans
            .values()
            .filter(|s| s.target_id == id)
            .map(|s| s.id)
            .collect();
        state.scans.retain(|_, s| s.target_id != id);
        state
            .checkpoints
            .retain(|c| !removed_scans.contains(&c.scan_id));
        state.events.retain(|e| e.target_id != id);
        Ok(())
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<StorageTarget>> {
        let state = self.state.lock().await;
        Ok(state.targets.get(&id).cloned())
    }

    async fn list_enabled_targets(&self) -> Result<Vec<StorageTarget>> {
        let state = self.state.lock().await;
        let mut targets: Vec<StorageTarget> = state
            .targets
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(targets)
    }

    async fn list_active_files(&self, target_id: TargetId) -> Result<Vec<FileRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .iter()
            .filter(|f| f.target_id == target_id && f.active)
            .cloned()
            .collect())
    }

    async fn create_scan(&self, scan: Scan) -> Result<ScanId> {
        let id = scan.id;
        let mut state = self.state.lock().await;
        state.scans.insert(id, scan);
        Ok(id)
    }

    async fn update_scan(&self, scan: Scan) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.scans.contains_key(&scan.id) {
            return Err(FixityError::Repository(format!(
                "scan {} does not exist",
                scan.id
            )));
        }
        state.scans.insert(scan.id, scan);
        Ok(())
    }

    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>> {
        let state = self.state.lock().await;
        Ok(state.scans.get(&id).cloned())
    }

    async fn list_scans(&self, filter: ScanFilter) -> Result<Vec<Scan>> {
        let state = self.state.lock().await;
        let mut scans: Vec<Scan> = state
            .scans
            .values()
            .filter(|s| filter.target_id.is_none_or(|t| s.target_id == t))
            .filter(|s| filter.status.is_none_or(|status| s.status == status))
            .cloned()
            .collect();
        scans.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            scans.truncate(limit);
        }
        Ok(scans)
    }

    async fn create_checkpoint(&self, checkpoint: ScanCheckpoint) -> Result<()> {
        let mut state = self.state.lock().await;
        state.checkpoints.push(checkpoint);
        Ok(())
    }

    async fn latest_checkpoint(&self, scan_id: ScanId) -> Result<Option<ScanCheckpoint>> {
        let state = self.state.lock().await;
        Ok(state
            .checkpoints
            .iter()
            .filter(|c| c.scan_id == scan_id)
            .max_by_key(|c| c.files_processed)
            .cloned())
    }

    async fn list_change_events(&self, filter: ChangeEventFilter) -> Result<Vec<ChangeEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<ChangeEvent> = state
            .events
            .iter()
            .filter(|e| filter.scan_id.is_none_or(|s| e.scan_id == s))
            .filter(|e| filter.target_id.is_none_or(|t| e.target_id == t))
            .filter(|e| filter.kind.is_none_or(|k| e.kind == k))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn apply_batch(&self, target_id: TargetId, batch: WriteBatch) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.targets.contains_key(&target_id) {
            return Err(FixityError::TargetNotFound(target_id));
        }
        for record in batch.file_upserts {
            state.upsert_file(record);
        }
        state.events.extend(batch.events);
        if let Some(checkpoint) = batch.checkpoint {
            state.checkpoints.push(checkpoint);
        }
        Ok(())
    }
}
