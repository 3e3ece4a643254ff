//! The scan coordinator.
//!
//! Serializes scans per target, bounds how many run at once and owns the
//! cancellation handles for everything in flight. The registry lock is
//! only ever held to mutate the map, never across I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use fixity_model::{ScanFilter, ScanStatus, TargetId};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::backend_for_target;
use crate::engine::ScanEngine;
use crate::error::{FixityError, Result};
use crate::repository::FixityRepository;
use crate::telemetry::{RunningScan, ScanAllReport, ScanFailure, ScanResult};

const DEFAULT_MAX_CONCURRENT_SCANS: usize = 3;

type Registry = Arc<Mutex<HashMap<TargetId, CancellationToken>>>;

#[derive(Clone)]
pub struct ScanCoordinator {
    engine: Arc<ScanEngine>,
    repo: Arc<dyn FixityRepository>,
    running: Registry,
    max_concurrent_scans: usize,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = lock_registry(&self.running).len();
        f.debug_struct("ScanCoordinator")
            .field("max_concurrent_scans", &self.max_concurrent_scans)
            .field("running", &running)
            .finish()
    }
}

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<TargetId, CancellationToken>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the registry entry on every exit path, including panics and
/// dropped futures.
struct RegistrySlot {
    registry: Registry,
    target_id: TargetId,
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        lock_registry(&self.registry).remove(&self.target_id);
    }
}

impl ScanCoordinator {
    /// `max_concurrent_scans == 0` means "unset" and falls back to the
    /// default of 3.
    pub fn new(
        engine: Arc<ScanEngine>,
        repo: Arc<dyn FixityRepository>,
        max_concurrent_scans: usize,
    ) -> Self {
        let max_concurrent_scans = if max_concurrent_scans == 0 {
            DEFAULT_MAX_CONCURRENT_SCANS
        } else {
            max_concurrent_scans
        };
        Self {
            engine,
            repo,
            running: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent_scans,
        }
    }

    pub fn max_concurrent_scans(&self) -> usize {
        self.max_concurrent_scans
    }

    /// Admit and run a scan of `target_id`, refusing duplicates and
    /// over-capacity requests without side effects.
    pub async fn scan_target(
        &self,
        cancel: &CancellationToken,
        target_id: TargetId,
    ) -> Result<ScanResult> {
        let (token, _slot) = self.admit(cancel, target_id)?;

        let target = self
            .repo
            .get_target(target_id)
            .await?
            .ok_or(FixityError::TargetNotFound(target_id))?;
        if !target.enabled {
            return Err(FixityError::TargetDisabled(target_id));
        }

        let backend = backend_for_target(&target)?;
        let result = self
            .engine
            .scan(token, target_id, Arc::clone(&backend))
            .await;
        backend.close().await;
        result
    }

    /// Cancel the running scan for `target_id`.
    pub fn cancel(&self, target_id: TargetId) -> Result<()> {
        let registry = lock_registry(&self.running);
        match registry.get(&target_id) {
            Some(token) => {
                info!(target: "scan::coordinator", target = %target_id, "cancelling scan");
                token.cancel();
                Ok(())
            }
            None => Err(FixityError::NotRunning(target_id)),
        }
    }

    /// Scan every enabled target, at most `max_concurrent_scans` at once.
    pub async fn scan_all(&self, cancel: &CancellationToken) -> Result<ScanAllReport> {
        let targets = self.repo.list_enabled_targets().await?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_scans));

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let coordinator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let target_id = target.id;
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            target_id,
                            Err(FixityError::Cancelled("scan-all fan-out closed".into())),
                        );
                    }
                };
                (target_id, coordinator.scan_target(&cancel, target_id).await)
            }));
        }

        let mut report = ScanAllReport::default();
        for handle in handles {
            match handle.await {
                Ok((_, Ok(result))) => report.results.push(result),
                Ok((target_id, Err(err))) => {
                    warn!(target: "scan::coordinator", target = %target_id, error = %err, "scan failed");
                    report.failures.push(ScanFailure {
                        target_id,
                        error: err.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!(target: "scan::coordinator", error = %join_err, "scan task aborted");
                }
            }
        }
        Ok(report)
    }

    /// Snapshot of scans currently registered. Targets deleted since their
    /// scan started are dropped from the listing.
    pub async fn running(&self) -> Result<Vec<RunningScan>> {
        let ids: Vec<TargetId> = lock_registry(&self.running).keys().copied().collect();

        let mut running = Vec::with_capacity(ids.len());
        for target_id in ids {
            let Some(target) = self.repo.get_target(target_id).await? else {
                continue;
            };
            let mut scans = self
                .repo
                .list_scans(ScanFilter {
                    target_id: Some(target_id),
                    status: Some(ScanStatus::Running),
                    limit: Some(1),
                })
                .await?;
            let Some(scan) = scans.pop() else {
                continue;
            };
            running.push(RunningScan {
                target_id,
                target_name: target.name,
                scan_id: scan.id,
                started_at: scan.started_at,
            });
        }
        Ok(running)
    }

    /// Register a scan slot under the lock; no I/O happens while it is
    /// held.
    fn admit(
        &self,
        cancel: &CancellationToken,
        target_id: TargetId,
    ) -> Result<(CancellationToken, RegistrySlot)> {
        let mut registry = lock_registry(&self.running);
        if registry.contains_key(&target_id) {
            return Err(FixityError::AlreadyRunning(target_id));
        }
        if registry.len() >= self.max_concurrent_scans {
            return Err(FixityError::ConcurrencyLimit(self.max_concurrent_scans));
        }
        let token = cancel.child_token();
        registry.insert(target_id, token.clone());
        Ok((
            token,
            RegistrySlot {
                registry: Arc::clone(&self.running),
                target_id,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use fixity_model::{BackendKind, StorageTarget};

    fn coordinator(max: usize) -> ScanCoordinator {
        let repo: Arc<dyn FixityRepository> = Arc::new(InMemoryRepository::new());
        let engine = Arc::new(ScanEngine::new(Arc::clone(&repo)));
        ScanCoordinator::new(engine, repo, max)
    }

    #[test]
    fn zero_limit_falls_back_to_default() {
        assert_eq!(coordinator(0).max_concurrent_scans(), 3);
        assert_eq!(coordinator(8).max_concurrent_scans(), 8);
    }

    #[test]
    fn duplicate_admission_is_refused() {
        let coordinator = coordinator(3);
        let cancel = CancellationToken::new();
        let target_id = TargetId::new();

        let (_token, _slot) = coordinator.admit(&cancel, target_id).unwrap();
        assert!(matches!(
            coordinator.admit(&cancel, target_id),
            Err(FixityError::AlreadyRunning(_))
        ));
    }

    #[test]
    fn admission_respects_capacity() {
        let coordinator = coordinator(2);
        let cancel = CancellationToken::new();

        let _a = coordinator.admit(&cancel, TargetId::new()).unwrap();
        let _b = coordinator.admit(&cancel, TargetId::new()).unwrap();
        assert!(matches!(
            coordinator.admit(&cancel, TargetId::new()),
            Err(FixityError::ConcurrencyLimit(2))
        ));
    }

    #[test]
    fn slot_release_frees_target_and_capacity() {
        let coordinator = coordinator(1);
        let cancel = CancellationToken::new();
        let target_id = TargetId::new();

        {
            let (_token, _slot) = coordinator.admit(&cancel, target_id).unwrap();
        }
        // Slot dropped: both the target and the capacity are free again.
        let (_token, _slot) = coordinator.admit(&cancel, target_id).unwrap();
    }

    #[test]
    fn cancel_without_running_scan_errors() {
        let coordinator = coordinator(3);
        assert!(matches!(
            coordinator.cancel(TargetId::new()),
            Err(FixityError::NotRunning(_))
        ));
    }

    #[test]
    fn cancel_fires_registered_token() {
        let coordinator = coordinator(3);
        let cancel = CancellationToken::new();
        let target_id = TargetId::new();

        let (token, _slot) = coordinator.admit(&cancel, target_id).unwrap();
        coordinator.cancel(target_id).unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn scan_target_unknown_target_leaves_no_registration() {
        let coordinator = coordinator(3);
        let cancel = CancellationToken::new();
        let target_id = TargetId::new();

        let err = coordinator.scan_target(&cancel, target_id).await.unwrap_err();
        assert!(matches!(err, FixityError::TargetNotFound(_)));
        // The slot was released, so cancelling reports not-running.
        assert!(matches!(
            coordinator.cancel(target_id),
            Err(FixityError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn scan_target_refuses_disabled_target_before_io() {
        let repo: Arc<dyn FixityRepository> = Arc::new(InMemoryRepository::new());
        let engine = Arc::new(ScanEngine::new(Arc::clone(&repo)));
        let coordinator = ScanCoordinator::new(engine, Arc::clone(&repo), 3);

        let mut target = StorageTarget::new("dormant", BackendKind::Local, "/nonexistent");
        target.enabled = false;
        let target_id = repo.create_target(target).await.unwrap();

        let err = coordinator
            .scan_target(&CancellationToken::new(), target_id)
            .await
            .unwrap_err();
        assert!(matches!(err, FixityError::TargetDisabled(_)));
    }
}
