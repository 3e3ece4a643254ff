//! The scan engine.
//!
//! One call to [`ScanEngine::scan`] drives the full pipeline: probe the
//! backend, walk the tree while checkpointing, diff against the previous
//! snapshot, fan digest work out to the checksum pool, classify results
//! into added / deleted / modified / verified, and flush repository writes
//! in transactional batches before applying the single terminal status
//! update.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fixity_model::{
    ChangeEvent, FileRecord, Scan, ScanCheckpoint, ScanId, ScanStatus, StorageTarget, TargetId,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{FileInfo, StorageBackend};
use crate::error::{FixityError, Result};
use crate::pool::{ChecksumJob, ChecksumPool};
use crate::repository::{FixityRepository, WriteBatch};
use crate::telemetry::ScanResult;

/// Above this many swallowed walk errors the backend is re-probed; a dead
/// probe turns the error pile into a fatal `BackendUnavailable`.
const WALK_ERROR_PROBE_THRESHOLD: usize = 32;

#[derive(Debug, Clone)]
pub struct ScanEngineConfig {
    /// Per-file digest deadline, derived from the scan context.
    pub digest_timeout: Duration,
}

impl Default for ScanEngineConfig {
    fn default() -> Self {
        Self {
            digest_timeout: Duration::from_secs(300),
        }
    }
}

pub struct ScanEngine {
    repo: Arc<dyn FixityRepository>,
    config: ScanEngineConfig,
}

impl fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// Size and mtime as seen during the walk.
#[derive(Debug, Clone, Copy)]
struct Observed {
    size: u64,
    mod_time: DateTime<Utc>,
}

/// Why a path was queued for digesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Added,
    Recheck,
}

impl ScanEngine {
    pub fn new(repo: Arc<dyn FixityRepository>) -> Self {
        Self {
            repo,
            config: ScanEngineConfig::default(),
        }
    }

    pub fn with_config(repo: Arc<dyn FixityRepository>, config: ScanEngineConfig) -> Self {
        Self { repo, config }
    }

    /// Run one scan of `target_id` through `backend`.
    ///
    /// Admission errors (unknown or disabled target, dead backend) return
    /// before any scan record exists. Once the record is open, the scan
    /// always reaches exactly one terminal status: `completed`, `failed`
    /// on a fatal repository/backend error, or `cancelled`.
    pub async fn scan(
        &self,
        cancel: CancellationToken,
        target_id: TargetId,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<ScanResult> {
        let target = self
            .repo
            .get_target(target_id)
            .await?
            .ok_or(FixityError::TargetNotFound(target_id))?;
        if !target.enabled {
            return Err(FixityError::TargetDisabled(target_id));
        }

        backend.probe().await?;

        let mut scan = Scan::begin(target_id);
        let scan_id = self.repo.create_scan(scan.clone()).await?;
        info!(
            target: "scan::engine",
            scan = %scan_id,
            target_name = %target.name,
            "scan started"
        );

        match self.run(&cancel, &target, backend, &mut scan).await {
            Ok(()) => {
                let status = if cancel.is_cancelled() {
                    ScanStatus::Cancelled
                } else {
                    ScanStatus::Completed
                };
                scan.finish(status);
            }
            Err(FixityError::Cancelled(reason)) => {
                debug!(target: "scan::engine", scan = %scan_id, %reason, "scan cancelled");
                scan.finish(ScanStatus::Cancelled);
            }
            Err(err) => {
                warn!(target: "scan::engine", scan = %scan_id, error = %err, "scan failed");
                scan.push_error(err.to_string());
                scan.finish(ScanStatus::Failed);
            }
        }

        self.repo.update_scan(scan.clone()).await?;
        info!(
            target: "scan::engine",
            scan = %scan_id,
            status = %scan.status,
            files = scan.files_scanned,
            added = scan.added,
            deleted = scan.deleted,
            modified = scan.modified,
            verified = scan.verified,
            errors = scan.errors,
            "scan finished"
        );
        Ok(ScanResult::from_scan(&scan))
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        target: &StorageTarget,
        backend: Arc<dyn StorageBackend>,
        scan: &mut Scan,
    ) -> Result<()> {
        let current = self.walk_tree(cancel, target, &backend, scan).await?;
        scan.files_scanned = current.len() as u64;

        let previous: HashMap<String, FileRecord> = self
            .repo
            .list_active_files(target.id)
            .await?
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();

        let mut added = Vec::new();
        let mut candidates = Vec::new();
        let mut stable = Vec::new();
        for (path, observed) in &current {
            match previous.get(path) {
                None => added.push(path.clone()),
                Some(prev) if prev.size != observed.size || prev.mod_time != observed.mod_time => {
                    candidates.push(path.clone())
                }
                Some(_) => stable.push(path.clone()),
            }
        }
        let mut deleted: Vec<String> = previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        deleted.sort();

        let sampled = sample_paths(&stable, target.random_sample_percent, scan.id);
        debug!(
            target: "scan::engine",
            scan = %scan.id,
            added = added.len(),
            deleted = deleted.len(),
            candidates = candidates.len(),
            stable = stable.len(),
            sampled = sampled.len(),
            "classification complete"
        );

        let mut batch = WriteBatch::default();

        for path in &deleted {
            let prev = &previous[path];
            let mut tombstone = prev.clone();
            tombstone.active = false;
            tombstone.last_scan_id = Some(scan.id);
            batch
                .events
                .push(ChangeEvent::deleted(scan.id, target.id, path.clone(), prev.digest.clone()));
            batch.file_upserts.push(tombstone);
            scan.deleted += 1;
            if batch.len() >= target.batch_size {
                self.flush(target.id, &mut batch).await?;
            }
        }

        self.digest_and_classify(
            cancel, target, &backend, scan, &current, &previous, added, candidates, sampled,
            &mut batch,
        )
        .await?;

        self.flush(target.id, &mut batch).await?;

        let total_changes = scan.added + scan.deleted + scan.modified;
        scan.is_large_change = exceeds_change_thresholds(
            total_changes,
            current.len() as u64,
            target.large_change_threshold_count,
            target.large_change_threshold_percent,
        );

        Ok(())
    }

    /// Walk the backend into a `path → (size, mtime)` map, writing a
    /// checkpoint every `checkpoint_interval` file leaves. Swallowed walk
    /// errors are journaled; too many of them triggers a re-probe.
    async fn walk_tree(
        &self,
        cancel: &CancellationToken,
        target: &StorageTarget,
        backend: &Arc<dyn StorageBackend>,
        scan: &mut Scan,
    ) -> Result<BTreeMap<String, Observed>> {
        let (walk_tx, mut walk_rx) = mpsc::unbounded_channel::<FileInfo>();
        let walk_backend = Arc::clone(backend);
        let walk_cancel = cancel.clone();
        let walker = tokio::spawn(async move {
            let mut visit = move |info: FileInfo| -> Result<()> {
                if !info.is_dir && walk_tx.send(info).is_err() {
                    return Err(FixityError::Cancelled("walk consumer dropped".into()));
                }
                Ok(())
            };
            walk_backend.walk(&walk_cancel, &mut visit).await
        });

        let mut current = BTreeMap::new();
        let mut walked: u64 = 0;
        let mut last_path: Option<String> = None;
        while let Some(info) = walk_rx.recv().await {
            walked += 1;
            last_path = Some(info.path.clone());
            current.insert(
                info.path,
                Observed {
                    size: info.size,
                    mod_time: info.mod_time,
                },
            );
            if walked % target.checkpoint_interval == 0 {
                let checkpoint = ScanCheckpoint::new(scan.id, last_path.clone(), walked);
                // A single failed checkpoint write is reportable, not fatal.
                if let Err(err) = self.repo.create_checkpoint(checkpoint).await {
                    scan.push_error(format!("checkpoint after {walked} files failed: {err}"));
                }
            }
        }

        let report = match walker.await {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => return Err(err),
            Err(join_err) => {
                return Err(FixityError::BackendUnavailable(format!(
                    "walk task aborted: {join_err}"
                )));
            }
        };

        let swallowed = report.errors.len();
        for message in report.errors {
            scan.push_error(message);
        }
        if swallowed > WALK_ERROR_PROBE_THRESHOLD {
            backend.probe().await.map_err(|err| {
                FixityError::BackendUnavailable(format!("backend lost mid-scan: {err}"))
            })?;
        }

        Ok(current)
    }

    #[allow(clippy::too_many_arguments)]
    async fn digest_and_classify(
        &self,
        cancel: &CancellationToken,
        target: &StorageTarget,
        backend: &Arc<dyn StorageBackend>,
        scan: &mut Scan,
        current: &BTreeMap<String, Observed>,
        previous: &HashMap<String, FileRecord>,
        added: Vec<String>,
        candidates: Vec<String>,
        sampled: Vec<String>,
        batch: &mut WriteBatch,
    ) -> Result<()> {
        let mut pending: HashMap<String, PendingKind> = HashMap::new();
        for path in &added {
            pending.insert(path.clone(), PendingKind::Added);
        }
        for path in candidates.iter().chain(sampled.iter()) {
            pending.insert(path.clone(), PendingKind::Recheck);
        }
        if pending.is_empty() {
            return Ok(());
        }

        let job_paths: Vec<String> = added
            .into_iter()
            .chain(candidates)
            .chain(sampled)
            .collect();

        let algorithm = target.checksum_algorithm;
        let timeout = self.config.digest_timeout;
        let (pool, mut results) = ChecksumPool::start(target.parallel_workers, cancel.child_token());
        let submit_backend = Arc::clone(backend);
        let submitter = tokio::spawn(async move {
            let mut pool = pool;
            for path in job_paths {
                let opener_backend = Arc::clone(&submit_backend);
                let opener_path = path.clone();
                let job = ChecksumJob::new(
                    path,
                    algorithm,
                    Box::new(move || Box::pin(async move { opener_backend.open(&opener_path).await })),
                    Some(timeout),
                );
                if pool.submit(job).await.is_err() {
                    break;
                }
            }
            pool.stop().await;
        });

        while let Some(outcome) = results.recv().await {
            let Some(kind) = pending.remove(&outcome.path) else {
                continue;
            };
            let digest = match outcome.digest {
                Ok(digest) => digest,
                // Cancellation is scan-wide, not a per-file fault.
                Err(FixityError::Cancelled(_)) => continue,
                Err(err) => {
                    scan.push_error(format!("{}: {err}", outcome.path));
                    continue;
                }
            };

            let observed = current[&outcome.path];
            match kind {
                PendingKind::Added => {
                    batch.file_upserts.push(FileRecord::observed(
                        target.id,
                        scan.id,
                        outcome.path.clone(),
                        observed.size,
                        observed.mod_time,
                        digest.clone(),
                        algorithm,
                    ));
                    batch
                        .events
                        .push(ChangeEvent::added(scan.id, target.id, outcome.path, digest));
                    scan.added += 1;
                }
                PendingKind::Recheck => {
                    let Some(prev) = previous.get(&outcome.path) else {
                        continue;
                    };
                    if digest == prev.digest {
                        let mut refreshed = prev.clone();
                        refreshed.last_verified = Utc::now();
                        refreshed.last_scan_id = Some(scan.id);
                        batch.file_upserts.push(refreshed);
                        batch.events.push(ChangeEvent::verified(
                            scan.id,
                            target.id,
                            outcome.path,
                            digest,
                        ));
                        scan.verified += 1;
                    } else {
                        let mut changed = prev.clone();
                        changed.size = observed.size;
                        changed.mod_time = observed.mod_time;
                        changed.digest = digest.clone();
                        changed.algorithm = algorithm;
                        changed.last_verified = Utc::now();
                        changed.last_scan_id = Some(scan.id);
                        batch.events.push(ChangeEvent::modified(
                            scan.id,
                            target.id,
                            outcome.path,
                            prev.digest.clone(),
                            digest,
                        ));
                        batch.file_upserts.push(changed);
                        scan.modified += 1;
                    }
                }
            }
            if batch.len() >= target.batch_size {
                self.flush(target.id, batch).await?;
            }
        }

        let _ = submitter.await;
        Ok(())
    }

    async fn flush(&self, target_id: TargetId, batch: &mut WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let full = std::mem::take(batch);
        self.repo.apply_batch(target_id, full).await
    }
}

/// `ceil(percent * |stable|)` paths, drawn with a generator seeded from
/// the scan id so the sample is reproducible per scan.
fn sample_paths(stable: &[String], percent: f64, scan_id: ScanId) -> Vec<String> {
    let percent = percent.clamp(0.0, 1.0);
    let count = (percent * stable.len() as f64).ceil() as usize;
    if count == 0 || stable.is_empty() {
        return Vec::new();
    }
    if count >= stable.len() {
        return stable.to_vec();
    }

    let mut rng = StdRng::from_seed(seed_from_scan(scan_id));
    let mut picked: Vec<String> = rand::seq::index::sample(&mut rng, stable.len(), count)
        .into_iter()
        .map(|index| stable[index].clone())
        .collect();
    picked.sort();
    picked
}

fn seed_from_scan(scan_id: ScanId) -> [u8; 32] {
    let bytes = scan_id.to_uuid().into_bytes();
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(&bytes);
    seed[16..].copy_from_slice(&bytes);
    seed
}

fn exceeds_change_thresholds(
    total_changes: u64,
    population: u64,
    count_threshold: Option<u64>,
    percent_threshold: Option<f64>,
) -> bool {
    if let Some(count) = count_threshold
        && total_changes > count
    {
        return true;
    }
    if let Some(percent) = percent_threshold
        && population > 0
    {
        let ratio = 100.0 * total_changes as f64 / population as f64;
        if ratio > percent {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn sample_covers_extremes() {
        let stable = paths(&["a", "b", "c", "d"]);
        assert!(sample_paths(&stable, 0.0, ScanId::new()).is_empty());
        assert_eq!(sample_paths(&stable, 1.0, ScanId::new()), stable);
        assert!(sample_paths(&[], 1.0, ScanId::new()).is_empty());
    }

    #[test]
    fn sample_size_rounds_up() {
        let stable = paths(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        assert_eq!(sample_paths(&stable, 0.25, ScanId::new()).len(), 3);
        assert_eq!(sample_paths(&stable, 0.01, ScanId::new()).len(), 1);
    }

    #[test]
    fn sample_is_reproducible_per_scan() {
        let stable: Vec<String> = (0..100).map(|i| format!("f{i:03}")).collect();
        let scan_id = ScanId::new();
        assert_eq!(
            sample_paths(&stable, 0.2, scan_id),
            sample_paths(&stable, 0.2, scan_id)
        );
    }

    #[test]
    fn change_threshold_gate() {
        assert!(!exceeds_change_thresholds(5, 100, None, None));
        assert!(exceeds_change_thresholds(3, 100, Some(2), None));
        assert!(!exceeds_change_thresholds(2, 100, Some(2), None));
        assert!(exceeds_change_thresholds(30, 100, None, Some(25.0)));
        assert!(!exceeds_change_thresholds(25, 100, None, Some(25.0)));
        // Empty population never trips the percent gate.
        assert!(!exceeds_change_thresholds(3, 0, None, Some(25.0)));
        assert!(exceeds_change_thresholds(3, 0, Some(2), Some(25.0)));
    }
}
