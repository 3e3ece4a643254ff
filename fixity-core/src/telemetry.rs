//! Structured result and status objects consumed by the dashboard.

use chrono::{DateTime, Utc};
use fixity_model::{Scan, ScanId, ScanStatus, TargetId};
use serde::Serialize;

/// Summary of one finished (or finalized-as-cancelled/failed) scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub scan_id: ScanId,
    pub target_id: TargetId,
    pub status: ScanStatus,
    pub files_scanned: u64,
    pub added: u64,
    pub deleted: u64,
    pub modified: u64,
    pub verified: u64,
    pub errors: u64,
    pub is_large_change: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
}

impl ScanResult {
    pub fn from_scan(scan: &Scan) -> Self {
        let duration_seconds = scan
            .completed_at
            .map(|done| (done - scan.started_at).num_milliseconds() as f64 / 1_000.0)
            .unwrap_or(0.0);
        Self {
            scan_id: scan.id,
            target_id: scan.target_id,
            status: scan.status,
            files_scanned: scan.files_scanned,
            added: scan.added,
            deleted: scan.deleted,
            modified: scan.modified,
            verified: scan.verified,
            errors: scan.errors,
            is_large_change: scan.is_large_change,
            started_at: scan.started_at,
            completed_at: scan.completed_at,
            duration_seconds,
        }
    }
}

/// A scan currently registered with the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct RunningScan {
    pub target_id: TargetId,
    pub target_name: String,
    pub scan_id: ScanId,
    pub started_at: DateTime<Utc>,
}

/// Per-target failure collected by a scan-all fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub target_id: TargetId,
    pub error: String,
}

/// Outcome of scanning every enabled target.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanAllReport {
    pub results: Vec<ScanResult>,
    pub failures: Vec<ScanFailure>,
}
