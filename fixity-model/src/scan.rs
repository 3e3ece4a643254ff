use chrono::{DateTime, Utc};

use crate::ids::{CheckpointId, ScanId, TargetId};

/// Cap on stored error messages per scan. The `errors` counter keeps the
/// true count; the journal stops growing once the cap is reached.
pub const MAX_SCAN_ERRORS: usize = 100;

/// Lifecycle status of a scan. A scan leaves `Running` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single traversal of a storage target.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scan {
    pub id: ScanId,
    pub target_id: TargetId,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_scanned: u64,
    pub added: u64,
    pub deleted: u64,
    pub modified: u64,
    pub verified: u64,
    pub errors: u64,
    pub is_large_change: bool,
    /// Bounded, ordered error journal; see [`MAX_SCAN_ERRORS`].
    pub error_messages: Vec<String>,
}

impl Scan {
    /// Open a scan record in `Running` state.
    pub fn begin(target_id: TargetId) -> Self {
        Self {
            id: ScanId::new(),
            target_id,
            status: ScanStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            files_scanned: 0,
            added: 0,
            deleted: 0,
            modified: 0,
            verified: 0,
            errors: 0,
            is_large_change: false,
            error_messages: Vec::new(),
        }
    }

    /// Count an error, journaling the message while under the cap.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        if self.error_messages.len() < MAX_SCAN_ERRORS {
            self.error_messages.push(message.into());
        }
    }

    /// Apply the single terminal transition.
    pub fn finish(&mut self, status: ScanStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Durable progress marker written during a scan's walk phase.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanCheckpoint {
    pub id: CheckpointId,
    pub scan_id: ScanId,
    /// Last fully processed path, lexicographic within its directory.
    pub last_processed_path: Option<String>,
    pub files_processed: u64,
    pub created_at: DateTime<Utc>,
}

impl ScanCheckpoint {
    pub fn new(scan_id: ScanId, last_processed_path: Option<String>, files_processed: u64) -> Self {
        Self {
            id: CheckpointId::new(),
            scan_id,
            last_processed_path,
            files_processed,
            created_at: Utc::now(),
        }
    }
}
