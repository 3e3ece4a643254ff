use chrono::{DateTime, Utc};

use crate::ids::{FileId, ScanId, TargetId};
use crate::target::DigestAlgorithm;

/// The last observed state of a path under a storage target.
///
/// Paths are stored forward-slash relative to the target root with no
/// leading slash. A record is never hard-deleted by scan logic: once a
/// deletion is observed `active` flips to false and the row stays behind
/// as history. `(target_id, path, active=true)` is unique.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRecord {
    pub id: FileId,
    pub target_id: TargetId,
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub digest: String,
    pub algorithm: DigestAlgorithm,
    pub first_seen: DateTime<Utc>,
    pub last_verified: DateTime<Utc>,
    pub active: bool,
    /// The last scan that touched this record.
    pub last_scan_id: Option<ScanId>,
}

impl FileRecord {
    /// Record for a newly observed file.
    #[allow(clippy::too_many_arguments)]
    pub fn observed(
        target_id: TargetId,
        scan_id: ScanId,
        path: impl Into<String>,
        size: u64,
        mod_time: DateTime<Utc>,
        digest: impl Into<String>,
        algorithm: DigestAlgorithm,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FileId::new(),
            target_id,
            path: path.into(),
            size,
            mod_time,
            digest: digest.into(),
            algorithm,
            first_seen: now,
            last_verified: now,
            active: true,
            last_scan_id: Some(scan_id),
        }
    }
}
