use chrono::{DateTime, Utc};

use crate::ids::{EventId, ScanId, TargetId};

/// Kind of transition a change event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChangeEventKind {
    Added,
    Deleted,
    Modified,
    Verified,
}

impl ChangeEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventKind::Added => "added",
            ChangeEventKind::Deleted => "deleted",
            ChangeEventKind::Modified => "modified",
            ChangeEventKind::Verified => "verified",
        }
    }
}

impl std::fmt::Display for ChangeEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable log entry of a semantic file transition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeEvent {
    pub id: EventId,
    pub scan_id: ScanId,
    pub target_id: TargetId,
    pub path: String,
    pub kind: ChangeEventKind,
    pub previous_digest: Option<String>,
    pub new_digest: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    fn record(
        scan_id: ScanId,
        target_id: TargetId,
        path: impl Into<String>,
        kind: ChangeEventKind,
        previous_digest: Option<String>,
        new_digest: Option<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            scan_id,
            target_id,
            path: path.into(),
            kind,
            previous_digest,
            new_digest,
            occurred_at: Utc::now(),
        }
    }

    pub fn added(
        scan_id: ScanId,
        target_id: TargetId,
        path: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self::record(
            scan_id,
            target_id,
            path,
            ChangeEventKind::Added,
            None,
            Some(digest.into()),
        )
    }

    pub fn deleted(
        scan_id: ScanId,
        target_id: TargetId,
        path: impl Into<String>,
        previous_digest: impl Into<String>,
    ) -> Self {
        Self::record(
            scan_id,
            target_id,
            path,
            ChangeEventKind::Deleted,
            Some(previous_digest.into()),
            None,
        )
    }

    pub fn modified(
        scan_id: ScanId,
        target_id: TargetId,
        path: impl Into<String>,
        previous_digest: impl Into<String>,
        new_digest: impl Into<String>,
    ) -> Self {
        Self::record(
            scan_id,
            target_id,
            path,
            ChangeEventKind::Modified,
            Some(previous_digest.into()),
            Some(new_digest.into()),
        )
    }

    pub fn verified(
        scan_id: ScanId,
        target_id: TargetId,
        path: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        let digest = digest.into();
        Self::record(
            scan_id,
            target_id,
            path,
            ChangeEventKind::Verified,
            Some(digest.clone()),
            Some(digest),
        )
    }
}
