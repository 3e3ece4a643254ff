use crate::ids::{ScanId, TargetId};
use crate::{ChangeEventKind, ScanStatus};

/// Query filter for scan history. All fields are conjunctive; `limit`
/// bounds the result, newest scans first.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFilter {
    pub target_id: Option<TargetId>,
    pub status: Option<ScanStatus>,
    pub limit: Option<usize>,
}

impl ScanFilter {
    pub fn for_target(target_id: TargetId) -> Self {
        Self {
            target_id: Some(target_id),
            ..Self::default()
        }
    }
}

/// Query filter for the change-event log, newest events first.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeEventFilter {
    pub scan_id: Option<ScanId>,
    pub target_id: Option<TargetId>,
    pub kind: Option<ChangeEventKind>,
    pub limit: Option<usize>,
}

impl ChangeEventFilter {
    pub fn for_scan(scan_id: ScanId) -> Self {
        Self {
            scan_id: Some(scan_id),
            ..Self::default()
        }
    }
}
