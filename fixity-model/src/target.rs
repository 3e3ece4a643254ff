use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::ids::TargetId;

/// The kind of storage a target scans.
///
/// NFS and SMB targets assume the share is already mounted at the
/// configured path; the kind records where the data actually lives so the
/// backend layer can validate the mount and a future userspace client can
/// take over without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BackendKind {
    Local,
    Nfs,
    Smb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Nfs => "nfs",
            BackendKind::Smb => "smb",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "local" => Ok(BackendKind::Local),
            "nfs" => Ok(BackendKind::Nfs),
            "smb" => Ok(BackendKind::Smb),
            other => Err(ModelError::UnknownBackendKind(other.to_string())),
        }
    }
}

/// Digest algorithm used for file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    /// Identifier used on the wire and in stored rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    /// Length of the lowercase hex rendering of a digest.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Blake3 => 64,
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(ModelError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// An administrator-declared scan root plus its scan policy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageTarget {
    pub id: TargetId,
    pub name: String,
    pub kind: BackendKind,
    /// Mount or root path the backend reads from.
    pub path: PathBuf,
    pub server: Option<String>,
    pub share: Option<String>,
    pub credentials_ref: Option<String>,
    pub enabled: bool,
    pub parallel_workers: usize,
    /// Fraction of stable files verified on each scan, in `[0.0, 1.0]`.
    pub random_sample_percent: f64,
    pub checksum_algorithm: DigestAlgorithm,
    /// Checkpoint every this many walked files.
    pub checkpoint_interval: u64,
    /// Repository writes buffered per transactional flush.
    pub batch_size: usize,
    pub large_change_threshold_count: Option<u64>,
    pub large_change_threshold_percent: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageTarget {
    pub fn new(name: impl Into<String>, kind: BackendKind, path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: TargetId::new(),
            name: name.into(),
            kind,
            path: path.into(),
            server: None,
            share: None,
            credentials_ref: None,
            enabled: true,
            parallel_workers: 4,
            random_sample_percent: 0.1,
            checksum_algorithm: DigestAlgorithm::Sha256,
            checkpoint_interval: 1_000,
            batch_size: 100,
            large_change_threshold_count: None,
            large_change_threshold_percent: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rejects a misconfigured target before any scan is admitted.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidTarget("name must not be empty".into()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ModelError::InvalidTarget("path must not be empty".into()));
        }
        if self.parallel_workers == 0 {
            return Err(ModelError::InvalidTarget(
                "parallel_workers must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.random_sample_percent) {
            return Err(ModelError::InvalidTarget(format!(
                "random_sample_percent must be within [0.0, 1.0], got {}",
                self.random_sample_percent
            )));
        }
        if self.checkpoint_interval == 0 {
            return Err(ModelError::InvalidTarget(
                "checkpoint_interval must be greater than zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidTarget(
                "batch_size must be greater than zero".into(),
            ));
        }
        if matches!(self.kind, BackendKind::Nfs | BackendKind::Smb) {
            let server_ok = self.server.as_deref().is_some_and(|s| !s.trim().is_empty());
            let share_ok = self.share.as_deref().is_some_and(|s| !s.trim().is_empty());
            if !server_ok || !share_ok {
                return Err(ModelError::InvalidTarget(format!(
                    "{} targets require a server and a share",
                    self.kind
                )));
            }
        }
        Ok(())
    }
}
