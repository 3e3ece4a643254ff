//! Storage backends.
//!
//! All three variants (local directory, NFS mount, SMB mount) read through
//! the same canonicalized directory tree; the abstraction exists to
//! normalize path separators, enforce root containment and leave room for a
//! true userspace NFS/SMB client later.

mod tree;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fixity_model::{BackendKind, StorageTarget};
use tokio_util::sync::CancellationToken;

use crate::error::{FixityError, Result};
use crate::pool::ByteStream;

pub use tree::DirTree;

/// Metadata for a single entry yielded by [`StorageBackend::walk`] or
/// [`StorageBackend::stat`]. `path` is forward-slash relative to the
/// target root, no leading slash.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

/// Per-entry problems the walk swallowed while continuing.
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    pub errors: Vec<String>,
}

/// Visitor invoked for every reachable entry; returning an error stops the
/// walk and surfaces that error to the caller.
pub type WalkVisitor<'a> = dyn FnMut(FileInfo) -> Result<()> + Send + 'a;

/// Capability surface the scan engine consumes.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cheap reachability check; failure means the scan never starts.
    async fn probe(&self) -> Result<()>;

    /// Deterministic (lexicographic per directory) traversal of every
    /// entry under the root. The root itself is not delivered. Entry-level
    /// errors are swallowed into the report; cancellation aborts the walk
    /// with [`FixityError::Cancelled`].
    async fn walk(
        &self,
        cancel: &CancellationToken,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<WalkReport>;

    /// Open a root-relative path for reading.
    async fn open(&self, relative: &str) -> Result<ByteStream>;

    /// Metadata for a root-relative path.
    async fn stat(&self, relative: &str) -> Result<FileInfo>;

    /// Release any resources held for the target. Mount-backed variants
    /// have nothing to release today.
    async fn close(&self) {}
}

/// A plain filesystem directory.
#[derive(Debug)]
pub struct LocalBackend {
    tree: DirTree,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            tree: DirTree::new(root)?,
        })
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn probe(&self) -> Result<()> {
        self.tree.probe().await
    }

    async fn walk(
        &self,
        cancel: &CancellationToken,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<WalkReport> {
        self.tree.walk(cancel, visit)
    }

    async fn open(&self, relative: &str) -> Result<ByteStream> {
        self.tree.open(relative).await
    }

    async fn stat(&self, relative: &str) -> Result<FileInfo> {
        self.tree.stat(relative).await
    }
}

/// An NFS export already mounted at the configured path.
#[derive(Debug)]
pub struct NfsBackend {
    server: String,
    share: String,
    tree: DirTree,
}

impl NfsBackend {
    pub fn new(
        server: impl Into<String>,
        share: impl Into<String>,
        mount: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let server = server.into();
        let share = share.into();
        if server.trim().is_empty() || share.trim().is_empty() {
            return Err(FixityError::InvalidTarget(
                "nfs targets require a server and a share".into(),
            ));
        }
        Ok(Self {
            server,
            share,
            tree: DirTree::new(mount)?,
        })
    }

    pub fn export(&self) -> String {
        format!("{}:{}", self.server, self.share)
    }
}

#[async_trait]
impl StorageBackend for NfsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nfs
    }

    async fn probe(&self) -> Result<()> {
        self.tree.probe().await.map_err(|err| {
            FixityError::BackendUnavailable(format!("nfs export {}: {err}", self.export()))
        })
    }

    async fn walk(
        &self,
        cancel: &CancellationToken,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<WalkReport> {
        self.tree.walk(cancel, visit)
    }

    async fn open(&self, relative: &str) -> Result<ByteStream> {
        self.tree.open(relative).await
    }

    async fn stat(&self, relative: &str) -> Result<FileInfo> {
        self.tree.stat(relative).await
    }
}

/// An SMB share already mounted at the configured path.
#[derive(Debug)]
pub struct SmbBackend {
    server: String,
    share: String,
    tree: DirTree,
}

impl SmbBackend {
    pub fn new(
        server: impl Into<String>,
        share: impl Into<String>,
        mount: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let server = server.into();
        let share = share.into();
        if server.trim().is_empty() || share.trim().is_empty() {
            return Err(FixityError::InvalidTarget(
                "smb targets require a server and a share".into(),
            ));
        }
        Ok(Self {
            server,
            share,
            tree: DirTree::new(mount)?,
        })
    }

    pub fn unc(&self) -> String {
        format!("//{}/{}", self.server, self.share)
    }
}

#[async_trait]
impl StorageBackend for SmbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Smb
    }

    async fn probe(&self) -> Result<()> {
        self.tree.probe().await.map_err(|err| {
            FixityError::BackendUnavailable(format!("smb share {}: {err}", self.unc()))
        })
    }

    async fn walk(
        &self,
        cancel: &CancellationToken,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<WalkReport> {
        self.tree.walk(cancel, visit)
    }

    async fn open(&self, relative: &str) -> Result<ByteStream> {
        self.tree.open(relative).await
    }

    async fn stat(&self, relative: &str) -> Result<FileInfo> {
        self.tree.stat(relative).await
    }
}

/// Construct the backend a target's configuration calls for.
pub fn backend_for_target(target: &StorageTarget) -> Result<Arc<dyn StorageBackend>> {
    target.validate()?;
    match target.kind {
        BackendKind::Local => Ok(Arc::new(LocalBackend::new(&target.path)?)),
        BackendKind::Nfs => Ok(Arc::new(NfsBackend::new(
            target.server.clone().unwrap_or_default(),
            target.share.clone().unwrap_or_default(),
            &target.path,
        )?)),
        BackendKind::Smb => Ok(Arc::new(SmbBackend::new(
            target.server.clone().unwrap_or_default(),
            target.share.clone().unwrap_or_default(),
            &target.path,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixity_model::DigestAlgorithm;
    use tempfile::TempDir;

    #[test]
    fn factory_requires_server_and_share_for_mounts() {
        let dir = TempDir::new().unwrap();
        let mut target = StorageTarget::new("nas", BackendKind::Nfs, dir.path());
        target.checksum_algorithm = DigestAlgorithm::Sha256;

        assert!(matches!(
            backend_for_target(&target),
            Err(FixityError::InvalidTarget(_))
        ));

        target.server = Some("filer01".into());
        target.share = Some("exports".into());
        let backend = backend_for_target(&target).unwrap();
        assert_eq!(backend.kind(), BackendKind::Nfs);
    }

    #[test]
    fn factory_builds_local_backend() {
        let dir = TempDir::new().unwrap();
        let target = StorageTarget::new("archive", BackendKind::Local, dir.path());
        let backend = backend_for_target(&target).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
    }

    #[test]
    fn smb_backend_formats_unc_path() {
        let dir = TempDir::new().unwrap();
        let backend = SmbBackend::new("fileserver", "media", dir.path()).unwrap();
        assert_eq!(backend.unc(), "//fileserver/media");
    }
}
