//! Canonicalized directory tree with containment guarantees.
//!
//! The root is canonicalized once at construction; every relative path a
//! caller supplies is checked lexically before any I/O and re-checked
//! against the canonical root after symlink resolution.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{FileInfo, WalkReport, WalkVisitor};
use crate::error::{FixityError, Result};
use crate::pool::ByteStream;

#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    /// Canonicalize `root` (absolute, symlinks resolved) and verify it is a
    /// directory. All later containment checks compare against this form.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let requested = root.as_ref();
        let root = std::fs::canonicalize(requested).map_err(|err| {
            FixityError::BackendUnavailable(format!(
                "root {} is not reachable: {err}",
                requested.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(FixityError::BackendUnavailable(format!(
                "root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn probe(&self) -> Result<()> {
        tokio::fs::read_dir(&self.root).await.map_err(|err| {
            FixityError::BackendUnavailable(format!(
                "root {} is not readable: {err}",
                self.root.display()
            ))
        })?;
        Ok(())
    }

    /// Lexical safety checks, performed before any I/O.
    fn validate_relative(relative: &str) -> Result<()> {
        let reject = || FixityError::PathTraversal(relative.to_string());

        if relative.is_empty() || relative.contains('\0') {
            return Err(reject());
        }
        if relative.starts_with('/') || relative.starts_with('\\') {
            return Err(reject());
        }
        let bytes = relative.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return Err(reject());
        }
        if relative.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(reject());
        }
        Ok(())
    }

    /// Resolve a caller-supplied relative path to a canonical absolute
    /// path proven to live under the root. The closure maps residual I/O
    /// errors (missing file, permissions) into the caller's error kind.
    fn resolve(
        &self,
        relative: &str,
        io_err: impl FnOnce(std::io::Error) -> FixityError,
    ) -> Result<PathBuf> {
        Self::validate_relative(relative)?;
        let joined = self.root.join(relative);
        let canonical = std::fs::canonicalize(&joined).map_err(io_err)?;
        if !canonical.starts_with(&self.root) {
            return Err(FixityError::SymlinkEscape(relative.to_string()));
        }
        Ok(canonical)
    }

    pub async fn open(&self, relative: &str) -> Result<ByteStream> {
        let path = relative.to_string();
        let resolved = self.resolve(relative, |source| FixityError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|source| FixityError::OpenFailed { path, source })?;
        Ok(Box::new(file))
    }

    pub async fn stat(&self, relative: &str) -> Result<FileInfo> {
        let path = relative.to_string();
        let resolved = self.resolve(relative, |source| FixityError::StatFailed {
            path: path.clone(),
            source,
        })?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|source| FixityError::StatFailed { path, source })?;
        Ok(FileInfo {
            path: relative.to_string(),
            size: metadata.len(),
            mod_time: mod_time_of(&metadata),
            is_dir: metadata.is_dir(),
        })
    }

    pub fn walk(&self, cancel: &CancellationToken, visit: &mut WalkVisitor<'_>) -> Result<WalkReport> {
        let mut report = WalkReport::default();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(FixityError::Cancelled("walk cancelled".into()));
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(target: "scan::walk", error = %err, "skipping unreadable entry");
                    report.errors.push(format!("walk error: {err}"));
                    continue;
                }
            };
            if entry.path_is_symlink() {
                // Delivered like any other entry; descent is what is suppressed.
                debug!(target: "scan::walk", path = %entry.path().display(), "symlink entry, not following");
            }
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative_to_slash(relative),
                Err(_) => continue,
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    report.errors.push(format!("{relative}: {err}"));
                    continue;
                }
            };
            visit(FileInfo {
                path: relative,
                size: metadata.len(),
                mod_time: mod_time_of(&metadata),
                is_dir: metadata.is_dir(),
            })?;
        }

        Ok(report)
    }
}

fn relative_to_slash(relative: &Path) -> String {
    let rendered = relative.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        rendered.into_owned()
    } else {
        rendered.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

fn mod_time_of(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, DirTree) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), b"bee").unwrap();
        fs::write(dir.path().join("a.txt"), b"ay").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.txt"), b"sea").unwrap();
        let tree = DirTree::new(dir.path()).unwrap();
        (dir, tree)
    }

    fn collect_paths(tree: &DirTree) -> Vec<String> {
        let mut paths = Vec::new();
        tree.walk(&CancellationToken::new(), &mut |info| {
            paths.push(info.path);
            Ok(())
        })
        .unwrap();
        paths
    }

    #[test]
    fn walk_is_lexicographic_and_relative() {
        let (_dir, tree) = fixture();
        assert_eq!(collect_paths(&tree), vec!["a.txt", "b.txt", "sub", "sub/c.txt"]);
    }

    #[test]
    fn walk_never_delivers_the_root() {
        let (_dir, tree) = fixture();
        for path in collect_paths(&tree) {
            assert!(!path.is_empty());
            assert!(!path.starts_with('/'));
        }
    }

    #[test]
    fn walk_stops_when_visitor_errors() {
        let (_dir, tree) = fixture();
        let mut seen = 0;
        let err = tree
            .walk(&CancellationToken::new(), &mut |_| {
                seen += 1;
                Err(FixityError::Cancelled("enough".into()))
            })
            .unwrap_err();
        assert!(matches!(err, FixityError::Cancelled(_)));
        assert_eq!(seen, 1);
    }

    #[test]
    fn walk_honors_cancellation() {
        let (_dir, tree) = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tree.walk(&cancel, &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, FixityError::Cancelled(_)));
    }

    #[tokio::test]
    async fn traversal_attempts_are_rejected_before_io() {
        let (_dir, tree) = fixture();
        for hostile in [
            "../a.txt",
            "sub/../../a.txt",
            "/etc/passwd",
            "\\windows\\system32",
            "C:\\loot",
            "c:boot.ini",
            "a\0b",
            "",
        ] {
            let err = match tree.open(hostile).await {
                Ok(_) => panic!("expected an error for {hostile:?}"),
                Err(err) => err,
            };
            assert!(
                matches!(err, FixityError::PathTraversal(_)),
                "{hostile:?} gave {err:?}"
            );
            let err = tree.stat(hostile).await.unwrap_err();
            assert!(
                matches!(err, FixityError::PathTraversal(_)),
                "{hostile:?} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn url_encoded_traversal_is_not_decoded() {
        let (_dir, tree) = fixture();
        // No URL decoding happens: this is a literal (nonexistent) name and
        // must fail as such, not escape.
        let err = match tree.open("%2e%2e/%2e%2e/etc/passwd").await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(err, FixityError::OpenFailed { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_outside_root_is_rejected() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), b"keep out").unwrap();

        let (dir, tree) = fixture();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("leak"))
            .unwrap();

        let err = match tree.open("leak").await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(err, FixityError::SymlinkEscape(ref p) if p == "leak"), "got {err:?}");

        let err = tree.stat("leak").await.unwrap_err();
        assert!(matches!(err, FixityError::SymlinkEscape(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn walk_does_not_follow_symlinked_directories() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("stray.txt"), b"x").unwrap();

        let (dir, tree) = fixture();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("portal")).unwrap();

        let paths = collect_paths(&tree);
        // The symlink itself is an entry; what lies behind it is not.
        assert!(paths.contains(&"portal".to_string()), "{paths:?}");
        assert!(paths.iter().all(|p| !p.contains("stray")), "{paths:?}");
    }

    #[cfg(unix)]
    #[test]
    fn walk_delivers_symlinked_files() {
        let (dir, tree) = fixture();
        std::os::unix::fs::symlink(dir.path().join("a.txt"), dir.path().join("alias.txt"))
            .unwrap();

        let paths = collect_paths(&tree);
        assert!(paths.contains(&"alias.txt".to_string()), "{paths:?}");
    }

    #[tokio::test]
    async fn stat_reports_size_and_kind() {
        let (_dir, tree) = fixture();
        let info = tree.stat("a.txt").await.unwrap();
        assert_eq!(info.size, 2);
        assert!(!info.is_dir);

        let info = tree.stat("sub").await.unwrap();
        assert!(info.is_dir);
    }

    #[tokio::test]
    async fn probe_fails_once_root_disappears() {
        let dir = TempDir::new().unwrap();
        let tree = DirTree::new(dir.path()).unwrap();
        drop(dir);
        let err = tree.probe().await.unwrap_err();
        assert!(matches!(err, FixityError::BackendUnavailable(_)));
    }

    #[test]
    fn open_requires_existing_directory() {
        let err = DirTree::new("/definitely/not/here").unwrap_err();
        assert!(matches!(err, FixityError::BackendUnavailable(_)));
    }
}
