use fixity_model::{ModelError, TargetId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FixityError {
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("open failed for {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed for {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stat failed for {path}: {source}")]
    StatFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path escapes target root: {0}")]
    PathTraversal(String),

    #[error("symlink resolves outside target root: {0}")]
    SymlinkEscape(String),

    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("target not found: {0}")]
    TargetNotFound(TargetId),

    #[error("target is disabled: {0}")]
    TargetDisabled(TargetId),

    #[error("a scan is already running for target {0}")]
    AlreadyRunning(TargetId),

    #[error("concurrent scan limit of {0} reached")]
    ConcurrencyLimit(usize),

    #[error("no scan is running for target {0}")]
    NotRunning(TargetId),

    #[error("checksum pool is stopped")]
    PoolStopped,

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("digest deadline exceeded for {0}")]
    Timeout(String),

    #[error("invalid target configuration: {0}")]
    InvalidTarget(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ModelError> for FixityError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownAlgorithm(name) => FixityError::UnsupportedAlgorithm(name),
            ModelError::InvalidTarget(msg) => FixityError::InvalidTarget(msg),
            other => FixityError::InvalidTarget(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FixityError>;
