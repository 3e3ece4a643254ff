//! Fixity scanning core: digest primitives, the checksum worker pool,
//! storage backends with traversal containment, repository ports, the scan
//! engine and the scan coordinator.

pub mod backend;
pub mod coordinator;
pub mod digest;
pub mod engine;
pub mod error;
pub mod pool;
pub mod repository;
pub mod telemetry;

pub use backend::{
    DirTree, FileInfo, LocalBackend, NfsBackend, SmbBackend, StorageBackend, WalkReport,
    backend_for_target,
};
pub use coordinator::ScanCoordinator;
pub use digest::{StreamDigest, digest_stream};
pub use engine::{ScanEngine, ScanEngineConfig};
pub use error::{FixityError, Result};
pub use pool::{ByteStream, ChecksumJob, ChecksumOutcome, ChecksumPool, Opener};
pub use repository::{FixityRepository, InMemoryRepository, WriteBatch};
pub use telemetry::{RunningScan, ScanAllReport, ScanFailure, ScanResult};
