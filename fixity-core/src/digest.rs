//! Streaming digest primitives.
//!
//! Bytes are pulled through the selected algorithm in fixed-size chunks so
//! arbitrarily large files digest in bounded memory. Cancellation and the
//! per-job deadline are checked before every read.

use std::time::Instant;

use fixity_model::DigestAlgorithm;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{FixityError, Result};

const READ_CHUNK: usize = 64 * 1024;

/// In-progress digest state for one of the recognized algorithms.
pub enum StreamDigest {
    Md5(md5::Context),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl StreamDigest {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => StreamDigest::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => StreamDigest::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => StreamDigest::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamDigest::Md5(ctx) => ctx.consume(bytes),
            StreamDigest::Sha256(hasher) => hasher.update(bytes),
            StreamDigest::Blake3(hasher) => {
                hasher.update(bytes);
            }
        }
    }

    /// Lowercase hex rendering of the final digest.
    pub fn finalize_hex(self) -> String {
        match self {
            StreamDigest::Md5(ctx) => format!("{:x}", ctx.finalize()),
            StreamDigest::Sha256(hasher) => hex::encode(hasher.finalize()),
            StreamDigest::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}

impl std::fmt::Debug for StreamDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algorithm = match self {
            StreamDigest::Md5(_) => DigestAlgorithm::Md5,
            StreamDigest::Sha256(_) => DigestAlgorithm::Sha256,
            StreamDigest::Blake3(_) => DigestAlgorithm::Blake3,
        };
        f.debug_tuple("StreamDigest").field(&algorithm).finish()
    }
}

/// Stream `reader` through `algorithm` and return the lowercase hex digest.
///
/// `path` only labels errors. The cancellation token is polled before each
/// read; `deadline`, when set, turns into a [`FixityError::Timeout`] the
/// moment it passes.
pub async fn digest_stream<R>(
    algorithm: DigestAlgorithm,
    path: &str,
    reader: &mut R,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut state = StreamDigest::new(algorithm);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        if cancel.is_cancelled() {
            return Err(FixityError::Cancelled(format!(
                "digest of {path} interrupted by cancellation"
            )));
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return Err(FixityError::Timeout(path.to_string()));
        }

        let read = reader
            .read(&mut buf)
            .await
            .map_err(|source| FixityError::ReadFailed {
                path: path.to_string(),
                source,
            })?;
        if read == 0 {
            break;
        }
        state.update(&buf[..read]);
    }

    Ok(state.finalize_hex())
}
