//! Bounded pool of checksum workers.
//!
//! Jobs flow through a bounded queue into cooperative workers that stream
//! each file through its digest; outcomes flow back through an equally
//! bounded result queue. An error in one job never takes down its worker.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fixity_model::DigestAlgorithm;
use futures::future::BoxFuture;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::digest::digest_stream;
use crate::error::{FixityError, Result};

/// Readable byte stream produced by a job opener. Closing is dropping.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Lazily opens the byte stream a job digests.
pub type Opener = Box<dyn FnOnce() -> BoxFuture<'static, Result<ByteStream>> + Send>;

/// A single unit of digest work.
pub struct ChecksumJob {
    pub path: String,
    pub algorithm: DigestAlgorithm,
    pub opener: Opener,
    /// Per-job deadline; `None` or zero means no deadline.
    pub timeout: Option<Duration>,
}

impl ChecksumJob {
    pub fn new(
        path: impl Into<String>,
        algorithm: DigestAlgorithm,
        opener: Opener,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            path: path.into(),
            algorithm,
            opener,
            timeout,
        }
    }
}

impl fmt::Debug for ChecksumJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumJob")
            .field("path", &self.path)
            .field("algorithm", &self.algorithm)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Result of one digest job.
#[derive(Debug)]
pub struct ChecksumOutcome {
    pub path: String,
    pub digest: Result<String>,
    pub elapsed: Duration,
}

/// Fixed-size pool of digest workers over bounded FIFO queues.
///
/// Queue capacities are `2 * workers` on both sides, so submission applies
/// backpressure once the workers fall behind and result consumption blocks
/// while they catch up.
pub struct ChecksumPool {
    job_tx: Option<mpsc::Sender<ChecksumJob>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ChecksumPool {
    /// Spawn `workers` digest workers (clamped up to at least one) and
    /// return the pool handle together with the result queue.
    pub fn start(
        workers: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<ChecksumOutcome>) {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<ChecksumJob>(workers * 2);
        let (result_tx, result_rx) = mpsc::channel::<ChecksumOutcome>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let handles = (0..workers)
            .map(|worker_id| {
                let jobs = Arc::clone(&job_rx);
                let results = result_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(worker_id, jobs, results, cancel))
            })
            .collect();

        (
            Self {
                job_tx: Some(job_tx),
                workers: handles,
                cancel,
            },
            result_rx,
        )
    }

    /// Queue a job, blocking while the job queue is full.
    pub async fn submit(&self, job: ChecksumJob) -> Result<()> {
        let tx = self.job_tx.as_ref().ok_or(FixityError::PoolStopped)?;
        tx.send(job).await.map_err(|_| FixityError::PoolStopped)
    }

    /// Close the job queue, drain in-flight work, then cancel the pool
    /// context. The result queue closes once the last worker exits.
    pub async fn stop(&mut self) {
        let Some(job_tx) = self.job_tx.take() else {
            return;
        };
        drop(job_tx);
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        self.cancel.cancel();
    }
}

impl fmt::Debug for ChecksumPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumPool")
            .field("workers", &self.workers.len())
            .field("stopped", &self.job_tx.is_none())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ChecksumJob>>>,
    results: mpsc::Sender<ChecksumOutcome>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let started = Instant::now();
        let path = job.path.clone();
        let digest = run_job(job, &cancel).await;
        let outcome = ChecksumOutcome {
            path,
            digest,
            elapsed: started.elapsed(),
        };
        if results.send(outcome).await.is_err() {
            break;
        }
    }
    debug!(target: "scan::pool", worker = worker_id, "checksum worker drained");
}

async fn run_job(job: ChecksumJob, cancel: &CancellationToken) -> Result<String> {
    let mut reader = (job.opener)().await.map_err(|err| match err {
        FixityError::Io(source) => FixityError::OpenFailed {
            path: job.path.clone(),
            source,
        },
        other => other,
    })?;

    if cancel.is_cancelled() {
        return Err(FixityError::Cancelled(format!(
            "checksum pool cancelled before digesting {}",
            job.path
        )));
    }
    let deadline = job
        .timeout
        .filter(|timeout| !timeout.is_zero())
        .map(|timeout| Instant::now() + timeout);

    digest_stream(job.algorithm, &job.path, &mut reader, cancel, deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bytes_job(path: &str, bytes: Vec<u8>, timeout: Option<Duration>) -> ChecksumJob {
        ChecksumJob::new(
            path,
            DigestAlgorithm::Md5,
            Box::new(move || {
                Box::pin(async move { Ok(Box::new(Cursor::new(bytes)) as ByteStream) })
            }),
            timeout,
        )
    }

    fn failing_job(path: &str) -> ChecksumJob {
        ChecksumJob::new(
            path,
            DigestAlgorithm::Md5,
            Box::new(|| {
                Box::pin(async {
                    Err(FixityError::Io(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "no access",
                    )))
                })
            }),
            None,
        )
    }

    #[tokio::test]
    async fn zero_workers_clamps_to_one() {
        let (mut pool, mut results) = ChecksumPool::start(0, CancellationToken::new());
        pool.submit(bytes_job("x.bin", b"x".to_vec(), None))
            .await
            .unwrap();
        pool.stop().await;

        let outcome = results.recv().await.expect("one outcome");
        assert_eq!(outcome.path, "x.bin");
        assert_eq!(outcome.digest.unwrap(), "9dd4e461268c8034f5c8564e155c67a6");
        assert!(results.recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_drains_in_flight_jobs() {
        let (mut pool, mut results) = ChecksumPool::start(2, CancellationToken::new());
        for i in 0..4 {
            pool.submit(bytes_job(&format!("f{i}"), vec![b'a'; 64], None))
                .await
                .unwrap();
        }
        pool.stop().await;

        let mut seen = 0;
        while let Some(outcome) = results.recv().await {
            assert!(outcome.digest.is_ok());
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn submit_after_stop_fails_with_pool_stopped() {
        let (mut pool, _results) = ChecksumPool::start(1, CancellationToken::new());
        pool.stop().await;
        let err = pool
            .submit(bytes_job("late", Vec::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, FixityError::PoolStopped));
    }

    #[tokio::test]
    async fn open_failure_is_isolated_to_its_job() {
        let (mut pool, mut results) = ChecksumPool::start(1, CancellationToken::new());
        pool.submit(failing_job("denied.bin")).await.unwrap();
        pool.submit(bytes_job("ok.bin", b"x".to_vec(), None))
            .await
            .unwrap();
        pool.stop().await;

        let mut failures = 0;
        let mut successes = 0;
        while let Some(outcome) = results.recv().await {
            match outcome.digest {
                Ok(_) => successes += 1,
                Err(FixityError::OpenFailed { ref path, .. }) => {
                    assert_eq!(path, "denied.bin");
                    failures += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((failures, successes), (1, 1));
    }

    #[tokio::test]
    async fn expired_timeout_yields_timeout_error() {
        let (mut pool, mut results) = ChecksumPool::start(1, CancellationToken::new());
        pool.submit(bytes_job(
            "slow.bin",
            vec![0u8; 1024],
            Some(Duration::from_nanos(1)),
        ))
        .await
        .unwrap();
        pool.stop().await;

        let outcome = results.recv().await.expect("outcome");
        assert!(
            matches!(outcome.digest, Err(FixityError::Timeout(ref p)) if p == "slow.bin"),
            "got {:?}",
            outcome.digest
        );
    }

    #[tokio::test]
    async fn external_cancel_is_reported_distinctly_from_timeout() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut pool, mut results) = ChecksumPool::start(1, cancel);
        pool.submit(bytes_job("c.bin", vec![0u8; 16], None))
            .await
            .unwrap();
        pool.stop().await;

        let outcome = results.recv().await.expect("outcome");
        assert!(
            matches!(outcome.digest, Err(FixityError::Cancelled(_))),
            "got {:?}",
            outcome.digest
        );
    }

    #[tokio::test]
    async fn results_carry_elapsed_duration() {
        let (mut pool, mut results) = ChecksumPool::start(1, CancellationToken::new());
        pool.submit(bytes_job("t.bin", vec![1u8; 2048], None))
            .await
            .unwrap();
        pool.stop().await;

        let outcome = results.recv().await.expect("outcome");
        assert!(outcome.elapsed > Duration::ZERO);
    }
}
