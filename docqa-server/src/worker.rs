//! Bounded execution of answer-generation jobs.
//!
//! Each job runs on its own task while holding a permit from a shared
//! semaphore. The caller waits at most `timeout`; after that the job's
//! [`CancellationToken`] fires and the task is detached. A detached job keeps
//! its permit until it actually stops, so abandoned work still counts against
//! `max_concurrent` and cannot pile up unbounded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("job failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl WorkerPool {
    /// A pool running at most `max_concurrent` jobs (minimum one), each
    /// awaited for at most `timeout`.
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_concurrent.max(1))), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Permits not held by a running or queued-and-admitted job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` under the concurrency bound and the wait bound.
    ///
    /// The timeout covers time spent queueing for a permit. A job that is
    /// cancelled while still queued never starts.
    pub async fn run<F, Fut, T>(&self, job: F) -> Result<T, WorkerError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let permits = Arc::clone(&self.permits);

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => return Err("cancelled before start".to_string()),
                permit = permits.acquire_owned() => permit.map_err(|e| e.to_string())?,
            };
            let output = job(token).await;
            drop(permit);
            Ok(output)
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(reason))) => Err(WorkerError::Failed(reason)),
            Ok(Err(join_error)) => Err(WorkerError::Failed(join_error.to_string())),
            Err(_) => {
                cancel.cancel();
                warn!(timeout = ?self.timeout, "job exceeded its wait bound, detached");
                Err(WorkerError::TimedOut(self.timeout))
            }
        }
    }
}
