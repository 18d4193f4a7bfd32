use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A job claimed from a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Job<T> {
    pub id: String,
    pub queue: String,
    /// Number of previous failed attempts.
    pub attempt: u32,
    pub payload: T,
}

pub(crate) fn new_job_id() -> String {
    format!("job_{}", nanoid::nanoid!(16))
}

/// Backend that persists queued jobs.
///
/// A fetched job stays claimed until it is acked, retried or killed. Backends
/// may hand a claimed job out again if its worker disappears, so handlers must
/// tolerate re-execution.
#[async_trait]
pub trait Storage<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Enqueue a job for immediate execution. Returns the job id.
    async fn push(&self, queue: &str, job: T) -> Result<String>;

    /// Claim the next runnable job of `queue`, if any.
    async fn fetch(&self, queue: &str) -> Result<Option<Job<T>>>;

    /// Remove a job that completed successfully.
    async fn ack(&self, job: &Job<T>) -> Result<()>;

    /// Release a failed job so it runs again after `delay`.
    async fn retry(&self, job: &Job<T>, delay: Duration, error: &str) -> Result<()>;

    /// Park a job that exhausted its attempts.
    async fn kill(&self, job: &Job<T>, error: &str) -> Result<()>;
}
