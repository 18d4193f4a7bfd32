//! In-process storage, used by tests and single-process deployments.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::storage::{new_job_id, Job, Storage};

#[derive(Debug, Clone)]
pub struct DeadJob<T> {
    pub job: Job<T>,
    pub error: String,
}

struct Pending<T> {
    job: Job<T>,
    ready_at: Instant,
}

struct Inner<T> {
    pending: VecDeque<Pending<T>>,
    running: HashMap<String, Job<T>>,
    dead: Vec<DeadJob<T>>,
}

#[derive(Clone)]
pub struct MemoryStorage<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: VecDeque::new(),
                running: HashMap::new(),
                dead: Vec::new(),
            })),
        }
    }

    /// Jobs waiting on `queue`, including ones delayed by a retry.
    pub async fn pending_len(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .await
            .pending
            .iter()
            .filter(|p| p.job.queue == queue)
            .count()
    }
}

impl<T: Clone> MemoryStorage<T> {
    pub async fn dead_jobs(&self) -> Vec<DeadJob<T>> {
        self.inner.lock().await.dead.clone()
    }
}

#[async_trait]
impl<T> Storage<T> for MemoryStorage<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn push(&self, queue: &str, job: T) -> Result<String> {
        let id = new_job_id();
        self.inner.lock().await.pending.push_back(Pending {
            job: Job {
                id: id.clone(),
                queue: queue.to_string(),
                attempt: 0,
                payload: job,
            },
            ready_at: Instant::now(),
        });
        Ok(id)
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Job<T>>> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let Some(pos) = inner
            .pending
            .iter()
            .position(|p| p.job.queue == queue && p.ready_at <= now)
        else {
            return Ok(None);
        };
        let Some(entry) = inner.pending.remove(pos) else {
            return Ok(None);
        };
        inner
            .running
            .insert(entry.job.id.clone(), entry.job.clone());
        Ok(Some(entry.job))
    }

    async fn ack(&self, job: &Job<T>) -> Result<()> {
        self.inner.lock().await.running.remove(&job.id);
        Ok(())
    }

    async fn retry(&self, job: &Job<T>, delay: Duration, _error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.running.remove(&job.id);
        let mut next = job.clone();
        next.attempt += 1;
        inner.pending.push_back(Pending {
            job: next,
            ready_at: Instant::now() + delay,
        });
        Ok(())
    }

    async fn kill(&self, job: &Job<T>, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.running.remove(&job.id);
        inner.dead.push(DeadJob {
            job: job.clone(),
            error: error.to_string(),
        });
        Ok(())
    }
}
