use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::layers::RetryLayer;
use crate::storage::{Job, Storage};

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct WorkerBuilder<T> {
    queue: String,
    storage: Option<Arc<dyn Storage<T>>>,
    retry: RetryLayer,
    poll_interval: Duration,
    concurrency: usize,
}

impl<T> WorkerBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            storage: None,
            retry: RetryLayer::none(),
            poll_interval: Duration::from_millis(500),
            concurrency: 1,
        }
    }

    pub fn backend<S>(mut self, storage: S) -> Self
    where
        S: Storage<T> + 'static,
    {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn layer(mut self, layer: RetryLayer) -> Self {
        self.retry = layer;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn build_fn<F, Fut>(self, handler: F) -> Result<Worker<T>>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let storage = self
            .storage
            .with_context(|| format!("worker {} has no storage backend", self.queue))?;
        Ok(Worker {
            queue: self.queue,
            storage,
            handler: Arc::new(move |job| handler(job).boxed()),
            retry: self.retry,
            poll_interval: self.poll_interval,
            concurrency: self.concurrency,
        })
    }
}

#[derive(Clone)]
pub struct Worker<T> {
    queue: String,
    storage: Arc<dyn Storage<T>>,
    handler: Handler<T>,
    retry: RetryLayer,
    poll_interval: Duration,
    concurrency: usize,
}

impl<T> Worker<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Claim and process at most one job. Returns whether a job was processed.
    pub async fn tick(&self) -> Result<bool> {
        match self.storage.fetch(&self.queue).await? {
            Some(job) => {
                self.process(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Process jobs until none is runnable. Returns how many were processed.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        while self.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Poll the queue forever.
    pub async fn run(self) -> Result<()> {
        info!(queue = %self.queue, "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "worker poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, job: Job<T>) -> Result<()> {
        let started = Instant::now();
        match (self.handler)(job.payload.clone()).await {
            Ok(()) => {
                self.storage.ack(&job).await?;
                debug!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job completed"
                );
            }
            Err(err) => {
                let next_attempt = job.attempt + 1;
                let message = format!("{err:#}");
                if self.retry.should_retry(next_attempt) {
                    let delay = self.retry.delay_for(next_attempt);
                    warn!(
                        queue = %job.queue,
                        job_id = %job.id,
                        attempt = next_attempt,
                        delay_secs = delay.as_secs(),
                        error = %message,
                        "job failed, scheduling retry"
                    );
                    self.storage.retry(&job, delay, &message).await?;
                } else {
                    error!(
                        queue = %job.queue,
                        job_id = %job.id,
                        attempt = next_attempt,
                        error = %message,
                        "job failed permanently"
                    );
                    self.storage.kill(&job, &message).await?;
                }
            }
        }
        Ok(())
    }
}
