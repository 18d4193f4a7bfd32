use anyhow::Result;
use futures_util::future::try_join_all;
use tracing::info;

use crate::worker::Worker;

/// Runs registered workers until one fails or the process receives ctrl-c.
pub struct Monitor<T> {
    workers: Vec<Worker<T>>,
}

impl<T> Default for Monitor<T> {
    fn default() -> Self {
        Self { workers: vec![] }
    }
}

impl<T> Monitor<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, worker: Worker<T>) -> Self {
        self.workers.push(worker);
        self
    }

    pub async fn run(self) -> Result<()> {
        let mut handles = Vec::new();
        for worker in self.workers {
            for _ in 0..worker.concurrency() {
                let worker = worker.clone();
                handles.push(tokio::spawn(worker.run()));
            }
        }

        info!(tasks = handles.len(), "monitor running");

        tokio::select! {
            joined = try_join_all(handles) => {
                for result in joined? {
                    result?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }

        Ok(())
    }
}
