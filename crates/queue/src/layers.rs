use std::sync::Arc;
use std::time::Duration;

/// Retry behaviour applied to a worker's failed jobs.
///
/// `policy` maps the attempt number that is about to run (1 for the first
/// retry) to the delay before it becomes visible again.
#[derive(Clone)]
pub struct RetryLayer {
    policy: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    max_attempts: u32,
}

impl RetryLayer {
    pub fn new<F>(policy: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            policy: Arc::new(policy),
            max_attempts: 5,
        }
    }

    /// A layer that never retries.
    pub fn none() -> Self {
        Self::new(|_| Duration::ZERO).max_attempts(1)
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn should_retry(&self, next_attempt: u32) -> bool {
        next_attempt < self.max_attempts
    }

    pub fn delay_for(&self, next_attempt: u32) -> Duration {
        (self.policy)(next_attempt)
    }
}

impl std::fmt::Debug for RetryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryLayer")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
