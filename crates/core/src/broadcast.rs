//! Channel fan-out.
//!
//! [`Broadcaster::send_message`] only enqueues a [`FanoutJob`]; the worker
//! process runs [`Broadcaster::run_fanout`] under the queue's retry layer. A
//! fan-out attempt reads the subscriber set once, decides per subscriber,
//! hands evicted subscribers to the job's timeout hook, then removes them and
//! persists probed ones in two batches. Any storage or hook error fails the
//! whole attempt so the queue can retry it.

use async_trait::async_trait;
use relay_queue::storage::Storage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{BroadcastError, Result};
use crate::store::SubscriberStore;
use crate::token::SessionTokenProvider;
use crate::transport::Transport;
use crate::types::{
    is_valid_channel_name, Channel, ChannelDefaults, FanoutJob, SendStatus, Subscriber,
};

pub const FANOUT_QUEUE: &str = "fanout";

/// Called with the subscribers evicted during one fan-out attempt. Because
/// attempts can be retried, a hook may run more than once per message.
#[async_trait]
pub trait TimeoutHook: Send + Sync {
    async fn on_timeout(&self, channel: &Channel, evicted: &[Subscriber]) -> anyhow::Result<()>;
}

/// Timeout hooks addressable by name from a [`FanoutJob`].
#[derive(Clone, Default)]
pub struct TimeoutHooks {
    hooks: HashMap<String, Arc<dyn TimeoutHook>>,
}

impl TimeoutHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, hook: Arc<dyn TimeoutHook>) -> Self {
        self.hooks.insert(name.to_string(), hook);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TimeoutHook>> {
        self.hooks.get(name).cloned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub subscribers: usize,
    pub delivered: usize,
    pub probed: usize,
    pub evicted: Vec<String>,
    /// Subscribers left out because they hold no session token.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct Broadcaster {
    pub(crate) store: Arc<dyn SubscriberStore>,
    pub(crate) tokens: Arc<dyn SessionTokenProvider>,
    pub(crate) transport: Arc<dyn Transport>,
    queue: Arc<dyn Storage<FanoutJob>>,
    hooks: TimeoutHooks,
    defaults: ChannelDefaults,
}

impl Broadcaster {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        tokens: Arc<dyn SessionTokenProvider>,
        transport: Arc<dyn Transport>,
        queue: Arc<dyn Storage<FanoutJob>>,
    ) -> Self {
        Self {
            store,
            tokens,
            transport,
            queue,
            hooks: TimeoutHooks::new(),
            defaults: ChannelDefaults::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: TimeoutHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_defaults(mut self, defaults: ChannelDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Look up a channel by name, creating it with the configured defaults.
    pub async fn channel(&self, name: &str) -> Result<Channel> {
        if !is_valid_channel_name(name) {
            return Err(BroadcastError::InvalidChannel(name.to_string()));
        }
        self.store
            .get_or_create_channel(name, self.defaults)
            .await
            .map_err(BroadcastError::Storage)
    }

    /// Schedule delivery of `message` to every subscriber of `channel`.
    ///
    /// Returns the queued job's id as soon as it is stored. `on_timeout` names a
    /// [`TimeoutHook`] registered with the worker.
    pub async fn send_message<M>(
        &self,
        channel: &Channel,
        message: &M,
        on_timeout: Option<&str>,
    ) -> Result<String>
    where
        M: Serialize + ?Sized,
    {
        let job = FanoutJob {
            channel_id: channel.id.clone(),
            message: serde_json::to_value(message)?,
            on_timeout: on_timeout.map(str::to_string),
        };
        let job_id = self
            .queue
            .push(FANOUT_QUEUE, job)
            .await
            .map_err(BroadcastError::Enqueue)?;
        debug!(channel_id = %channel.id, job_id = %job_id, "fan-out queued");
        Ok(job_id)
    }

    /// Run one fan-out attempt.
    pub async fn run_fanout(&self, job: &FanoutJob) -> Result<FanoutReport> {
        let started = Instant::now();

        let channel = self
            .store
            .get_channel(&job.channel_id)
            .await
            .map_err(BroadcastError::Storage)?
            .ok_or_else(|| BroadcastError::ChannelNotFound(job.channel_id.clone()))?;
        let subscribers = self
            .store
            .list_subscribers(&channel.id)
            .await
            .map_err(BroadcastError::Storage)?;

        let mut report = FanoutReport {
            subscribers: subscribers.len(),
            ..Default::default()
        };
        let mut evicted = Vec::new();
        let mut updated = Vec::new();

        for mut subscriber in subscribers {
            match self
                .deliver(&mut subscriber, &job.message, channel.ping_interval())
                .await
            {
                Ok(SendStatus::Ok) => report.delivered += 1,
                Ok(SendStatus::Update) => {
                    report.delivered += 1;
                    report.probed += 1;
                    updated.push(subscriber);
                }
                Ok(SendStatus::Timeout) => evicted.push(subscriber),
                Err(BroadcastError::MissingToken(id)) => {
                    error!(
                        channel_id = %channel.id,
                        subscriber_id = %id,
                        "skipping subscriber without session token"
                    );
                    report.skipped.push(id);
                }
                Err(err) => return Err(err),
            }
        }

        if !evicted.is_empty() {
            // Evicted subscribers stay stored until the hook has seen them.
            if let Some(name) = job.on_timeout.as_deref() {
                self.run_hook(name, &channel, &evicted).await?;
            }

            let ids: Vec<String> = evicted.iter().map(|s| s.id.clone()).collect();
            self.store
                .delete_subscribers(&ids)
                .await
                .map_err(BroadcastError::Storage)?;
            info!(
                channel_id = %channel.id,
                count = ids.len(),
                "evicted unresponsive subscribers"
            );
            report.evicted = ids;
        }

        if !updated.is_empty() {
            self.store
                .put_subscribers(&updated)
                .await
                .map_err(BroadcastError::Storage)?;
        }

        report.elapsed = started.elapsed();
        debug!(
            channel_id = %channel.id,
            subscribers = report.subscribers,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sent message to subscribers"
        );
        Ok(report)
    }

    async fn run_hook(&self, name: &str, channel: &Channel, evicted: &[Subscriber]) -> Result<()> {
        let Some(hook) = self.hooks.get(name) else {
            warn!(hook = %name, channel_id = %channel.id, "no timeout hook registered");
            return Ok(());
        };
        hook.on_timeout(channel, evicted)
            .await
            .map_err(|error| BroadcastError::Hook {
                name: name.to_string(),
                error,
            })
    }
}
