//! Timeout hooks available to [`FanoutJob`](relay_core::types::FanoutJob)s by name.

use async_trait::async_trait;
use relay_core::types::{Channel, Subscriber};
use relay_core::{TimeoutHook, TimeoutHooks};
use std::sync::Arc;
use tracing::info;

/// Records each eviction in the worker log.
pub struct LogEvictions;

#[async_trait]
impl TimeoutHook for LogEvictions {
    async fn on_timeout(&self, channel: &Channel, evicted: &[Subscriber]) -> anyhow::Result<()> {
        for subscriber in evicted {
            info!(
                channel_id = %channel.id,
                subscriber_id = %subscriber.id,
                last_pong = ?subscriber.last_pong,
                "subscriber timed out"
            );
        }
        Ok(())
    }
}

pub fn registry() -> TimeoutHooks {
    TimeoutHooks::new().register("log", Arc::new(LogEvictions))
}
