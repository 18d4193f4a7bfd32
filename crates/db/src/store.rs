use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::store::SubscriberStore;
use relay_core::types::{Channel, ChannelDefaults, Subscriber};
use sqlx::PgPool;
use tracing::debug;

use crate::models::SubscriberRow;
use crate::queries::{channels, subscribers};

/// [`SubscriberStore`] backed by the `channels` and `subscribers` tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberStore for PgStore {
    async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let row = channels::get_by_id(&self.pool, id)
            .await
            .context("failed to load channel")?;
        Ok(row.map(Channel::from))
    }

    async fn get_or_create_channel(&self, id: &str, defaults: ChannelDefaults) -> Result<Channel> {
        let row = channels::get_or_create(&self.pool, id, defaults.ping_interval, defaults.max_token_age)
            .await
            .context("failed to get or create channel")?;
        Ok(row.into())
    }

    async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>> {
        let row = subscribers::get_by_id(&self.pool, id)
            .await
            .context("failed to load subscriber")?;
        Ok(row.map(Subscriber::from))
    }

    async fn list_subscribers(&self, channel_id: &str) -> Result<Vec<Subscriber>> {
        let rows = subscribers::list_by_channel(&self.pool, channel_id)
            .await
            .context("failed to list subscribers")?;
        Ok(rows.into_iter().map(Subscriber::from).collect())
    }

    async fn insert_or_get_subscriber(&self, subscriber: Subscriber) -> Result<(Subscriber, bool)> {
        let (row, created) = subscribers::insert_or_get(&self.pool, &SubscriberRow::from(&subscriber))
            .await
            .context("failed to insert subscriber")?;
        Ok((row.into(), created))
    }

    async fn put_subscribers(&self, updates: &[Subscriber]) -> Result<()> {
        let rows: Vec<SubscriberRow> = updates.iter().map(SubscriberRow::from).collect();
        subscribers::update_sessions(&self.pool, &rows)
            .await
            .context("failed to update subscribers")
    }

    async fn delete_subscribers(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let deleted = subscribers::delete_many(&self.pool, ids)
            .await
            .context("failed to delete subscribers")?;
        debug!(requested = ids.len(), deleted, "deleted subscribers");
        Ok(())
    }
}
