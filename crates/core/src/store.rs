use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::types::{Channel, ChannelDefaults, Subscriber};

/// Persistence for channels and their subscribers.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn get_channel(&self, id: &str) -> Result<Option<Channel>>;

    async fn get_or_create_channel(&self, id: &str, defaults: ChannelDefaults) -> Result<Channel>;

    async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>>;

    async fn list_subscribers(&self, channel_id: &str) -> Result<Vec<Subscriber>>;

    /// Atomically insert `subscriber` unless its id is taken. Returns the stored
    /// record and whether this call inserted it.
    async fn insert_or_get_subscriber(&self, subscriber: Subscriber) -> Result<(Subscriber, bool)>;

    /// Overwrite the mutable state of existing subscribers. Ids that no longer
    /// exist are ignored.
    async fn put_subscribers(&self, subscribers: &[Subscriber]) -> Result<()>;

    /// Remove subscribers. Missing ids are ignored.
    async fn delete_subscribers(&self, ids: &[String]) -> Result<()>;

    async fn put_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        self.put_subscribers(std::slice::from_ref(subscriber)).await
    }
}

#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<HashMap<String, Channel>>,
    subscribers: RwLock<BTreeMap<String, Subscriber>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        Ok(self.channels.read().await.get(id).cloned())
    }

    async fn get_or_create_channel(&self, id: &str, defaults: ChannelDefaults) -> Result<Channel> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(id.to_string())
            .or_insert_with(|| Channel::new(id, defaults, Utc::now()));
        Ok(channel.clone())
    }

    async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>> {
        Ok(self.subscribers.read().await.get(id).cloned())
    }

    async fn list_subscribers(&self, channel_id: &str) -> Result<Vec<Subscriber>> {
        Ok(self
            .subscribers
            .read()
            .await
            .values()
            .filter(|s| s.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn insert_or_get_subscriber(&self, subscriber: Subscriber) -> Result<(Subscriber, bool)> {
        let mut subscribers = self.subscribers.write().await;
        if let Some(existing) = subscribers.get(&subscriber.id) {
            return Ok((existing.clone(), false));
        }
        subscribers.insert(subscriber.id.clone(), subscriber.clone());
        Ok((subscriber, true))
    }

    async fn put_subscribers(&self, updates: &[Subscriber]) -> Result<()> {
        let mut subscribers = self.subscribers.write().await;
        for update in updates {
            if let Some(stored) = subscribers.get_mut(&update.id) {
                stored.session = update.session.clone();
                stored.last_ping = update.last_ping;
                stored.last_pong = update.last_pong;
            }
        }
        Ok(())
    }

    async fn delete_subscribers(&self, ids: &[String]) -> Result<()> {
        let mut subscribers = self.subscribers.write().await;
        for id in ids {
            subscribers.remove(id);
        }
        Ok(())
    }
}
