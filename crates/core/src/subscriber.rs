//! Operations on a single subscriber's delivery session.

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::error::{BroadcastError, Result};
use crate::liveness::SendPlan;
use crate::types::{is_valid_channel_name, Channel, PushMessage, SendStatus, Subscriber};

impl Broadcaster {
    /// Get or create the subscriber `name` of `channel`.
    ///
    /// The insert is atomic per subscriber id, so concurrent callers converge on
    /// one record. A new subscriber is stored together with its first token.
    pub async fn create_subscriber(&self, channel: &Channel, name: &str) -> Result<Subscriber> {
        if !is_valid_channel_name(&channel.id) {
            return Err(BroadcastError::InvalidChannel(channel.id.clone()));
        }
        let now = Utc::now();
        let mut subscriber = Subscriber::new(&channel.id, name, now);
        let token = self
            .tokens
            .create_session(&subscriber.id)
            .map_err(BroadcastError::Token)?;
        subscriber.issue_token(token, now);

        let (subscriber, created) = self
            .store
            .insert_or_get_subscriber(subscriber)
            .await
            .map_err(BroadcastError::Storage)?;
        if created {
            info!(channel_id = %channel.id, subscriber_id = %subscriber.id, "subscriber created");
        }
        Ok(subscriber)
    }

    pub async fn subscriber(&self, id: &str) -> Result<Subscriber> {
        self.store
            .get_subscriber(id)
            .await
            .map_err(BroadcastError::Storage)?
            .ok_or_else(|| BroadcastError::SubscriberNotFound(id.to_string()))
    }

    /// Return a usable token, reissuing it when `force` is set, when none exists,
    /// or when it is older than the channel's `max_token_age`.
    pub async fn get_token(&self, subscriber: &mut Subscriber, force: bool) -> Result<String> {
        let channel = self.channel_of(subscriber).await?;
        let now = Utc::now();

        if !force && !subscriber.token_expired(channel.max_token_age(), now) {
            if let Some(token) = subscriber.token() {
                return Ok(token.to_string());
            }
        }

        let token = self
            .tokens
            .create_session(&subscriber.id)
            .map_err(BroadcastError::Token)?;
        subscriber.issue_token(token.clone(), now);
        self.store
            .put_subscriber(subscriber)
            .await
            .map_err(BroadcastError::Storage)?;
        Ok(token)
    }

    /// Send `body` to one subscriber outside of a channel fan-out.
    ///
    /// Returns `false` when the subscriber timed out and was removed.
    pub async fn send_to_subscriber<M>(&self, subscriber: &mut Subscriber, body: &M) -> Result<bool>
    where
        M: Serialize + ?Sized,
    {
        let channel = self.channel_of(subscriber).await?;
        let body = serde_json::to_value(body)?;

        match self
            .deliver(subscriber, &body, channel.ping_interval())
            .await?
        {
            SendStatus::Timeout => {
                self.store
                    .delete_subscribers(std::slice::from_ref(&subscriber.id))
                    .await
                    .map_err(BroadcastError::Storage)?;
                info!(subscriber_id = %subscriber.id, "subscriber timed out and was removed");
                Ok(false)
            }
            SendStatus::Update => {
                self.store
                    .put_subscriber(subscriber)
                    .await
                    .map_err(BroadcastError::Storage)?;
                Ok(true)
            }
            SendStatus::Ok => Ok(true),
        }
    }

    /// Record that the subscriber answered a probe.
    pub async fn pong(&self, subscriber: &mut Subscriber) -> Result<()> {
        subscriber.record_pong(Utc::now());
        self.store
            .put_subscriber(subscriber)
            .await
            .map_err(BroadcastError::Storage)
    }

    /// Decide and, unless the subscriber timed out, push the message.
    ///
    /// Transport failures are logged and otherwise ignored: only an unanswered
    /// probe evicts a subscriber.
    pub(crate) async fn deliver(
        &self,
        subscriber: &mut Subscriber,
        body: &serde_json::Value,
        ping_interval: Duration,
    ) -> Result<SendStatus> {
        let token = subscriber
            .token()
            .ok_or_else(|| BroadcastError::MissingToken(subscriber.id.clone()))?
            .to_string();
        let plan = subscriber.plan_send(ping_interval, Utc::now())?;
        let status = plan.status();

        if let SendPlan::Deliver { ping_request } = plan {
            let payload = PushMessage { body, ping_request }.encode()?;
            if let Err(err) = self.transport.push(&token, &payload).await {
                warn!(subscriber_id = %subscriber.id, error = %err, "push to subscriber failed");
            }
        }
        Ok(status)
    }

    async fn channel_of(&self, subscriber: &Subscriber) -> Result<Channel> {
        self.store
            .get_channel(&subscriber.channel_id)
            .await
            .map_err(BroadcastError::Storage)?
            .ok_or_else(|| BroadcastError::ChannelNotFound(subscriber.channel_id.clone()))
    }
}
