use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PING_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_MAX_TOKEN_AGE_SECS: i64 = 115 * 60;

/// Settings applied to channels created on first lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelDefaults {
    pub ping_interval: i64,
    pub max_token_age: i64,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL_SECS,
            max_token_age: DEFAULT_MAX_TOKEN_AGE_SECS,
        }
    }
}

/// A named broadcast group. The name is the channel's id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    /// Seconds of silence after which a subscriber is probed.
    pub ping_interval: i64,
    /// Seconds a session token stays valid before it is reissued.
    pub max_token_age: i64,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(id: &str, defaults: ChannelDefaults, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            ping_interval: defaults.ping_interval,
            max_token_age: defaults.max_token_age,
            created_at: now,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::seconds(self.ping_interval)
    }

    pub fn max_token_age(&self) -> Duration {
        Duration::seconds(self.max_token_age)
    }
}

/// A delivery token together with the time it was issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.issued_at < now - max_age
    }
}

/// One recipient's delivery session within a channel.
///
/// `channel_id` is fixed at creation; stores never rewrite it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscriber {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub session: Option<SessionToken>,
    /// Set while a liveness probe is outstanding.
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Channel names are the prefix of subscriber keys, so they may not contain
/// the separator.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(':')
}

pub fn subscriber_key(channel_id: &str, name: &str) -> String {
    format!("{}:{}", channel_id, name)
}

impl Subscriber {
    pub fn new(channel_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: subscriber_key(channel_id, name),
            channel_id: channel_id.to_string(),
            name: name.to_string(),
            session: None,
            last_ping: None,
            last_pong: None,
            created_at: now,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }
}

/// Outcome of one send to one subscriber.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Delivered, nothing to persist.
    Ok,
    /// Probe went unanswered; the subscriber must be evicted.
    Timeout,
    /// Delivered as a probe; the subscriber must be persisted.
    Update,
}

/// Message as handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushMessage<B> {
    pub body: B,
    pub ping_request: bool,
}

impl<B: Serialize> PushMessage<B> {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One broadcast of `message` to every subscriber of `channel_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FanoutJob {
    pub channel_id: String,
    pub message: serde_json::Value,
    /// Name of the timeout hook to call with evicted subscribers.
    pub on_timeout: Option<String>,
}
