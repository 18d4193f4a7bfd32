use chrono::{DateTime, Utc};
use relay_core::types::{Channel, SessionToken, Subscriber};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChannelRow {
    pub id: String,
    pub ping_interval: i64,
    pub max_token_age: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            ping_interval: row.ping_interval,
            max_token_age: row.max_token_age,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriberRow {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub current_token: Option<String>,
    pub token_issued: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<SubscriberRow> for Subscriber {
    fn from(row: SubscriberRow) -> Self {
        let session = match (row.current_token, row.token_issued) {
            (Some(token), Some(issued_at)) => Some(SessionToken { token, issued_at }),
            _ => None,
        };
        Subscriber {
            id: row.id,
            channel_id: row.channel_id,
            name: row.name,
            session,
            last_ping: row.last_ping,
            last_pong: row.last_pong,
            created_at: row.created_at,
        }
    }
}

impl From<&Subscriber> for SubscriberRow {
    fn from(sub: &Subscriber) -> Self {
        SubscriberRow {
            id: sub.id.clone(),
            channel_id: sub.channel_id.clone(),
            name: sub.name.clone(),
            current_token: sub.session.as_ref().map(|s| s.token.clone()),
            token_issued: sub.session.as_ref().map(|s| s.issued_at),
            last_ping: sub.last_ping,
            last_pong: sub.last_pong,
            created_at: sub.created_at,
        }
    }
}
