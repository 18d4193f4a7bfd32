use serde::Deserialize;
use std::time::Duration;

use crate::types::{ChannelDefaults, DEFAULT_MAX_TOKEN_AGE_SECS, DEFAULT_PING_INTERVAL_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub relay_env: String,
    pub worker_concurrency: usize,
    pub token_secret: String,
    pub push_url: String,
    pub push_timeout_secs: u64,
    pub ping_interval: i64,
    pub max_token_age: i64,
}

impl Settings {
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let database_url = database_url()?;
        let relay_env = std::env::var("RELAY_ENV").unwrap_or_else(|_| "dev".to_string());
        let worker_concurrency = parse_env("RELAY_WORKER_CONCURRENCY").unwrap_or(4);
        let token_secret = std::env::var("RELAY_TOKEN_SECRET")?;
        let push_url = std::env::var("RELAY_PUSH_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080/push".to_string());
        let push_timeout_secs = parse_env("RELAY_PUSH_TIMEOUT_SECS").unwrap_or(10);
        let ping_interval = parse_env("RELAY_PING_INTERVAL").unwrap_or(DEFAULT_PING_INTERVAL_SECS);
        let max_token_age = parse_env("RELAY_MAX_TOKEN_AGE").unwrap_or(DEFAULT_MAX_TOKEN_AGE_SECS);

        Ok(Self {
            database_url,
            relay_env,
            worker_concurrency,
            token_secret,
            push_url,
            push_timeout_secs,
            ping_interval,
            max_token_age,
        })
    }

    pub fn channel_defaults(&self) -> ChannelDefaults {
        ChannelDefaults {
            ping_interval: self.ping_interval,
            max_token_age: self.max_token_age,
        }
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
}

/// The database URL alone, for commands that need nothing else.
pub fn database_url() -> Result<String, std::env::VarError> {
    database_url_from(|key| std::env::var(key))
}

fn database_url_from<F>(lookup: F) -> Result<String, std::env::VarError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    lookup("DATABASE_URL").or_else(|_| lookup("RELAY_DATABASE_URL"))
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
