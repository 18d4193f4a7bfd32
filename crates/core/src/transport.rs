use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Pushes an encoded message to the client session identified by `token`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, token: &str, payload: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    token: &'a str,
    payload: &'a str,
}

/// Hands messages to an HTTP push gateway, which owns the client connections.
#[derive(Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpPushTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpPushTransport {
    async fn push(&self, token: &str, payload: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&PushRequest { token, payload })
            .send()
            .await
            .context("push gateway request failed")?;

        if !resp.status().is_success() {
            bail!("push gateway returned HTTP {}", resp.status().as_u16());
        }
        Ok(())
    }
}
