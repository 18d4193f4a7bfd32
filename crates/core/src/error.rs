use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    /// A send was attempted on a subscriber that was never issued a token.
    #[error("subscriber {0} has no session token")]
    MissingToken(String),
    #[error("channel {0} not found")]
    ChannelNotFound(String),
    #[error("subscriber {0} not found")]
    SubscriberNotFound(String),
    #[error("invalid channel name {0:?}: must be non-empty and contain no ':'")]
    InvalidChannel(String),
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
    #[error("failed to issue session token: {0:#}")]
    Token(anyhow::Error),
    #[error("failed to enqueue fan-out job: {0:#}")]
    Enqueue(anyhow::Error),
    #[error("timeout hook {name} failed: {error:#}")]
    Hook { name: String, error: anyhow::Error },
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BroadcastError>;
