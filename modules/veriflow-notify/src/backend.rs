use async_trait::async_trait;
use thiserror::Error;
use veriflow_common::PushMessage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Push provider rejected request with {0}")]
    Client(u16),

    #[error("Push provider rate limited the request")]
    RateLimited,

    #[error("Push provider failed with {0}")]
    Server(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Recipient has no push token")]
    NoToken,
}

impl PushError {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => PushError::RateLimited,
            s if s >= 500 => PushError::Server(s),
            s => PushError::Client(s),
        }
    }

    /// Network errors, 429 and gateway errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Network(_) | PushError::RateLimited => true,
            PushError::Server(status) => matches!(status, 502 | 503 | 504),
            PushError::Client(_) | PushError::NoToken => false,
        }
    }
}

/// Pluggable push-notification provider.
#[async_trait]
pub trait PushBackend: Send + Sync {
    /// Deliver `message` to one device. `Ok(true)` when the provider accepted it.
    async fn send(&self, token: &str, message: &PushMessage) -> Result<bool, PushError>;
}
