use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Unknown or expired ack id: {0}")]
    UnknownAckId(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Publish to {0} timed out")]
    PublishTimeout(String),

    #[error("Queue manager is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::Database(_))
    }
}

impl From<BrokerError> for veriflow_common::PipelineError {
    fn from(e: BrokerError) -> Self {
        veriflow_common::PipelineError::Broker(e.to_string())
    }
}
