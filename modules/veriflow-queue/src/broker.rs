use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::types::{ReceivedMessage, SubscriptionConfig};

/// At-least-once topic/subscription broker.
///
/// Messages published to a topic are copied to every subscription attached
/// at publish time. A pulled message is leased for the subscription's ack
/// deadline; if it is neither acked nor extended before then it becomes
/// visible again with a higher delivery attempt.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the topic if it does not exist.
    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError>;

    /// Create the subscription if it does not exist. Config only applies on creation.
    async fn ensure_subscription(
        &self,
        topic: &str,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<(), BrokerError>;

    /// Returns the broker-assigned message id.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, BrokerError>;

    /// Lease up to `max_messages` visible messages. Empty when nothing is ready.
    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError>;

    async fn ack(&self, subscription: &str, ack_id: &str) -> Result<(), BrokerError>;

    /// Release the lease; the message is redelivered after the subscription's backoff.
    async fn nack(&self, subscription: &str, ack_id: &str) -> Result<(), BrokerError>;

    /// Push the lease deadline to `now + lease`.
    async fn extend_lease(&self, subscription: &str, ack_id: &str, lease: Duration) -> Result<(), BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;

    /// Release connections. Further calls may fail.
    async fn close(&self) {}
}
