use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// A message leased to a subscriber.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Handle for ack/nack/extend. Invalidated when the lease expires.
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_attempt: u32,
    pub publish_time: DateTime<Utc>,
}

impl ReceivedMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Client-side bounds on what a subscription may have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub max_messages: usize,
    pub max_bytes: usize,
    pub max_lease: Duration,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            max_messages: 50,
            max_bytes: 50 * 1024 * 1024,
            max_lease: Duration::from_secs(600),
        }
    }
}

/// Broker-side settings applied when a subscription is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub ack_deadline: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            ack_deadline: Duration::from_secs(60),
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(600),
        }
    }
}

impl SubscriptionConfig {
    /// Immediate redelivery after nack. Used by tests and local runs.
    pub fn immediate() -> Self {
        Self {
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Redelivery delay after the `attempt`-th delivery was nacked.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.min_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}
