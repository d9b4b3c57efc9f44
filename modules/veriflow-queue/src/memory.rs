//! In-memory broker for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::types::{ReceivedMessage, SubscriptionConfig};

struct Entry {
    message_id: String,
    data: Vec<u8>,
    publish_time: DateTime<Utc>,
    delivery_attempt: u32,
    visible_at: Instant,
    ack_id: Option<String>,
}

struct SubscriptionState {
    config: SubscriptionConfig,
    entries: Vec<Entry>,
    acked: usize,
}

#[derive(Default)]
struct State {
    /// topic → attached subscriptions
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, SubscriptionState>,
    published: Vec<(String, Vec<u8>)>,
    failing_publishes: u32,
    stalled_publishes: bool,
    closed: bool,
}

/// Thread-safe in-memory broker with Pub/Sub-like lease semantics.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` publishes fail with `Unavailable`.
    pub fn fail_next_publishes(&self, n: u32) {
        self.state.lock().unwrap().failing_publishes = n;
    }

    /// While set, publishes never return.
    pub fn stall_publishes(&self, stalled: bool) {
        self.state.lock().unwrap().stalled_publishes = stalled;
    }

    /// Payloads successfully published to `topic`, decoded as JSON.
    pub fn published(&self, topic: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, data)| serde_json::from_slice(data).ok())
            .collect()
    }

    /// Messages not yet acked on `subscription`, leased or not.
    pub fn outstanding(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    pub fn acked(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription)
            .map(|s| s.acked)
            .unwrap_or(0)
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains_key(subscription)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn with_subscription<T>(
        &self,
        subscription: &str,
        f: impl FnOnce(&mut SubscriptionState) -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        let mut state = self.state.lock().unwrap();
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::SubscriptionNotFound(subscription.to_string()))?;
        f(sub)
    }
}

fn leased_entry<'a>(sub: &'a mut SubscriptionState, ack_id: &str) -> Result<&'a mut Entry, BrokerError> {
    let now = Instant::now();
    sub.entries
        .iter_mut()
        .find(|e| e.ack_id.as_deref() == Some(ack_id) && e.visible_at > now)
        .ok_or_else(|| BrokerError::UnknownAckId(ack_id.to_string()))
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.state.lock().unwrap().topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn ensure_subscription(
        &self,
        topic: &str,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        let attached = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;
        if !attached.iter().any(|s| s == subscription) {
            attached.push(subscription.to_string());
        }
        state
            .subscriptions
            .entry(subscription.to_string())
            .or_insert_with(|| SubscriptionState {
                config: *config,
                entries: Vec::new(),
                acked: 0,
            });
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, BrokerError> {
        let stalled = self.state.lock().unwrap().stalled_publishes;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(BrokerError::Unavailable("injected publish failure".into()));
        }
        let attached = state
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;

        let message_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let publish_time = Utc::now();
        for name in attached {
            if let Some(sub) = state.subscriptions.get_mut(&name) {
                sub.entries.push(Entry {
                    message_id: message_id.clone(),
                    data: data.clone(),
                    publish_time,
                    delivery_attempt: 0,
                    visible_at: now,
                    ack_id: None,
                });
            }
        }
        state.published.push((topic.to_string(), data));
        Ok(message_id)
    }

    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.with_subscription(subscription, |sub| {
            let now = Instant::now();
            let deadline = now + sub.config.ack_deadline;
            let mut out = Vec::new();
            for entry in sub.entries.iter_mut() {
                if out.len() >= max_messages {
                    break;
                }
                if entry.visible_at > now {
                    continue;
                }
                let ack_id = Uuid::new_v4().to_string();
                entry.delivery_attempt += 1;
                entry.visible_at = deadline;
                entry.ack_id = Some(ack_id.clone());
                out.push(ReceivedMessage {
                    ack_id,
                    message_id: entry.message_id.clone(),
                    data: entry.data.clone(),
                    delivery_attempt: entry.delivery_attempt,
                    publish_time: entry.publish_time,
                });
            }
            Ok(out)
        })
    }

    async fn ack(&self, subscription: &str, ack_id: &str) -> Result<(), BrokerError> {
        self.with_subscription(subscription, |sub| {
            leased_entry(sub, ack_id)?;
            sub.entries.retain(|e| e.ack_id.as_deref() != Some(ack_id));
            sub.acked += 1;
            Ok(())
        })
    }

    async fn nack(&self, subscription: &str, ack_id: &str) -> Result<(), BrokerError> {
        self.with_subscription(subscription, |sub| {
            let backoff = sub.config;
            let entry = leased_entry(sub, ack_id)?;
            entry.visible_at = Instant::now() + backoff.backoff_for(entry.delivery_attempt);
            entry.ack_id = None;
            Ok(())
        })
    }

    async fn extend_lease(&self, subscription: &str, ack_id: &str, lease: Duration) -> Result<(), BrokerError> {
        self.with_subscription(subscription, |sub| {
            let entry = leased_entry(sub, ack_id)?;
            entry.visible_at = Instant::now() + lease;
            Ok(())
        })
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker_with_sub(config: SubscriptionConfig) -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t").await.unwrap();
        broker.ensure_subscription("t", "s", &config).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_fails() {
        let broker = MemoryBroker::new();
        let err = broker.publish("missing", b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, BrokerError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscription() {
        let broker = broker_with_sub(SubscriptionConfig::default()).await;
        broker.ensure_subscription("t", "s2", &SubscriptionConfig::default()).await.unwrap();
        broker.publish("t", b"1".to_vec()).await.unwrap();

        assert_eq!(broker.outstanding("s"), 1);
        assert_eq!(broker.outstanding("s2"), 1);
    }

    #[tokio::test]
    async fn leased_message_is_invisible_until_nacked() {
        let broker = broker_with_sub(SubscriptionConfig::immediate()).await;
        broker.publish("t", b"1".to_vec()).await.unwrap();

        let first = broker.pull("s", 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].delivery_attempt, 1);
        assert!(broker.pull("s", 10).await.unwrap().is_empty());

        broker.nack("s", &first[0].ack_id).await.unwrap();
        let second = broker.pull("s", 10).await.unwrap();
        assert_eq!(second[0].delivery_attempt, 2);
        assert_eq!(second[0].message_id, first[0].message_id);

        broker.ack("s", &second[0].ack_id).await.unwrap();
        assert_eq!(broker.outstanding("s"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_redelivers_and_invalidates_old_ack() {
        let broker = broker_with_sub(SubscriptionConfig::default()).await;
        broker.publish("t", b"1".to_vec()).await.unwrap();

        let first = broker.pull("s", 1).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let again = broker.pull("s", 1).await.unwrap();
        assert_eq!(again[0].delivery_attempt, 2);
        assert!(matches!(
            broker.ack("s", &first[0].ack_id).await,
            Err(BrokerError::UnknownAckId(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn nack_waits_for_subscription_backoff() {
        let broker = broker_with_sub(SubscriptionConfig::default()).await;
        broker.publish("t", b"1".to_vec()).await.unwrap();

        let first = broker.pull("s", 1).await.unwrap();
        broker.nack("s", &first[0].ack_id).await.unwrap();
        assert!(broker.pull("s", 1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(broker.pull("s", 1).await.unwrap().len(), 1);
    }
}
