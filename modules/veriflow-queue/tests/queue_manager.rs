use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use veriflow_common::RetryPolicy;
use veriflow_queue::{
    Broker, BrokerError, FlowControl, MemoryBroker, MessageHandler, QueueManager, ReceivedMessage,
    SubscribeOptions, SubscriptionConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records every delivery; fails the first `fail_first` of them.
#[derive(Default)]
struct Recorder {
    attempts: Mutex<Vec<u32>>,
    fail_first: usize,
    hold: Option<Duration>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn failing(n: usize) -> Self {
        Self { fail_first: n, ..Default::default() }
    }

    fn slow(hold: Duration) -> Self {
        Self { hold: Some(hold), ..Default::default() }
    }

    fn calls(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(hold) = self.hold {
            tokio::time::sleep(hold).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let n = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(message.delivery_attempt);
            attempts.len()
        };
        if n <= self.fail_first {
            anyhow::bail!("handler failure {n}");
        }
        Ok(())
    }
}

fn manager(broker: &Arc<MemoryBroker>) -> QueueManager {
    QueueManager::new(broker.clone() as Arc<dyn Broker>).with_poll_interval(Duration::from_millis(10))
}

fn immediate() -> SubscribeOptions {
    SubscribeOptions::builder()
        .subscription_config(SubscriptionConfig::immediate())
        .build()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn successful_handler_acks_message() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    let handler = Arc::new(Recorder::default());

    queue.subscribe("check-fact", "check-fact-sub", handler.clone(), immediate()).await.unwrap();
    queue.publish("check-fact", &json!({"verifications": []})).await.unwrap();

    wait_until(|| broker.acked("check-fact-sub") == 1).await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(broker.outstanding("check-fact-sub"), 0);
    queue.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_handler_is_redelivered_with_higher_attempt() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    let handler = Arc::new(Recorder::failing(1));

    queue.subscribe("t", "s", handler.clone(), immediate()).await.unwrap();
    queue.publish("t", &json!({"n": 1})).await.unwrap();

    wait_until(|| broker.acked("s") == 1).await;
    assert_eq!(*handler.attempts.lock().unwrap(), vec![1, 2]);
    queue.close().await;
}

#[tokio::test(start_paused = true)]
async fn publish_retries_through_transient_failures() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    broker.fail_next_publishes(3);

    queue.publish("translation", &json!({"n": 1})).await.unwrap();
    assert_eq!(broker.published("translation").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn publish_fails_loudly_after_deadline() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    broker.fail_next_publishes(u32::MAX);

    let err = queue.publish("translation", &json!({"n": 1})).await.unwrap_err();
    assert!(matches!(err, BrokerError::Unavailable(_)));
    assert!(broker.published("translation").is_empty());
}

#[tokio::test(start_paused = true)]
async fn publish_respects_custom_policy() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker).with_publish_policy(RetryPolicy::once());
    broker.fail_next_publishes(1);

    assert!(queue.publish("t", &json!({})).await.is_err());
    assert!(queue.publish("t", &json!({})).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn hung_publish_is_cut_off_at_the_deadline() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker).with_publish_policy(RetryPolicy::publish());
    broker.stall_publishes(true);

    let started = tokio::time::Instant::now();
    let err = queue.publish("t", &json!({})).await.unwrap_err();

    assert!(matches!(err, BrokerError::PublishTimeout(_)));
    assert!(started.elapsed() <= Duration::from_secs(61));
    assert!(broker.published("t").is_empty());
}

#[tokio::test(start_paused = true)]
async fn sequential_subscription_handles_one_at_a_time() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    let handler = Arc::new(Recorder::slow(Duration::from_millis(50)));
    let options = SubscribeOptions::builder()
        .sequential(true)
        .subscription_config(SubscriptionConfig::immediate())
        .build();

    queue.subscribe("t", "s", handler.clone(), options).await.unwrap();
    for n in 0..5 {
        queue.publish("t", &json!({ "n": n })).await.unwrap();
    }

    wait_until(|| broker.acked("s") == 5).await;
    assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
    queue.close().await;
}

#[tokio::test(start_paused = true)]
async fn flow_control_caps_in_flight_messages() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    let handler = Arc::new(Recorder::slow(Duration::from_millis(50)));
    let options = SubscribeOptions::builder()
        .flow_control(FlowControl { max_messages: 2, ..FlowControl::default() })
        .subscription_config(SubscriptionConfig::immediate())
        .build();

    broker.ensure_topic("t").await.unwrap();
    broker
        .ensure_subscription("t", "s", &SubscriptionConfig::immediate())
        .await
        .unwrap();
    for n in 0..6 {
        queue.publish("t", &json!({ "n": n })).await.unwrap();
    }
    queue.subscribe("t", "s", handler.clone(), options).await.unwrap();

    wait_until(|| broker.acked("s") == 6).await;
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    queue.close().await;
}

#[tokio::test(start_paused = true)]
async fn graceful_close_lets_in_flight_work_finish() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);
    let handler = Arc::new(Recorder::slow(Duration::from_secs(5)));

    queue.subscribe("t", "s", handler.clone(), immediate()).await.unwrap();
    queue.publish("t", &json!({})).await.unwrap();
    wait_until(|| handler.running.load(Ordering::SeqCst) == 1).await;

    queue.close().await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(broker.acked("s"), 1);
    assert!(broker.is_closed());
}

#[tokio::test]
async fn close_is_idempotent_and_safe_when_unused() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);

    queue.close().await;
    queue.close().await;

    assert!(queue.is_closed());
    let err = queue.subscribe("t", "s", Arc::new(Recorder::default()), immediate()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Closed));
}

#[tokio::test(start_paused = true)]
async fn subscribe_creates_topic_and_subscription() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = manager(&broker);

    let handle = queue.subscribe("video-processor", "video-sub", Arc::new(Recorder::default()), immediate())
        .await
        .unwrap();

    assert!(broker.has_subscription("video-sub"));
    assert_eq!(handle.subscription(), "video-sub");
    handle.cancel();
    assert!(handle.is_cancelled());
    queue.close().await;
}
