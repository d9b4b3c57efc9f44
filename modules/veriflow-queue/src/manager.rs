use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use typed_builder::TypedBuilder;
use veriflow_common::{retry, RetryPolicy};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::types::{FlowControl, ReceivedMessage, SubscriptionConfig};

/// Callback for messages pulled from a subscription.
///
/// `Ok` acks the message. `Err` nacks it for broker redelivery; the manager
/// never retries on its own.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SubscribeOptions {
    /// Handle one message at a time.
    #[builder(default)]
    pub sequential: bool,
    #[builder(default)]
    pub flow_control: FlowControl,
    #[builder(default)]
    pub subscription_config: SubscriptionConfig,
    /// On shutdown, let in-flight handlers finish instead of abandoning them.
    #[builder(default = true)]
    pub graceful_shutdown: bool,
}

/// Cancels one subscription's pull loop.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    subscription: String,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Owns the broker connection for publishers and long-lived subscribers.
pub struct QueueManager {
    broker: Arc<dyn Broker>,
    publish_policy: RetryPolicy,
    poll_interval: Duration,
    root: CancellationToken,
    known_topics: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    closed: AtomicBool,
}

impl QueueManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            publish_policy: RetryPolicy::publish(),
            poll_interval: Duration::from_millis(500),
            root: CancellationToken::new(),
            known_topics: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_publish_policy(mut self, policy: RetryPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serialize `payload` as JSON and publish it, retrying transient broker
    /// errors under the publish policy. Errors once the policy gives up; a
    /// single hung attempt is cut off at the policy's overall deadline.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<String, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let data = serde_json::to_vec(payload)?;
        self.ensure_topic(topic).await?;

        let deadline = self.publish_policy.total_timeout.map(|limit| Instant::now() + limit);
        let data = &data;
        let message_id = retry(&self.publish_policy, "publish", BrokerError::is_retryable, || async move {
            let attempt = self.broker.publish(topic, data.clone());
            match deadline {
                Some(deadline) => timeout_at(deadline, attempt)
                    .await
                    .unwrap_or_else(|_| Err(BrokerError::PublishTimeout(topic.to_string()))),
                None => attempt.await,
            }
        })
        .await?;

        debug!(topic, message_id = %message_id, "Published");
        Ok(message_id)
    }

    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let mut known = self.known_topics.lock().await;
        if !known.contains(topic) {
            self.broker.ensure_topic(topic).await?;
            known.insert(topic.to_string());
        }
        Ok(())
    }

    /// Ensure the topic and subscription exist, then spawn a pull loop that
    /// dispatches every message to `handler` under the flow-control bounds.
    pub async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.ensure_topic(topic).await?;
        self.broker
            .ensure_subscription(topic, subscription, &options.subscription_config)
            .await?;

        let token = self.root.child_token();
        let pull_loop = PullLoop {
            broker: self.broker.clone(),
            subscription: subscription.to_string(),
            handler,
            options,
            poll_interval: self.poll_interval,
            token: token.clone(),
        };
        let task = tokio::spawn(pull_loop.run());
        self.tasks.lock().await.push((subscription.to_string(), task));

        info!(topic, subscription, "Subscribed");
        Ok(SubscriptionHandle {
            subscription: subscription.to_string(),
            token,
        })
    }

    /// Cancel every subscription, wait for the pull loops to wind down and
    /// release the broker. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.root.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (subscription, task) in tasks {
            if let Err(e) = task.await {
                warn!(subscription, error = %e, "Subscription task ended abnormally");
            }
        }
        self.broker.close().await;
        info!("Queue manager closed");
    }
}

// ---------------------------------------------------------------------------
// Pull loop
// ---------------------------------------------------------------------------

struct PullLoop {
    broker: Arc<dyn Broker>,
    subscription: String,
    handler: Arc<dyn MessageHandler>,
    options: SubscribeOptions,
    poll_interval: Duration,
    token: CancellationToken,
}

impl PullLoop {
    async fn run(self) {
        let flow = self.options.flow_control;
        let max_messages = if self.options.sequential { 1 } else { flow.max_messages.max(1) };
        let max_bytes = flow.max_bytes.clamp(1, u32::MAX as usize);
        let count = Arc::new(Semaphore::new(max_messages));
        let bytes = Arc::new(Semaphore::new(max_bytes));
        let mut inflight = JoinSet::new();

        'pull: loop {
            while let Some(done) = inflight.try_join_next() {
                if let Err(e) = done {
                    error!(subscription = %self.subscription, error = %e, "Dispatch task failed");
                }
            }

            let room = count.available_permits();
            if room == 0 {
                tokio::select! {
                    _ = self.token.cancelled() => break 'pull,
                    _ = inflight.join_next() => continue 'pull,
                }
            }

            let pulled = tokio::select! {
                _ = self.token.cancelled() => break 'pull,
                r = self.broker.pull(&self.subscription, room) => r,
            };
            let messages = match pulled {
                Ok(messages) if !messages.is_empty() => messages,
                Ok(_) => {
                    if self.idle().await {
                        break 'pull;
                    }
                    continue 'pull;
                }
                Err(e) => {
                    warn!(subscription = %self.subscription, error = %e, "Pull failed");
                    if self.idle().await {
                        break 'pull;
                    }
                    continue 'pull;
                }
            };

            let mut pending = messages.into_iter();
            while let Some(message) = pending.next() {
                let Ok(slot) = count.clone().acquire_owned().await else {
                    break 'pull;
                };
                let size = message.size().clamp(1, max_bytes) as u32;
                let budget = tokio::select! {
                    _ = self.token.cancelled() => None,
                    p = bytes.clone().acquire_many_owned(size) => p.ok(),
                };
                let Some(budget) = budget else {
                    self.release(std::iter::once(message).chain(pending)).await;
                    break 'pull;
                };

                let handled = dispatch(
                    self.broker.clone(),
                    self.subscription.clone(),
                    self.handler.clone(),
                    message,
                    flow.max_lease,
                );
                inflight.spawn(async move {
                    handled.await;
                    drop(slot);
                    drop(budget);
                });
            }
        }

        if self.options.graceful_shutdown {
            let remaining = inflight.len();
            if remaining > 0 {
                info!(subscription = %self.subscription, remaining, "Draining in-flight messages");
            }
            while inflight.join_next().await.is_some() {}
        } else {
            inflight.abort_all();
        }
        info!(subscription = %self.subscription, "Subscription stopped");
    }

    /// Sleep one poll interval. Returns true if cancelled meanwhile.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(self.poll_interval) => false,
        }
    }

    /// Hand back leased messages that were never dispatched.
    async fn release(&self, messages: impl Iterator<Item = ReceivedMessage>) {
        for message in messages {
            if let Err(e) = self.broker.nack(&self.subscription, &message.ack_id).await {
                debug!(message_id = %message.message_id, error = %e, "Release failed; lease will expire");
            }
        }
    }
}

async fn dispatch(
    broker: Arc<dyn Broker>,
    subscription: String,
    handler: Arc<dyn MessageHandler>,
    message: ReceivedMessage,
    lease: Duration,
) {
    let span = info_span!(
        "message",
        subscription = %subscription,
        message_id = %message.message_id,
        delivery_attempt = message.delivery_attempt,
    );

    async move {
        if let Err(e) = broker.extend_lease(&subscription, &message.ack_id, lease).await {
            warn!(error = %e, "Could not extend lease");
        }

        let outcome = tokio::time::timeout(lease, AssertUnwindSafe(handler.handle(&message)).catch_unwind()).await;
        let ack = match outcome {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                warn!(error = %format!("{e:#}"), "Handler failed; nacking");
                false
            }
            Ok(Err(_)) => {
                error!("Handler panicked; nacking");
                false
            }
            Err(_) => {
                warn!(lease_secs = lease.as_secs(), "Handler exceeded lease; nacking");
                false
            }
        };

        let result = if ack {
            broker.ack(&subscription, &message.ack_id).await
        } else {
            broker.nack(&subscription, &message.ack_id).await
        };
        if let Err(e) = result {
            warn!(ack, error = %e, "Could not settle message");
        }
    }
    .instrument(span)
    .await
}
