use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;
use veriflow_common::{retry, Config, NotificationKind, NotificationRecord, PushMessage, RetryPolicy};
use veriflow_store::{CooldownCache, NotificationStore, StoreError, UserDirectory};

use crate::backend::{PushBackend, PushError};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub batch_size: usize,
    /// Pause between consecutive batches. Not applied after the last one.
    pub batch_delay: Duration,
    pub like_cooldown: Duration,
    pub impression_cooldown: Duration,
    /// Per-recipient send policy.
    pub retry: RetryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_delay: Duration::from_secs(1),
            like_cooldown: Duration::from_secs(300),
            impression_cooldown: Duration::from_secs(3600),
            retry: RetryPolicy::http(),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.notify_batch_size.max(1),
            batch_delay: config.notify_batch_delay,
            like_cooldown: config.like_cooldown,
            impression_cooldown: config.impression_cooldown,
            retry: RetryPolicy::http(),
        }
    }
}

/// High-frequency interactions whose pushes are throttled by a cooldown key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Like,
    /// View-count milestone. Throttled per target, whoever the sender is.
    Impression,
}

impl Interaction {
    fn kind(self) -> NotificationKind {
        match self {
            Interaction::Like => NotificationKind::Like,
            Interaction::Impression => NotificationKind::Impression,
        }
    }

    /// `<kind>:<sender>:<target>`.
    pub fn cooldown_key(self, sender: &str, target: Uuid) -> String {
        match self {
            Interaction::Like => format!("like:{sender}:{target}"),
            Interaction::Impression => format!("impression:*:{target}"),
        }
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub batches: usize,
    pub sent: usize,
    pub failed: usize,
    pub without_token: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionOutcome {
    pub recorded: bool,
    pub pushed: bool,
}

/// Sends push notifications to users, singly, in rate-limited batches, or
/// throttled by cooldown keys.
#[derive(Clone)]
pub struct NotificationDispatcher {
    backend: Arc<dyn PushBackend>,
    users: Arc<dyn UserDirectory>,
    records: Arc<dyn NotificationStore>,
    cooldowns: Arc<dyn CooldownCache>,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    pub fn new(
        backend: Arc<dyn PushBackend>,
        users: Arc<dyn UserDirectory>,
        records: Arc<dyn NotificationStore>,
        cooldowns: Arc<dyn CooldownCache>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            backend,
            users,
            records,
            cooldowns,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn records(&self) -> &Arc<dyn NotificationStore> {
        &self.records
    }

    async fn send_with_retry(&self, token: &str, message: &PushMessage) -> Result<bool, PushError> {
        retry(&self.settings.retry, "push", PushError::is_retryable, || {
            self.backend.send(token, message)
        })
        .await
    }

    /// Push to one user. Returns whether the provider accepted it; a missing
    /// token or a failed send is logged and reported as `false`.
    pub async fn notify_user(&self, user_id: &str, message: &PushMessage) -> bool {
        let profile = match self.users.profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id, error = %e, "Could not look up push token");
                return false;
            }
        };
        let Some(token) = profile.and_then(|p| p.push_token) else {
            debug!(user_id, "No push token for user");
            return false;
        };

        match self.send_with_retry(&token, message).await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(user_id, kind = message.kind.as_str(), error = %e, "Push notification failed");
                false
            }
        }
    }

    /// Push the same message to many users. Recipients are deduplicated by
    /// device token and sent in concurrent batches separated by the batch delay.
    /// A failing batch never stops the ones after it.
    pub async fn notify_many(&self, user_ids: &[String], message: &PushMessage) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();

        let mut unique_ids = Vec::with_capacity(user_ids.len());
        let mut seen_ids = HashSet::new();
        for id in user_ids {
            if seen_ids.insert(id.as_str()) {
                unique_ids.push(id.clone());
            } else {
                report.duplicates += 1;
            }
        }

        let profiles = self.users.profiles(&unique_ids).await?;
        let mut seen_tokens = HashSet::new();
        let mut tokens = Vec::new();
        let mut shared_tokens = 0;
        for profile in profiles {
            if let Some(token) = profile.push_token.filter(|t| !t.is_empty()) {
                if seen_tokens.insert(token.clone()) {
                    tokens.push(token);
                } else {
                    shared_tokens += 1;
                }
            }
        }
        report.duplicates += shared_tokens;
        report.without_token = unique_ids.len().saturating_sub(tokens.len() + shared_tokens);

        let batches: Vec<&[String]> = tokens.chunks(self.settings.batch_size.max(1)).collect();
        let total = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            let results = join_all(batch.iter().map(|token| self.send_with_retry(token, message))).await;
            for result in results {
                match result {
                    Ok(true) => report.sent += 1,
                    Ok(false) => report.failed += 1,
                    Err(e) => {
                        report.failed += 1;
                        debug!(error = %e, "Batch send failed for one recipient");
                    }
                }
            }
            report.batches += 1;
            debug!(batch = i + 1, total, "Notification batch sent");

            if i + 1 < total {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        info!(
            kind = message.kind.as_str(),
            batches = report.batches,
            sent = report.sent,
            failed = report.failed,
            duplicates = report.duplicates,
            "Batch notification complete"
        );
        Ok(report)
    }

    /// Record an interaction and push it unless the cooldown key for
    /// (interaction, sender, target) is live. The key is set before sending.
    pub async fn notify_interaction(
        &self,
        interaction: Interaction,
        sender: &str,
        recipient: &str,
        target: Uuid,
        message: &PushMessage,
    ) -> Result<InteractionOutcome, StoreError> {
        let record = NotificationRecord::new(
            recipient,
            interaction.kind(),
            json!({ "title": message.title, "body": message.body, "data": message.data }),
        )
        .from_sender(sender)
        .about(target);
        self.records.record(&record).await?;

        let ttl = match interaction {
            Interaction::Like => self.settings.like_cooldown,
            Interaction::Impression => self.settings.impression_cooldown,
        };
        let key = interaction.cooldown_key(sender, target);
        let fresh = match self.cooldowns.set_if_absent(&key, ttl).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(key, error = %e, "Cooldown check failed; suppressing push");
                false
            }
        };
        if !fresh {
            debug!(key, "Interaction push suppressed by cooldown");
            return Ok(InteractionOutcome {
                recorded: true,
                pushed: false,
            });
        }

        let pushed = self.notify_user(recipient, message).await;
        Ok(InteractionOutcome { recorded: true, pushed })
    }
}
