use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;
use veriflow_common::{NotificationRecord, ProcessingStatus, StatusField, Verification};

use crate::error::StoreError;
use crate::update::{ApplyOutcome, VerificationUpdate};

/// Document store for verifications. Every mutation is an atomic
/// read-modify-write of a single document.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Verification>, StoreError>;

    /// Fails with `Conflict` when the id already exists.
    async fn insert(&self, verification: &Verification) -> Result<(), StoreError>;

    /// One status field for many ids in a single read. Unknown ids are left out.
    async fn statuses(
        &self,
        ids: &[Uuid],
        field: StatusField,
    ) -> Result<HashMap<Uuid, Option<ProcessingStatus>>, StoreError>;

    async fn apply(&self, id: Uuid, update: &VerificationUpdate) -> Result<ApplyOutcome, StoreError>;

    /// Apply the same update to each id. Returns how many documents changed.
    async fn apply_many(&self, ids: &[Uuid], update: &VerificationUpdate) -> Result<usize, StoreError> {
        let mut applied = 0;
        for id in ids {
            if self.apply(*id, update).await?.applied() {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// A verification for the same video whose summary already completed.
    async fn find_summarized_video(&self, youtube_id: &str) -> Result<Option<Verification>, StoreError>;

    async fn find_by_transcode_job(&self, job_name: &str) -> Result<Option<Verification>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Short-lived keys that suppress repeated notifications.
#[async_trait]
pub trait CooldownCache: Send + Sync {
    /// Set `key` for `ttl` unless it is already live. True when this call set it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub username: Option<String>,
    pub push_token: Option<String>,
    pub can_summarize: bool,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            push_token: None,
            can_summarize: false,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    pub fn with_username(mut self, name: impl Into<String>) -> Self {
        self.username = Some(name.into());
        self
    }

    pub fn summarizer(mut self) -> Self {
        self.can_summarize = true;
        self
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Profiles for many users in one read. Unknown ids are left out.
    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<UserProfile>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn record(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    /// Newest first.
    async fn for_recipient(&self, recipient: &str) -> Result<Vec<NotificationRecord>, StoreError>;
}
