//! In-memory implementations (tests and local runs, no database required).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;
use veriflow_common::{NotificationRecord, ProcessingStatus, StatusField, Verification};

use crate::error::StoreError;
use crate::traits::{CooldownCache, NotificationStore, UserDirectory, UserProfile, VerificationStore};
use crate::update::{ApplyOutcome, VerificationUpdate};

// ---------------------------------------------------------------------------
// Verifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryVerificationStore {
    docs: Mutex<HashMap<Uuid, Verification>>,
    unavailable: AtomicBool,
}

impl MemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every call fails until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Snapshot of a document without going through the async trait.
    pub fn snapshot(&self, id: Uuid) -> Option<Verification> {
        self.docs.lock().unwrap().get(&id).cloned()
    }

    /// Change a document in place, skipping guards and transition checks.
    pub fn edit(&self, id: Uuid, f: impl FnOnce(&mut Verification)) {
        if let Some(v) = self.docs.lock().unwrap().get_mut(&id) {
            f(v);
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for MemoryVerificationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Verification>, StoreError> {
        self.check()?;
        Ok(self.docs.lock().unwrap().get(&id).cloned())
    }

    async fn insert(&self, verification: &Verification) -> Result<(), StoreError> {
        self.check()?;
        let mut docs = self.docs.lock().unwrap();
        if docs.contains_key(&verification.id) {
            return Err(StoreError::Conflict(format!("verification {} exists", verification.id)));
        }
        docs.insert(verification.id, verification.clone());
        Ok(())
    }

    async fn statuses(
        &self,
        ids: &[Uuid],
        field: StatusField,
    ) -> Result<HashMap<Uuid, Option<ProcessingStatus>>, StoreError> {
        self.check()?;
        let docs = self.docs.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id).map(|v| (*id, v.status(field))))
            .collect())
    }

    async fn apply(&self, id: Uuid, update: &VerificationUpdate) -> Result<ApplyOutcome, StoreError> {
        self.check()?;
        let mut docs = self.docs.lock().unwrap();
        let Some(current) = docs.get(&id) else {
            return Ok(ApplyOutcome::NotFound);
        };
        let mut next = current.clone();
        match update.apply_to(&mut next) {
            Ok(()) => {
                docs.insert(id, next);
                Ok(ApplyOutcome::Applied)
            }
            Err(reason) => Ok(ApplyOutcome::Rejected(reason)),
        }
    }

    async fn find_summarized_video(&self, youtube_id: &str) -> Result<Option<Verification>, StoreError> {
        self.check()?;
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .values()
            .find(|v| {
                v.youtube_id.as_deref() == Some(youtube_id)
                    && v.status(StatusField::AiVideoSummary) == Some(ProcessingStatus::Completed)
                    && v.ai_video_summary.is_some()
            })
            .cloned())
    }

    async fn find_by_transcode_job(&self, job_name: &str) -> Result<Option<Verification>, StoreError> {
        self.check()?;
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .values()
            .find(|v| v.transcode_job_name.as_deref() == Some(job_name))
            .cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCooldownCache {
    keys: Mutex<HashMap<String, Instant>>,
}

impl MemoryCooldownCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownCache for MemoryCooldownCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut keys = self.keys.lock().unwrap();
        match keys.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                keys.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|expires| *expires > now))
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<String, UserProfile>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = UserProfile>) -> Self {
        let dir = Self::new();
        for user in users {
            dir.upsert(user);
        }
        dir
    }

    pub fn upsert(&self, user: UserProfile) {
        self.users.lock().unwrap().insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<UserProfile>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(user_ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }
}

// ---------------------------------------------------------------------------
// Notification records
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryNotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn record(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn for_recipient(&self, recipient: &str) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut out: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.recipient == recipient)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
