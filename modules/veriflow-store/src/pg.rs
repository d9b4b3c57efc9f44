//! Postgres implementations. Verifications are JSONB documents; each
//! mutation locks its row with `SELECT ... FOR UPDATE` inside a transaction.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;
use veriflow_common::{NotificationKind, NotificationRecord, ProcessingStatus, StatusField, Verification};

use crate::error::StoreError;
use crate::traits::{CooldownCache, NotificationStore, UserDirectory, UserProfile, VerificationStore};
use crate::update::{ApplyOutcome, VerificationUpdate};

// ---------------------------------------------------------------------------
// Verifications
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgVerificationStore {
    pool: PgPool,
}

impl PgVerificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationStore for PgVerificationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Verification>, StoreError> {
        let row = sqlx::query_as::<_, (Json<Verification>,)>("SELECT doc FROM verifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(Json(v),)| v))
    }

    async fn insert(&self, verification: &Verification) -> Result<(), StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO verifications (id, doc, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(verification.id)
        .bind(Json(verification))
        .bind(verification.created_at)
        .bind(verification.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Conflict(format!("verification {} exists", verification.id)));
        }
        Ok(())
    }

    async fn statuses(
        &self,
        ids: &[Uuid],
        field: StatusField,
    ) -> Result<HashMap<Uuid, Option<ProcessingStatus>>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Option<String>)>(
            "SELECT id, doc->>$2 FROM verifications WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(field.key())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, raw)| (id, raw.and_then(|s| s.parse().ok())))
            .collect())
    }

    async fn apply(&self, id: Uuid, update: &VerificationUpdate) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (Json<Verification>,)>(
            "SELECT doc FROM verifications WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((Json(mut doc),)) = row else {
            return Ok(ApplyOutcome::NotFound);
        };
        if let Err(reason) = update.apply_to(&mut doc) {
            debug!(verification_id = %id, reason = %reason, "Update rejected");
            return Ok(ApplyOutcome::Rejected(reason));
        }

        sqlx::query("UPDATE verifications SET doc = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(Json(&doc))
            .bind(doc.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn find_summarized_video(&self, youtube_id: &str) -> Result<Option<Verification>, StoreError> {
        let row = sqlx::query_as::<_, (Json<Verification>,)>(
            r#"
            SELECT doc FROM verifications
            WHERE doc->>'youtube_id' = $1
              AND doc->>'ai_video_summary_status' = 'COMPLETED'
              AND jsonb_typeof(doc->'ai_video_summary') = 'object'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(youtube_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(v),)| v))
    }

    async fn find_by_transcode_job(&self, job_name: &str) -> Result<Option<Verification>, StoreError> {
        let row = sqlx::query_as::<_, (Json<Verification>,)>(
            "SELECT doc FROM verifications WHERE doc->>'transcode_job_name' = $1 LIMIT 1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(v),)| v))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgCooldownCache {
    pool: PgPool,
}

impl PgCooldownCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CooldownCache for PgCooldownCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        // An expired key is overwritten; a live one leaves the row untouched
        // and RETURNING yields nothing.
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            INSERT INTO cooldowns (key, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE cooldowns.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT key FROM cooldowns WHERE key = $1 AND expires_at > now()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UserProfile {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(UserProfile {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            push_token: row.try_get("push_token")?,
            can_summarize: row.try_get("can_summarize")?,
        })
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let user = sqlx::query_as::<_, UserProfile>(
            "SELECT id, username, push_token, can_summarize FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<UserProfile>, StoreError> {
        let users = sqlx::query_as::<_, UserProfile>(
            "SELECT id, username, push_token, can_summarize FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// Notification records
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn record(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient, sender, kind, verification_id, payload, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.recipient)
        .bind(&record.sender)
        .bind(record.kind.as_str())
        .bind(record.verification_id)
        .bind(&record.payload)
        .bind(record.read)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_recipient(&self, recipient: &str) -> Result<Vec<NotificationRecord>, StoreError> {
        type Row = (
            Uuid,
            String,
            Option<String>,
            String,
            Option<Uuid>,
            serde_json::Value,
            bool,
            DateTime<Utc>,
        );
        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT id, recipient, sender, kind, verification_id, payload, read, created_at
            FROM notifications
            WHERE recipient = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, recipient, sender, kind, verification_id, payload, read, created_at)| -> Result<_, StoreError> {
                let kind: NotificationKind = serde_json::from_value(serde_json::Value::String(kind))?;
                Ok(NotificationRecord {
                    id,
                    recipient,
                    sender,
                    kind,
                    verification_id,
                    payload,
                    read,
                    created_at,
                })
            })
            .collect()
    }
}
