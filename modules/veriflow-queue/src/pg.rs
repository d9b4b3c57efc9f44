//! Postgres-backed broker. Topics, subscriptions and per-subscription message
//! copies live in three tables; leases are `visible_at` deadlines claimed with
//! `FOR UPDATE SKIP LOCKED`, so any number of workers can pull concurrently.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::types::{ReceivedMessage, SubscriptionConfig};

#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_ack_id(ack_id: &str) -> Result<Uuid, BrokerError> {
    Uuid::parse_str(ack_id).map_err(|_| BrokerError::UnknownAckId(ack_id.to_string()))
}

#[async_trait]
impl Broker for PgBroker {
    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        sqlx::query("INSERT INTO broker_topics (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(topic)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_subscription(
        &self,
        topic: &str,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<(), BrokerError> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT name FROM broker_topics WHERE name = $1")
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO broker_subscriptions (name, topic, ack_deadline_secs, min_backoff_secs, max_backoff_secs)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(subscription)
        .bind(topic)
        .bind(config.ack_deadline.as_secs_f64())
        .bind(config.min_backoff.as_secs_f64())
        .bind(config.max_backoff.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, BrokerError> {
        let message_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let exists: Option<(String,)> = sqlx::query_as("SELECT name FROM broker_topics WHERE name = $1")
            .bind(topic)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }

        let copies = sqlx::query(
            r#"
            INSERT INTO broker_messages (message_id, subscription, data)
            SELECT $1, s.name, $2
            FROM broker_subscriptions s
            WHERE s.topic = $3
            "#,
        )
        .bind(message_id)
        .bind(&data)
        .bind(topic)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        debug!(topic, %message_id, copies, "Published message");
        Ok(message_id.to_string())
    }

    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, Vec<u8>, i32, DateTime<Utc>)>(
            r#"
            WITH next AS (
                SELECT m.id
                FROM broker_messages m
                WHERE m.subscription = $1 AND m.visible_at <= now()
                ORDER BY m.id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE broker_messages m
            SET delivery_attempt = m.delivery_attempt + 1,
                ack_id = gen_random_uuid(),
                visible_at = now() + make_interval(secs => s.ack_deadline_secs)
            FROM next, broker_subscriptions s
            WHERE m.id = next.id AND s.name = m.subscription
            RETURNING m.ack_id, m.message_id, m.data, m.delivery_attempt, m.published_at
            "#,
        )
        .bind(subscription)
        .bind(max_messages as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ack_id, message_id, data, attempt, publish_time)| ReceivedMessage {
                ack_id: ack_id.to_string(),
                message_id: message_id.to_string(),
                data,
                delivery_attempt: attempt.max(1) as u32,
                publish_time,
            })
            .collect())
    }

    async fn ack(&self, subscription: &str, ack_id: &str) -> Result<(), BrokerError> {
        let affected = sqlx::query(
            r#"
            DELETE FROM broker_messages
            WHERE subscription = $1 AND ack_id = $2 AND visible_at > now()
            "#,
        )
        .bind(subscription)
        .bind(parse_ack_id(ack_id)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(BrokerError::UnknownAckId(ack_id.to_string()));
        }
        Ok(())
    }

    async fn nack(&self, subscription: &str, ack_id: &str) -> Result<(), BrokerError> {
        let affected = sqlx::query(
            r#"
            UPDATE broker_messages m
            SET ack_id = NULL,
                visible_at = now() + make_interval(secs => LEAST(
                    s.max_backoff_secs,
                    s.min_backoff_secs * power(2, GREATEST(m.delivery_attempt - 1, 0))
                ))
            FROM broker_subscriptions s
            WHERE s.name = m.subscription
              AND m.subscription = $1 AND m.ack_id = $2 AND m.visible_at > now()
            "#,
        )
        .bind(subscription)
        .bind(parse_ack_id(ack_id)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(BrokerError::UnknownAckId(ack_id.to_string()));
        }
        Ok(())
    }

    async fn extend_lease(&self, subscription: &str, ack_id: &str, lease: Duration) -> Result<(), BrokerError> {
        let affected = sqlx::query(
            r#"
            UPDATE broker_messages
            SET visible_at = now() + make_interval(secs => $3)
            WHERE subscription = $1 AND ack_id = $2 AND visible_at > now()
            "#,
        )
        .bind(subscription)
        .bind(parse_ack_id(ack_id)?)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(BrokerError::UnknownAckId(ack_id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
