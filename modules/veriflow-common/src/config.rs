use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::events::topics;
use crate::types::ReentryPolicy;

/// Topic a worker consumes and the subscription it pulls through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    pub topic: String,
    pub subscription: String,
}

impl TopicBinding {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subscription: format!("{topic}-sub"),
        }
    }

    fn from_env(prefix: &str, default_topic: &str) -> Self {
        let topic = std::env::var(format!("{prefix}_TOPIC")).unwrap_or_else(|_| default_topic.to_string());
        let subscription =
            std::env::var(format!("{prefix}_SUBSCRIPTION")).unwrap_or_else(|_| format!("{topic}-sub"));
        Self { topic, subscription }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Runtime
    pub health_port: u16,
    pub graceful_shutdown: bool,
    pub poll_interval: Duration,
    pub log_json: bool,

    // Topics
    pub check_fact: TopicBinding,
    pub translation: TopicBinding,
    pub social_media_scrape: TopicBinding,
    pub video_processor: TopicBinding,
    pub transcoder: TopicBinding,

    // Flow control
    pub max_outstanding_messages: usize,
    pub max_outstanding_bytes: usize,
    pub max_lease: Duration,

    // Delivery attempt ceilings
    pub check_fact_max_attempts: u32,
    pub translation_max_attempts: u32,
    pub social_max_attempts: u32,
    pub video_max_attempts: u32,
    pub reentry_policy: ReentryPolicy,

    // Notifications
    pub notify_batch_size: usize,
    pub notify_batch_delay: Duration,
    pub like_cooldown: Duration,
    pub impression_cooldown: Duration,
    pub chat_debounce: Duration,
    pub push_endpoint: String,
    pub push_access_token: Option<String>,

    // Video
    pub video_callback_timeout: Duration,
    pub video_max_duration_secs: u64,
    pub video_max_duration_extended_secs: u64,

    // Fact check
    pub fact_check_budget: u32,
    pub fact_check_budget_single_source: u32,

    // Collaborators
    pub collaborator_url: String,
    pub collaborator_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            health_port: 8080,
            graceful_shutdown: true,
            poll_interval: Duration::from_millis(500),
            log_json: false,
            check_fact: TopicBinding::new(topics::CHECK_FACT),
            translation: TopicBinding::new(topics::TRANSLATION),
            social_media_scrape: TopicBinding::new(topics::SOCIAL_MEDIA_SCRAPE),
            video_processor: TopicBinding::new(topics::VIDEO_PROCESSOR),
            transcoder: TopicBinding::new(topics::TRANSCODER),
            max_outstanding_messages: 50,
            max_outstanding_bytes: 50 * 1024 * 1024,
            max_lease: Duration::from_secs(600),
            check_fact_max_attempts: 2,
            translation_max_attempts: 5,
            social_max_attempts: 3,
            video_max_attempts: 3,
            reentry_policy: ReentryPolicy::default(),
            notify_batch_size: 100,
            notify_batch_delay: Duration::from_secs(1),
            like_cooldown: Duration::from_secs(300),
            impression_cooldown: Duration::from_secs(3600),
            chat_debounce: Duration::from_secs(3),
            push_endpoint: "https://exp.host/--/api/v2/push/send".to_string(),
            push_access_token: None,
            video_callback_timeout: Duration::from_secs(600),
            video_max_duration_secs: 4000,
            video_max_duration_extended_secs: 7200,
            fact_check_budget: 30_000,
            fact_check_budget_single_source: 400_000,
            collaborator_url: "http://localhost:8000".to_string(),
            collaborator_api_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            health_port: env_or("HEALTH_PORT", d.health_port)?,
            graceful_shutdown: env_or("GRACEFUL_SHUTDOWN", d.graceful_shutdown)?,
            poll_interval: Duration::from_millis(env_or("POLL_INTERVAL_MS", 500u64)?),
            log_json: std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            check_fact: TopicBinding::from_env("CHECK_FACT", topics::CHECK_FACT),
            translation: TopicBinding::from_env("TRANSLATION", topics::TRANSLATION),
            social_media_scrape: TopicBinding::from_env("SOCIAL_MEDIA_SCRAPE", topics::SOCIAL_MEDIA_SCRAPE),
            video_processor: TopicBinding::from_env("VIDEO_PROCESSOR", topics::VIDEO_PROCESSOR),
            transcoder: TopicBinding::from_env("TRANSCODER", topics::TRANSCODER),
            max_outstanding_messages: env_or("MAX_OUTSTANDING_MESSAGES", d.max_outstanding_messages)?,
            max_outstanding_bytes: env_or("MAX_OUTSTANDING_BYTES", d.max_outstanding_bytes)?,
            max_lease: secs_or("MAX_LEASE_SECS", d.max_lease)?,
            check_fact_max_attempts: env_or("CHECK_FACT_MAX_ATTEMPTS", d.check_fact_max_attempts)?,
            translation_max_attempts: env_or("TRANSLATION_MAX_ATTEMPTS", d.translation_max_attempts)?,
            social_max_attempts: env_or("SOCIAL_MAX_ATTEMPTS", d.social_max_attempts)?,
            video_max_attempts: env_or("VIDEO_MAX_ATTEMPTS", d.video_max_attempts)?,
            reentry_policy: match std::env::var("REENTRY_POLICY") {
                Ok(raw) => raw.parse().map_err(|e: String| anyhow!(e))?,
                Err(_) => d.reentry_policy,
            },
            notify_batch_size: env_or("NOTIFY_BATCH_SIZE", d.notify_batch_size)?,
            notify_batch_delay: Duration::from_millis(env_or("NOTIFY_BATCH_DELAY_MS", 1000u64)?),
            like_cooldown: secs_or("LIKE_COOLDOWN_SECS", d.like_cooldown)?,
            impression_cooldown: secs_or("IMPRESSION_COOLDOWN_SECS", d.impression_cooldown)?,
            chat_debounce: Duration::from_millis(env_or("CHAT_DEBOUNCE_MS", 3000u64)?),
            push_endpoint: std::env::var("PUSH_ENDPOINT").unwrap_or(d.push_endpoint),
            push_access_token: std::env::var("PUSH_ACCESS_TOKEN").ok(),
            video_callback_timeout: secs_or("VIDEO_CALLBACK_TIMEOUT_SECS", d.video_callback_timeout)?,
            video_max_duration_secs: env_or("VIDEO_MAX_DURATION_SECS", d.video_max_duration_secs)?,
            video_max_duration_extended_secs: env_or(
                "VIDEO_MAX_DURATION_EXTENDED_SECS",
                d.video_max_duration_extended_secs,
            )?,
            fact_check_budget: env_or("FACT_CHECK_BUDGET", d.fact_check_budget)?,
            fact_check_budget_single_source: env_or(
                "FACT_CHECK_BUDGET_SINGLE_SOURCE",
                d.fact_check_budget_single_source,
            )?,
            collaborator_url: std::env::var("COLLABORATOR_URL").unwrap_or(d.collaborator_url),
            collaborator_api_key: std::env::var("COLLABORATOR_API_KEY").ok(),
        };
        Ok(config)
    }

    /// Log the loaded configuration with secrets shortened to a prefix.
    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!("  COLLABORATOR_URL: {}", self.collaborator_url);
        tracing::info!("  COLLABORATOR_API_KEY: {}", preview_opt(&self.collaborator_api_key));
        tracing::info!("  PUSH_ENDPOINT: {}", self.push_endpoint);
        tracing::info!("  PUSH_ACCESS_TOKEN: {}", preview_opt(&self.push_access_token));
        tracing::info!(
            "  flow control: {} messages / {} bytes / {}s lease",
            self.max_outstanding_messages,
            self.max_outstanding_bytes,
            self.max_lease.as_secs()
        );
        tracing::info!("  re-entry policy: {:?}", self.reentry_policy);
    }
}

fn preview(val: &str) -> String {
    let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
    format!("{}...({} chars)", &val[..n], val.chars().count())
}

fn preview_opt(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => preview(v),
        _ => "<not set>".to_string(),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} has an invalid value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn secs_or(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.max_outstanding_messages, 50);
        assert_eq!(c.max_outstanding_bytes, 52_428_800);
        assert_eq!(c.max_lease, Duration::from_secs(600));
        assert_eq!(c.check_fact_max_attempts, 2);
        assert_eq!(c.reentry_policy, ReentryPolicy::FreshOnly);
        assert_eq!(c.check_fact.subscription, "check-fact-sub");
    }

    #[test]
    fn preview_hides_most_of_a_secret() {
        assert_eq!(preview("sk-abcdefgh"), "sk-ab...(11 chars)");
        assert_eq!(preview_opt(&None), "<not set>");
    }
}
