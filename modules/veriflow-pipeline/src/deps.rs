//! Dependencies shared by every worker, built once at process start.

use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;
use veriflow_common::{topics, Config, RetryPolicy};
use veriflow_notify::NotificationDispatcher;
use veriflow_queue::QueueManager;
use veriflow_store::{UserDirectory, VerificationStore};

use crate::traits::{
    FactChecker, ImageFetcher, ObjectStorage, OcrService, PostParser, ScoreGenerator, SocialScraper, Transcoder,
    Transcriber, Translator, ValidityChecker, VideoSource, VideoSummarizer,
};

/// Tunables the pipelines read at run time.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fact_check_budget: u32,
    /// Used when the verification carries exactly one source.
    pub fact_check_budget_single_source: u32,
    pub video_max_duration_secs: u64,
    pub video_max_duration_extended_secs: u64,
    pub video_callback_timeout: Duration,
    pub check_fact_topic: String,
    pub translation_topic: String,
    pub social_media_topic: String,
    /// Scrape + parse attempts for one social link.
    pub scrape_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fact_check_budget: 30_000,
            fact_check_budget_single_source: 400_000,
            video_max_duration_secs: 4000,
            video_max_duration_extended_secs: 7200,
            video_callback_timeout: Duration::from_secs(600),
            check_fact_topic: topics::CHECK_FACT.to_string(),
            translation_topic: topics::TRANSLATION.to_string(),
            social_media_topic: topics::SOCIAL_MEDIA_SCRAPE.to_string(),
            scrape_retry: RetryPolicy::scrape(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fact_check_budget: config.fact_check_budget,
            fact_check_budget_single_source: config.fact_check_budget_single_source,
            video_max_duration_secs: config.video_max_duration_secs,
            video_max_duration_extended_secs: config.video_max_duration_extended_secs,
            video_callback_timeout: config.video_callback_timeout,
            check_fact_topic: config.check_fact.topic.clone(),
            translation_topic: config.translation.topic.clone(),
            social_media_topic: config.social_media_scrape.topic.clone(),
            scrape_retry: RetryPolicy::scrape(),
        }
    }

    /// Token budget for the deep check given how many sources are known.
    pub fn budget_for(&self, source_count: usize) -> u32 {
        if source_count == 1 {
            self.fact_check_budget_single_source
        } else {
            self.fact_check_budget
        }
    }
}

/// Context object handed to the orchestrator and every worker.
#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub store: Arc<dyn VerificationStore>,
    pub users: Arc<dyn UserDirectory>,
    pub queue: Arc<QueueManager>,
    pub notifier: Arc<NotificationDispatcher>,

    pub ocr: Arc<dyn OcrService>,
    pub validity: Arc<dyn ValidityChecker>,
    pub fact_checker: Arc<dyn FactChecker>,
    pub scorer: Arc<dyn ScoreGenerator>,
    pub translator: Arc<dyn Translator>,

    pub scraper: Arc<dyn SocialScraper>,
    pub parser: Arc<dyn PostParser>,
    pub storage: Arc<dyn ObjectStorage>,
    pub images: Arc<dyn ImageFetcher>,

    pub video: Arc<dyn VideoSource>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn VideoSummarizer>,
    pub transcoder: Arc<dyn Transcoder>,

    #[builder(default)]
    pub settings: PipelineSettings,
}
