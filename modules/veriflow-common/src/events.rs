//! Messages exchanged between pipeline stages over the broker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod topics {
    pub const CHECK_FACT: &str = "check-fact";
    pub const TRANSLATION: &str = "translation";
    pub const SOCIAL_MEDIA_SCRAPE: &str = "social-media-scrape";
    pub const VIDEO_PROCESSOR: &str = "video-processor";
    pub const TRANSCODER: &str = "transcoder";
}

/// Runs the fact-check orchestrator over every referenced verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFactEvent {
    pub verifications: Vec<Uuid>,
}

impl CheckFactEvent {
    pub fn single(id: Uuid) -> Self {
        Self {
            verifications: vec![id],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationEvent {
    pub verification_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMediaScrapeEvent {
    pub verification_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProcessorEvent {
    pub verification_id: Uuid,
    pub youtube_url: String,
    pub external_user_id: String,
    #[serde(default)]
    pub video_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub name: String,
    pub state: String,
}

impl TranscodeJob {
    pub fn succeeded(&self) -> bool {
        self.state == "SUCCEEDED"
    }
}

/// Completion notice emitted by the transcoding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJobEvent {
    pub job: TranscodeJob,
}
