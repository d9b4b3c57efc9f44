// Trait abstractions for the external services the pipeline calls.
//
// Every AI model, scraper, storage bucket and transcoder sits behind one of
// these. Request and response types are validated with serde at the boundary
// and never passed around as untyped maps. `HttpCollaborators` implements all
// of them against the collaborator gateway; `testing` has in-memory mocks.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use veriflow_common::{
    FactCheckReference, MediaPlayback, PreviewData, ScoreData, SocialPlatform, Translations, VideoSummary,
};

// ---------------------------------------------------------------------------
// Fact-check collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageText {
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Per-image OCR results. Images that failed carry no text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub images: Vec<ImageText>,
}

impl OcrResult {
    pub fn successful(&self) -> usize {
        self.images
            .iter()
            .filter(|i| i.text.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .count()
    }

    /// Texts of the successful extractions, one block per image.
    pub fn combined_text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .images
            .iter()
            .filter_map(|i| i.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n\n"))
        }
    }
}

#[async_trait]
pub trait OcrService: Send + Sync {
    async fn extract_text(&self, image_urls: &[String]) -> Result<OcrResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityRequest {
    pub statement: String,
    pub image_urls: Vec<String>,
    /// Content came from a completed social-media scrape.
    pub is_social_media: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityVerdict {
    pub is_valid_for_fact_check: bool,
    #[serde(default)]
    pub enhanced_statement: String,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub preview_data: Option<PreviewData>,
}

#[async_trait]
pub trait ValidityChecker: Send + Sync {
    async fn check(&self, request: &ValidityRequest) -> Result<ValidityVerdict>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckRequest {
    pub statement: String,
    pub budget_tokens: u32,
}

/// Raw output of the deep fact-check model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub factuality: f64,
    pub reason: String,
    #[serde(default)]
    pub reason_summary: Option<String>,
    #[serde(default)]
    pub score_justification: Option<String>,
    #[serde(default)]
    pub fact_status: Option<String>,
    #[serde(default)]
    pub references: Vec<FactCheckReference>,
}

#[async_trait]
pub trait FactChecker: Send + Sync {
    /// `Ok(None)` when the model produced no usable result.
    async fn check(&self, request: &FactCheckRequest) -> Result<Option<FactCheckResult>>;
}

#[async_trait]
pub trait ScoreGenerator: Send + Sync {
    async fn score(&self, statement: &str, reason: &str) -> Result<ScoreData>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate each named text into every language in `languages`.
    async fn translate(&self, texts: &BTreeMap<String, String>, languages: &[&str]) -> Result<Translations>;
}

// ---------------------------------------------------------------------------
// Social media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    /// Page content rendered to markdown.
    pub content: String,
    #[serde(default)]
    pub screenshot_url: Option<String>,
}

#[async_trait]
pub trait SocialScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseRequest {
    pub markdown: String,
    pub platform: SocialPlatform,
    pub url: String,
    pub screenshot_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPost {
    #[serde(default)]
    pub is_broken_screenshot: bool,
    #[serde(default)]
    pub is_private_post: bool,
    pub text_content: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_profile_image: Option<String>,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[async_trait]
pub trait PostParser: Send + Sync {
    async fn parse(&self, request: &ParseRequest) -> Result<ParsedPost>;
}

// ---------------------------------------------------------------------------
// Storage and media
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `name` and return its public URL.
    async fn upload(&self, data: Vec<u8>, name: &str, content_type: &str) -> Result<String>;

    /// URL of an existing object, if there is one.
    async fn locate(&self, name: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub title: Option<String>,
}

#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn info(&self, url: &str) -> Result<VideoInfo>;

    async fn download_audio(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_uri: &str) -> Result<String>;
}

#[async_trait]
pub trait VideoSummarizer: Send + Sync {
    async fn summarize(&self, transcript: &str, video_title: Option<&str>) -> Result<VideoSummary>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeSubmission {
    pub job_name: String,
    pub playback: MediaPlayback,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn submit(&self, input_uri: &str, output_prefix: &str) -> Result<TranscodeSubmission>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_combines_only_successful_images() {
        let result = OcrResult {
            images: vec![
                ImageText {
                    url: "a".into(),
                    text: Some("first".into()),
                },
                ImageText {
                    url: "b".into(),
                    text: None,
                },
                ImageText {
                    url: "c".into(),
                    text: Some("  ".into()),
                },
                ImageText {
                    url: "d".into(),
                    text: Some("second".into()),
                },
            ],
        };
        assert_eq!(result.successful(), 2);
        assert_eq!(result.combined_text().as_deref(), Some("first\n\nsecond"));
    }

    #[test]
    fn verdict_defaults_missing_fields() {
        let v: ValidityVerdict = serde_json::from_str(r#"{"is_valid_for_fact_check": false}"#).unwrap();
        assert!(!v.is_valid_for_fact_check);
        assert!(v.error_reason.is_none());
        assert!(v.enhanced_statement.is_empty());
    }
}
