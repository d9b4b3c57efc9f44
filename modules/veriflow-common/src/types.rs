use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Status enums ---

/// Shared shape of every per-stage status field on a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Idle,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Whether a field may move from `from` (absent = `None`) to `to`.
    ///
    /// Progress only runs forward. A terminal field can be moved again only
    /// when `reentry` is set, i.e. the write is driven by a new inbound message.
    /// Re-writing the current value is always allowed.
    pub fn can_transition(from: Option<Self>, to: Self, reentry: bool) -> bool {
        use ProcessingStatus::*;

        let from = from.unwrap_or(Idle);
        if from == to {
            return true;
        }
        match (from, to) {
            (_, Idle) => false,
            (Idle, _) => true,
            (Pending, Processing | Completed | Failed) => true,
            (Processing, Completed | Failed) => true,
            (Processing, Pending) => reentry,
            (Completed | Failed, _) => reentry,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingStatus::Idle => "IDLE",
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ProcessingStatus::Idle),
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            // Older translation documents were written with SUCCESS.
            "COMPLETED" | "SUCCESS" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// The independent status fields carried by a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    FactCheck,
    Metadata,
    AiVideoSummary,
    SocialMediaScrape,
    Translation,
}

impl StatusField {
    /// Document key the field is stored under.
    pub fn key(self) -> &'static str {
        match self {
            StatusField::FactCheck => "fact_check_status",
            StatusField::Metadata => "metadata_status",
            StatusField::AiVideoSummary => "ai_video_summary_status",
            StatusField::SocialMediaScrape => "social_media_scrape_status",
            StatusField::Translation => "translation_status",
        }
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStatuses {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_check_status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_video_summary_status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_media_scrape_status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_status: Option<ProcessingStatus>,
}

impl VerificationStatuses {
    pub fn get(&self, field: StatusField) -> Option<ProcessingStatus> {
        match field {
            StatusField::FactCheck => self.fact_check_status,
            StatusField::Metadata => self.metadata_status,
            StatusField::AiVideoSummary => self.ai_video_summary_status,
            StatusField::SocialMediaScrape => self.social_media_scrape_status,
            StatusField::Translation => self.translation_status,
        }
    }

    pub fn set(&mut self, field: StatusField, status: ProcessingStatus) {
        let slot = match field {
            StatusField::FactCheck => &mut self.fact_check_status,
            StatusField::Metadata => &mut self.metadata_status,
            StatusField::AiVideoSummary => &mut self.ai_video_summary_status,
            StatusField::SocialMediaScrape => &mut self.social_media_scrape_status,
            StatusField::Translation => &mut self.translation_status,
        };
        *slot = Some(status);
    }
}

/// Lifecycle of uploaded media (transcoding), separate from the enrichment statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaState {
    ProcessingMedia,
    ReadyForUse,
    ProcessingFailed,
}

/// How the idempotency guard treats verifications that already completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReentryPolicy {
    /// Reprocess everything a message references.
    Always,
    /// Reprocess completed or failed verifications only on a first delivery attempt.
    #[default]
    FreshOnly,
    /// Never reprocess completed or failed verifications.
    Never,
}

impl FromStr for ReentryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(ReentryPolicy::Always),
            "fresh-only" | "fresh_only" => Ok(ReentryPolicy::FreshOnly),
            "never" => Ok(ReentryPolicy::Never),
            other => Err(format!("unknown re-entry policy: {other}")),
        }
    }
}

// --- Payload types ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ImageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    Facebook,
    Linkedin,
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocialPlatform::Facebook => write!(f, "facebook"),
            SocialPlatform::Linkedin => write!(f, "linkedin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMediaScrapeDetails {
    pub platform: SocialPlatform,
    pub url: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub post_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_profile_image: Option<String>,
    #[serde(default)]
    pub screenshot: Option<ImageRef>,
}

impl SocialMediaScrapeDetails {
    pub fn pending(platform: SocialPlatform, url: impl Into<String>) -> Self {
        Self {
            platform,
            url: url.into(),
            content: None,
            post_date: None,
            image_urls: Vec::new(),
            author_name: None,
            author_profile_image: None,
            screenshot: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewData {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedStatement {
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub short_summary: Option<String>,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub relevant_statements: Vec<TimedStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckReference {
    pub url: String,
    #[serde(default)]
    pub source_title: Option<String>,
    pub key_quote: String,
    pub is_supportive: bool,
}

/// Deep fact-check outcome as persisted on the verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckData {
    /// 0 = completely false, 1 = completely true.
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
    pub enhanced_statement: String,
    #[serde(default)]
    pub combined_statement: Option<String>,
    #[serde(default)]
    pub extracted_image_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreData {
    /// 0..=100.
    pub score: f64,
    pub reasoning: String,
    #[serde(default)]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaPlayback {
    pub hls: String,
    pub dash: String,
    pub mp4: String,
    pub thumbnail: String,
}

/// field name → language code → text.
pub type Translations = BTreeMap<String, BTreeMap<String, String>>;

// --- Verification ---

/// The central content entity. Stored as one document per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub id: Uuid,
    pub assignee_user_id: String,
    pub feed_id: Uuid,

    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub text_content_in_english: Option<String>,
    #[serde(default)]
    pub image_gallery: Vec<ImageRef>,
    #[serde(default)]
    pub youtube_id: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub preview_data: Option<PreviewData>,
    #[serde(default)]
    pub is_generated_news: bool,
    #[serde(default = "default_public")]
    pub is_public: bool,

    #[serde(flatten)]
    pub statuses: VerificationStatuses,

    #[serde(default)]
    pub fact_check_data: Option<FactCheckData>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub score_data: Option<ScoreData>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_video_summary: Option<VideoSummary>,
    #[serde(default)]
    pub social_media_scrape_details: Option<SocialMediaScrapeDetails>,
    #[serde(default)]
    pub social_media_scrape_error: Option<String>,
    #[serde(default)]
    pub media_state: Option<MediaState>,
    #[serde(default)]
    pub transcode_job_name: Option<String>,
    #[serde(default)]
    pub playback: Option<MediaPlayback>,
    #[serde(default)]
    pub translations: Translations,
    #[serde(default)]
    pub translation_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub translation_error: Option<String>,
    /// Reason recorded by the last terminal failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Correlation id for user feedback on the fact-check.
    #[serde(default)]
    pub trace_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_public() -> bool {
    true
}

impl Verification {
    pub fn new(assignee_user_id: impl Into<String>, feed_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            assignee_user_id: assignee_user_id.into(),
            feed_id,
            title: None,
            text_content: None,
            text_content_in_english: None,
            image_gallery: Vec::new(),
            youtube_id: None,
            sources: Vec::new(),
            preview_data: None,
            is_generated_news: false,
            is_public: true,
            statuses: VerificationStatuses::default(),
            fact_check_data: None,
            score: None,
            score_data: None,
            valid_until: None,
            ai_video_summary: None,
            social_media_scrape_details: None,
            social_media_scrape_error: None,
            media_state: None,
            transcode_job_name: None,
            playback: None,
            translations: Translations::new(),
            translation_completed_at: None,
            translation_error: None,
            error: None,
            trace_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_content = Some(text.into());
        self
    }

    pub fn with_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_gallery = urls.into_iter().map(ImageRef::new).collect();
        self
    }

    pub fn with_social_link(mut self, platform: SocialPlatform, url: impl Into<String>) -> Self {
        self.social_media_scrape_details = Some(SocialMediaScrapeDetails::pending(platform, url));
        self.statuses.social_media_scrape_status = Some(ProcessingStatus::Pending);
        self
    }

    pub fn generated(mut self) -> Self {
        self.is_generated_news = true;
        self
    }

    pub fn status(&self, field: StatusField) -> Option<ProcessingStatus> {
        self.statuses.get(field)
    }

    /// Every image a fact-check should OCR: gallery first, then the scrape
    /// screenshot, then images attached to the scraped post.
    pub fn images_for_ocr(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.image_gallery.iter().map(|i| i.url.clone()).collect();
        if let Some(details) = &self.social_media_scrape_details {
            if let Some(shot) = &details.screenshot {
                urls.push(shot.url.clone());
            }
            urls.extend(details.image_urls.iter().cloned());
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingStatus::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(ProcessingStatus::can_transition(None, Pending, false));
        assert!(ProcessingStatus::can_transition(Some(Pending), Processing, false));
        assert!(ProcessingStatus::can_transition(Some(Processing), Completed, false));
        assert!(ProcessingStatus::can_transition(Some(Pending), Failed, false));
        assert!(ProcessingStatus::can_transition(None, Failed, false));
    }

    #[test]
    fn terminal_states_need_explicit_reentry() {
        assert!(!ProcessingStatus::can_transition(Some(Completed), Pending, false));
        assert!(!ProcessingStatus::can_transition(Some(Failed), Pending, false));
        assert!(!ProcessingStatus::can_transition(Some(Completed), Failed, false));
        assert!(ProcessingStatus::can_transition(Some(Completed), Pending, true));
        assert!(ProcessingStatus::can_transition(Some(Failed), Pending, true));
    }

    #[test]
    fn rewriting_same_state_is_harmless() {
        assert!(ProcessingStatus::can_transition(Some(Completed), Completed, false));
        assert!(ProcessingStatus::can_transition(Some(Pending), Pending, false));
    }

    #[test]
    fn nothing_returns_to_idle() {
        assert!(!ProcessingStatus::can_transition(Some(Pending), Idle, true));
        assert!(!ProcessingStatus::can_transition(Some(Completed), Idle, true));
    }

    #[test]
    fn statuses_flatten_into_document() {
        let mut v = Verification::new("user-1", Uuid::new_v4()).with_text("claim X");
        v.statuses.set(StatusField::FactCheck, Pending);

        let doc = serde_json::to_value(&v).unwrap();
        assert_eq!(doc["fact_check_status"], "PENDING");
        assert!(doc.get("translation_status").is_none());

        let back: Verification = serde_json::from_value(doc).unwrap();
        assert_eq!(back.status(StatusField::FactCheck), Some(Pending));
    }

    #[test]
    fn legacy_success_parses_as_completed() {
        assert_eq!("SUCCESS".parse::<ProcessingStatus>().unwrap(), Completed);
    }

    #[test]
    fn ocr_images_include_scrape_screenshot_and_post_images() {
        let mut v = Verification::new("u", Uuid::new_v4()).with_images(["https://img/a.jpg"]);
        let mut details = SocialMediaScrapeDetails::pending(SocialPlatform::Facebook, "https://facebook.com/p/1");
        details.screenshot = Some(ImageRef::new("https://img/shot.jpg"));
        details.image_urls = vec!["https://img/post.jpg".into()];
        v.social_media_scrape_details = Some(details);

        assert_eq!(
            v.images_for_ocr(),
            vec!["https://img/a.jpg", "https://img/shot.jpg", "https://img/post.jpg"]
        );
    }
}
