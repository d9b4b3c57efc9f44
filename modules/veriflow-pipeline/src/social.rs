//! Social-media link scraping: scrape and parse the post, store its images,
//! then hand the verification to the fact check.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use veriflow_common::{
    retry, CheckFactEvent, ImageRef, PipelineError, ProcessingStatus, SocialMediaScrapeDetails,
    SocialMediaScrapeEvent, SocialPlatform, StatusField, Verification,
};
use veriflow_store::{ApplyOutcome, FieldSet, VerificationUpdate};

use crate::deps::PipelineDeps;
use crate::messages;
use crate::traits::{ParseRequest, ParsedPost, ScrapedPage};

/// Scrape rounds allowed when storing images fails (image URLs expire).
pub const MAX_IMAGE_ROUNDS: u32 = 2;

static FACEBOOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://([a-z0-9-]+\.)*(facebook\.com|fb\.com|fb\.watch)(/|$)").expect("valid regex")
});
static LINKEDIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://([a-z0-9-]+\.)*linkedin\.com(/|$)").expect("valid regex"));

pub fn detect_platform(url: &str) -> Option<SocialPlatform> {
    let url = url.trim();
    if FACEBOOK_RE.is_match(url) {
        Some(SocialPlatform::Facebook)
    } else if LINKEDIN_RE.is_match(url) {
        Some(SocialPlatform::Linkedin)
    } else {
        None
    }
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Scrape failed: {0}")]
    Scrape(String),

    #[error("Parse failed: {0}")]
    Parse(String),

    #[error("No screenshot returned")]
    NoScreenshot,

    #[error("Screenshot is broken")]
    BrokenScreenshot,

    #[error("Storing images failed: {0}")]
    Images(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocialOutcome {
    Completed,
    /// Scraped earlier; the fact-check hand-off was published again.
    HandedOff,
    /// Scraped, but the post is not public so it cannot be checked.
    Private,
    Failed { reason: String },
    /// A concurrent write moved the scrape to a state this run may not overwrite.
    Superseded,
    Skipped(&'static str),
}

struct StoredImages {
    screenshot: ImageRef,
    images: Vec<String>,
}

#[derive(Clone)]
pub struct SocialMediaPipeline {
    deps: PipelineDeps,
}

impl SocialMediaPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Create a verification for a social link and queue its scrape.
    pub async fn submit_link(&self, owner: &str, feed_id: Uuid, url: &str) -> Result<Verification, PipelineError> {
        let platform = detect_platform(url)
            .ok_or_else(|| PipelineError::ContentInvalid(format!("unsupported social link: {url}")))?;
        let v = Verification::new(owner, feed_id).with_social_link(platform, url.trim());
        self.deps.store.insert(&v).await?;

        let event = SocialMediaScrapeEvent { verification_id: v.id };
        self.deps.queue.publish(&self.deps.settings.social_media_topic, &event).await?;
        info!(verification_id = %v.id, %platform, "Social link submitted");
        Ok(v)
    }

    /// Scrape a pending social link. On redelivery, a scrape left PROCESSING
    /// by a crashed attempt is picked up again, and a finished scrape whose
    /// fact check never started is handed off again.
    pub async fn process(&self, id: Uuid, delivery_attempt: u32) -> Result<SocialOutcome, PipelineError> {
        let Some(v) = self.deps.store.get(id).await? else {
            error!(verification_id = %id, "Verification not found for scrape");
            return Ok(SocialOutcome::Skipped("not found"));
        };

        let redelivery = delivery_attempt > 1;
        let resumable = match v.status(StatusField::SocialMediaScrape) {
            Some(ProcessingStatus::Pending) => true,
            Some(ProcessingStatus::Processing) => redelivery,
            Some(ProcessingStatus::Completed) if redelivery && awaits_fact_check(&v) => {
                self.hand_off(v.id).await?;
                info!(verification_id = %id, "Fact check hand-off repeated");
                return Ok(SocialOutcome::HandedOff);
            }
            _ => false,
        };
        if !resumable {
            error!(verification_id = %id, status = ?v.status(StatusField::SocialMediaScrape), "Scrape is not pending");
            return Ok(SocialOutcome::Skipped("not pending"));
        }

        let Some(details) = v.social_media_scrape_details.clone().filter(|d| !d.url.trim().is_empty()) else {
            error!(verification_id = %id, "Scrape details carry no url");
            return Ok(SocialOutcome::Skipped("missing url"));
        };
        let Some(platform) = detect_platform(&details.url) else {
            error!(verification_id = %id, url = %details.url, "Unsupported social platform");
            return Ok(SocialOutcome::Skipped("unsupported platform"));
        };

        let claim = VerificationUpdate::new().status(StatusField::SocialMediaScrape, ProcessingStatus::Processing);
        match self.deps.store.apply(id, &claim).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Ok(SocialOutcome::Skipped("not found")),
            ApplyOutcome::Rejected(reason) => {
                warn!(verification_id = %id, reason, "Scrape claimed elsewhere");
                return Ok(SocialOutcome::Skipped("claimed elsewhere"));
            }
        }

        match self.scrape_and_store(id, &details.url, platform).await {
            Ok((parsed, stored)) => self.complete(&v, details, platform, parsed, stored).await,
            Err(e) => self.fail(&v, &e.to_string()).await,
        }
    }

    async fn scrape_and_store(
        &self,
        id: Uuid,
        url: &str,
        platform: SocialPlatform,
    ) -> Result<(ParsedPost, StoredImages), ScrapeError> {
        let mut round = 1;
        loop {
            let (page, parsed) = self.scrape_with_retry(url, platform).await?;
            match self.store_images(id, &page, &parsed).await {
                Ok(stored) => return Ok((parsed, stored)),
                Err(e) if round < MAX_IMAGE_ROUNDS => {
                    warn!(verification_id = %id, round, error = %e, "Storing images failed; scraping again");
                    round += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Retried when the scrape errors, no screenshot comes back, or the
    /// parser sees a broken screenshot.
    async fn scrape_with_retry(
        &self,
        url: &str,
        platform: SocialPlatform,
    ) -> Result<(ScrapedPage, ParsedPost), ScrapeError> {
        retry(&self.deps.settings.scrape_retry, "social-scrape", |_: &ScrapeError| true, || async move {
            let page = self
                .deps
                .scraper
                .scrape(url)
                .await
                .map_err(|e| ScrapeError::Scrape(e.to_string()))?;
            let screenshot = page.screenshot_url.clone().ok_or(ScrapeError::NoScreenshot)?;
            let request = ParseRequest {
                markdown: page.content.clone(),
                platform,
                url: url.to_string(),
                screenshot_url: Some(screenshot),
            };
            let parsed = self
                .deps
                .parser
                .parse(&request)
                .await
                .map_err(|e| ScrapeError::Parse(e.to_string()))?;
            if parsed.is_broken_screenshot {
                return Err(ScrapeError::BrokenScreenshot);
            }
            Ok((page, parsed))
        })
        .await
    }

    async fn store_images(&self, id: Uuid, page: &ScrapedPage, parsed: &ParsedPost) -> Result<StoredImages, ScrapeError> {
        let shot_url = page.screenshot_url.as_deref().ok_or(ScrapeError::NoScreenshot)?;
        let screenshot = self
            .copy_image(shot_url, &format!("social/{id}/screenshot.png"), "image/png")
            .await?;

        let mut images = Vec::with_capacity(parsed.image_urls.len());
        for (i, url) in parsed.image_urls.iter().enumerate() {
            images.push(
                self.copy_image(url, &format!("social/{id}/image-{i}.jpg"), "image/jpeg")
                    .await?,
            );
        }
        Ok(StoredImages {
            screenshot: ImageRef::new(screenshot),
            images,
        })
    }

    async fn copy_image(&self, source: &str, name: &str, content_type: &str) -> Result<String, ScrapeError> {
        let data = self
            .deps
            .images
            .fetch(source)
            .await
            .map_err(|e| ScrapeError::Images(format!("fetch {source}: {e}")))?;
        self.deps
            .storage
            .upload(data, name, content_type)
            .await
            .map_err(|e| ScrapeError::Images(format!("upload {name}: {e}")))
    }

    async fn complete(
        &self,
        v: &Verification,
        pending: SocialMediaScrapeDetails,
        platform: SocialPlatform,
        parsed: ParsedPost,
        stored: StoredImages,
    ) -> Result<SocialOutcome, PipelineError> {
        let text = parsed.text_content.trim().to_string();
        let details = SocialMediaScrapeDetails {
            platform,
            url: pending.url,
            content: Some(text.clone()).filter(|t| !t.is_empty()),
            post_date: parsed.post_date.as_deref().and_then(parse_post_date),
            image_urls: stored.images,
            author_name: parsed.author_name,
            author_profile_image: parsed.author_profile_image,
            screenshot: Some(stored.screenshot),
        };

        let mut update = VerificationUpdate::new()
            .status(StatusField::SocialMediaScrape, ProcessingStatus::Completed)
            .set(FieldSet::SocialDetails(details))
            .set(FieldSet::SocialError(None));
        if v.text_content.as_deref().map_or(true, |t| t.trim().is_empty()) && !text.is_empty() {
            update = update.set(FieldSet::TextContent(Some(text)));
        }
        match self.deps.store.apply(v.id, &update).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Ok(SocialOutcome::Skipped("not found")),
            ApplyOutcome::Rejected(reason) => {
                warn!(verification_id = %v.id, reason, "Scrape result not persisted");
                return Ok(SocialOutcome::Superseded);
            }
        }

        if parsed.is_private_post {
            let private = VerificationUpdate::new()
                .reenter(StatusField::FactCheck, ProcessingStatus::Failed)
                .set(FieldSet::Error(Some(messages::LINK_NOT_PUBLIC.to_string())))
                .set(FieldSet::IsPublic(false));
            match self.deps.store.apply(v.id, &private).await? {
                ApplyOutcome::Applied => {}
                ApplyOutcome::NotFound => return Ok(SocialOutcome::Skipped("not found")),
                ApplyOutcome::Rejected(reason) => {
                    warn!(verification_id = %v.id, reason, "Private post not recorded");
                    return Ok(SocialOutcome::Superseded);
                }
            }
            self.deps
                .notifier
                .notify_user(&v.assignee_user_id, &messages::link_not_public(v.id))
                .await;
            info!(verification_id = %v.id, "Social post is private");
            return Ok(SocialOutcome::Private);
        }

        self.hand_off(v.id).await?;
        info!(verification_id = %v.id, "Social scrape complete");
        Ok(SocialOutcome::Completed)
    }

    /// A failed publish is returned so the message is redelivered; the
    /// redelivery repeats only this step.
    async fn hand_off(&self, id: Uuid) -> Result<(), PipelineError> {
        self.deps
            .queue
            .publish(&self.deps.settings.check_fact_topic, &CheckFactEvent::single(id))
            .await
            .inspect_err(|e| error!(verification_id = %id, error = %e, "Failed to trigger fact check"))?;
        Ok(())
    }

    /// The scrape and the dependent fact check both fail; the owner is told
    /// and the verification is hidden.
    async fn fail(&self, v: &Verification, reason: &str) -> Result<SocialOutcome, PipelineError> {
        warn!(verification_id = %v.id, reason, "Social scrape failed");
        let scrape = VerificationUpdate::new()
            .status(StatusField::SocialMediaScrape, ProcessingStatus::Failed)
            .set(FieldSet::SocialError(Some(reason.to_string())));
        self.deps.store.apply(v.id, &scrape).await?;

        mark_fact_check_failed(&self.deps, v, reason).await?;
        Ok(SocialOutcome::Failed {
            reason: reason.to_string(),
        })
    }
}

/// Upstream stage finished but the fact check was never started.
pub(crate) fn awaits_fact_check(v: &Verification) -> bool {
    matches!(v.status(StatusField::FactCheck), None | Some(ProcessingStatus::Idle))
}

/// FAILED fact check for a verification whose upstream stage failed.
pub(crate) async fn mark_fact_check_failed(
    deps: &PipelineDeps,
    v: &Verification,
    reason: &str,
) -> Result<(), PipelineError> {
    let mut update = VerificationUpdate::new()
        .reenter(StatusField::FactCheck, ProcessingStatus::Failed)
        .set(FieldSet::Error(Some(reason.to_string())));
    if !v.is_generated_news {
        update = update.set(FieldSet::IsPublic(false));
    }
    deps.store.apply(v.id, &update).await?;

    if !v.is_generated_news {
        deps.notifier
            .notify_user(&v.assignee_user_id, &messages::fact_check_failed(v.id, messages::RETRY_BODY))
            .await;
    }
    Ok(())
}

fn parse_post_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_supported_platforms() {
        assert_eq!(
            detect_platform("https://www.facebook.com/story.php?id=1"),
            Some(SocialPlatform::Facebook)
        );
        assert_eq!(detect_platform("https://m.facebook.com/p/1"), Some(SocialPlatform::Facebook));
        assert_eq!(detect_platform("https://fb.watch/abc"), Some(SocialPlatform::Facebook));
        assert_eq!(
            detect_platform("https://www.linkedin.com/posts/someone_activity-1"),
            Some(SocialPlatform::Linkedin)
        );
    }

    #[test]
    fn rejects_lookalike_hosts() {
        assert_eq!(detect_platform("https://notfacebook.com/p/1"), None);
        assert_eq!(detect_platform("https://facebook.com.evil.net/p/1"), None);
        assert_eq!(detect_platform("ftp://linkedin.com/x"), None);
    }

    #[test]
    fn post_dates_are_rfc3339() {
        assert!(parse_post_date("2024-05-01T10:00:00+04:00").is_some());
        assert!(parse_post_date("yesterday").is_none());
    }
}
