use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use veriflow_common::{
    valid_until, FactCheckData, PipelineError, PreviewData, ProcessingStatus, StatusField, TranslationEvent,
    Verification,
};
use veriflow_store::{ApplyOutcome, FieldSet, VerificationUpdate};

use super::statement::{combine_with_ocr, extract_statement};
use crate::deps::PipelineDeps;
use crate::messages;
use crate::traits::{FactCheckRequest, FactCheckResult, ValidityRequest, ValidityVerdict};

/// Sent to the validity check when a post has images but no text.
pub const IMAGE_ONLY_STATEMENT: &str =
    "Post or screenshot to be fact checked, if it's not fact checkable content ignore it.";

pub const REASON_NO_STATEMENT: &str = "No statement to check";
pub const REASON_NOT_VALID: &str = "Not valid for fact check";
pub const REASON_CHECK_FAILED: &str = "Failed to check fact";

/// One orchestrator invocation for one verification.
#[derive(Debug, Clone, Copy)]
pub struct FactCheckRun {
    pub id: Uuid,
    /// `fact_check_status` when the message was classified.
    pub entry_status: Option<ProcessingStatus>,
    pub delivery_attempt: u32,
}

impl FactCheckRun {
    pub fn fresh(id: Uuid) -> Self {
        Self {
            id,
            entry_status: None,
            delivery_attempt: 1,
        }
    }

    /// A retry of a run that already claimed the verification must not
    /// announce the start again.
    fn announces_start(&self) -> bool {
        self.entry_status != Some(ProcessingStatus::Pending) && self.delivery_attempt == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactCheckOutcome {
    Completed { factuality: f64, score: Option<f64> },
    Failed { reason: String },
    NotFound,
    /// A concurrent run moved the verification to a state this run may not overwrite.
    Superseded,
}

/// Drives one verification through extraction, OCR, validity, the deep check,
/// persistence, translation hand-off, notification and scoring.
#[derive(Clone)]
pub struct FactCheckOrchestrator {
    deps: PipelineDeps,
}

impl FactCheckOrchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Content problems end in a FAILED write and an `Ok` outcome.
    /// Infrastructure and validity-collaborator errors are returned so the
    /// message is redelivered.
    pub async fn run(&self, run: FactCheckRun) -> Result<FactCheckOutcome, PipelineError> {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span = info_span!("fact_check", verification_id = %run.id, trace_id = %trace_id);
        self.execute(run, trace_id).instrument(span).await
    }

    async fn execute(&self, run: FactCheckRun, trace_id: String) -> Result<FactCheckOutcome, PipelineError> {
        let Some(v) = self.deps.store.get(run.id).await? else {
            warn!("Verification not found");
            return Ok(FactCheckOutcome::NotFound);
        };

        match self.deps.store.apply(v.id, &start_update(&v)).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Ok(FactCheckOutcome::NotFound),
            ApplyOutcome::Rejected(reason) => warn!(reason, "Could not mark fact check pending"),
        }

        let statement = extract_statement(&v);
        let images = v.images_for_ocr();
        if let Some((_, source)) = &statement {
            info!(source = source.as_str(), "Statement extracted");
        }
        if statement.is_none() && images.is_empty() {
            return self.fail(&v, REASON_NO_STATEMENT, messages::NO_CONTENT_BODY).await;
        }

        let ocr_text = if images.is_empty() {
            None
        } else {
            match self.deps.ocr.extract_text(&images).await {
                Ok(result) => {
                    info!(successful = result.successful(), total = images.len(), "OCR complete");
                    result.combined_text()
                }
                Err(e) => {
                    warn!(total = images.len(), error = %e, "OCR failed; continuing without image text");
                    None
                }
            }
        };

        let statement_text = statement
            .map(|(s, _)| s)
            .unwrap_or_else(|| IMAGE_ONLY_STATEMENT.to_string());
        let combined = combine_with_ocr(&statement_text, ocr_text.as_deref());

        if run.announces_start() && !v.is_generated_news {
            self.deps
                .notifier
                .notify_user(&v.assignee_user_id, &messages::fact_check_started(v.id))
                .await;
        }

        let verdict = self
            .deps
            .validity
            .check(&ValidityRequest {
                statement: combined.clone(),
                image_urls: images,
                is_social_media: v.status(StatusField::SocialMediaScrape) == Some(ProcessingStatus::Completed),
            })
            .await?;
        info!(valid = verdict.is_valid_for_fact_check, "Validity check complete");

        if !verdict.is_valid_for_fact_check {
            let reason = verdict
                .error_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(REASON_NOT_VALID)
                .to_string();
            return self.fail(&v, &reason, &reason).await;
        }

        let enhanced = if verdict.enhanced_statement.trim().is_empty() {
            combined.clone()
        } else {
            verdict.enhanced_statement.clone()
        };

        let request = FactCheckRequest {
            statement: enhanced.clone(),
            budget_tokens: self.deps.settings.budget_for(v.sources.len()),
        };
        let result = match self.deps.fact_checker.check(&request).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(budget = request.budget_tokens, "Deep fact check returned nothing");
                return self.fail(&v, REASON_CHECK_FAILED, messages::RETRY_BODY).await;
            }
            Err(e) => {
                warn!(budget = request.budget_tokens, error = %e, "Deep fact check failed");
                return self.fail(&v, REASON_CHECK_FAILED, messages::RETRY_BODY).await;
            }
        };
        info!(factuality = result.factuality, references = result.references.len(), "Fact check complete");

        let completion = completion_update(&v, &verdict, &result, enhanced.clone(), combined, ocr_text, trace_id);
        match self.deps.store.apply(v.id, &completion).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Ok(FactCheckOutcome::NotFound),
            ApplyOutcome::Rejected(reason) => {
                warn!(reason, "Fact check result not persisted");
                return Ok(FactCheckOutcome::Superseded);
            }
        }

        let event = TranslationEvent { verification_id: v.id };
        if let Err(e) = self.deps.queue.publish(&self.deps.settings.translation_topic, &event).await {
            error!(error = %e, "Failed to trigger translation");
        }

        if !v.is_generated_news {
            let message = messages::fact_check_completed(v.id, result.reason_summary.as_deref());
            self.deps.notifier.notify_user(&v.assignee_user_id, &message).await;
        }

        let score = self.score(v.id, &enhanced, &result.reason).await;
        Ok(FactCheckOutcome::Completed {
            factuality: result.factuality,
            score,
        })
    }

    async fn score(&self, id: Uuid, statement: &str, reason: &str) -> Option<f64> {
        let data = match self.deps.scorer.score(statement, reason).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Score generation failed; leaving score unset");
                return None;
            }
        };
        let score = data.score;
        let update = VerificationUpdate::new().set(FieldSet::Score {
            score,
            valid_until: valid_until(score, Utc::now()),
            score_data: data,
        });
        match self.deps.store.apply(id, &update).await {
            Ok(outcome) if outcome.applied() => {
                info!(score, "Score persisted");
                Some(score)
            }
            Ok(outcome) => {
                warn!(?outcome, "Score not persisted");
                None
            }
            Err(e) => {
                warn!(error = %e, "Score not persisted");
                None
            }
        }
    }

    /// Terminal failure: FAILED with the reason, hidden and the owner told,
    /// unless the content is system-generated.
    async fn fail(&self, v: &Verification, reason: &str, body: &str) -> Result<FactCheckOutcome, PipelineError> {
        let mut update = VerificationUpdate::new()
            .status(StatusField::FactCheck, ProcessingStatus::Failed)
            .set(FieldSet::Error(Some(reason.to_string())));
        if !v.is_generated_news {
            update = update.set(FieldSet::IsPublic(false));
        }

        match self.deps.store.apply(v.id, &update).await? {
            ApplyOutcome::Applied => info!(reason, "Fact check failed"),
            ApplyOutcome::NotFound => return Ok(FactCheckOutcome::NotFound),
            ApplyOutcome::Rejected(why) => {
                warn!(reason, why, "Failure not persisted");
                return Ok(FactCheckOutcome::Superseded);
            }
        }

        if !v.is_generated_news {
            self.deps
                .notifier
                .notify_user(&v.assignee_user_id, &messages::fact_check_failed(v.id, body))
                .await;
        }
        Ok(FactCheckOutcome::Failed {
            reason: reason.to_string(),
        })
    }
}

/// Metadata and video summary are closed so polling clients stop waiting,
/// and the fact check is (re)claimed as PENDING.
fn start_update(v: &Verification) -> VerificationUpdate {
    let mut update = VerificationUpdate::new();
    for field in [StatusField::Metadata, StatusField::AiVideoSummary] {
        let current = v.status(field);
        if current != Some(ProcessingStatus::Completed)
            && ProcessingStatus::can_transition(current, ProcessingStatus::Completed, false)
        {
            update = update.status(field, ProcessingStatus::Completed);
        }
    }
    if v.status(StatusField::FactCheck) != Some(ProcessingStatus::Pending) {
        update = update.reenter(StatusField::FactCheck, ProcessingStatus::Pending);
    }
    update
}

fn completion_update(
    v: &Verification,
    verdict: &ValidityVerdict,
    result: &FactCheckResult,
    enhanced: String,
    combined: String,
    ocr_text: Option<String>,
    trace_id: String,
) -> VerificationUpdate {
    let data = FactCheckData {
        factuality: result.factuality,
        reason: result.reason.clone(),
        reason_summary: result.reason_summary.clone(),
        score_justification: result.score_justification.clone(),
        fact_status: result.fact_status.clone(),
        references: result.references.clone(),
        enhanced_statement: enhanced,
        combined_statement: Some(combined),
        extracted_image_text: ocr_text,
    };

    let mut update = VerificationUpdate::new()
        .status(StatusField::FactCheck, ProcessingStatus::Completed)
        .set(FieldSet::FactCheckData(data))
        .set(FieldSet::TraceId(trace_id))
        .set(FieldSet::Error(None));

    if let (Some(preview), false) = (&verdict.preview_data, v.is_generated_news) {
        for field in preview_fields(v, preview) {
            update = update.set(field);
        }
    }
    update
}

/// Preview title and description replace the post's own; an existing
/// preview block is merged rather than replaced.
fn preview_fields(v: &Verification, preview: &PreviewData) -> Vec<FieldSet> {
    let mut fields = Vec::new();
    if let Some(title) = preview.title.as_ref().filter(|t| !t.trim().is_empty()) {
        fields.push(FieldSet::Title(Some(title.clone())));
    }
    if let Some(description) = preview.description.as_ref().filter(|d| !d.trim().is_empty()) {
        fields.push(FieldSet::TextContent(Some(description.clone())));
    }
    if let Some(existing) = &v.preview_data {
        let merged = PreviewData {
            title: preview.title.clone().or_else(|| existing.title.clone()),
            description: preview.description.clone().or_else(|| existing.description.clone()),
            image: preview.image.clone().or_else(|| existing.image.clone()),
            site_name: preview.site_name.clone().or_else(|| existing.site_name.clone()),
        };
        fields.push(FieldSet::PreviewData(merged));
    } else {
        debug!("No existing preview block to merge into");
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verification() -> Verification {
        Verification::new("owner", Uuid::new_v4()).with_text("claim")
    }

    #[test]
    fn start_reclaims_completed_fact_check() {
        let mut v = verification();
        v.statuses.set(StatusField::FactCheck, ProcessingStatus::Completed);
        let mut applied = v.clone();
        start_update(&v).apply_to(&mut applied).unwrap();
        assert_eq!(applied.status(StatusField::FactCheck), Some(ProcessingStatus::Pending));
        assert_eq!(applied.status(StatusField::Metadata), Some(ProcessingStatus::Completed));
        assert_eq!(applied.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Completed));
    }

    #[test]
    fn start_leaves_failed_video_summary_alone() {
        let mut v = verification();
        v.statuses.set(StatusField::AiVideoSummary, ProcessingStatus::Failed);
        let mut applied = v.clone();
        start_update(&v).apply_to(&mut applied).unwrap();
        assert_eq!(applied.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Failed));
    }

    #[test]
    fn retry_of_pending_run_is_silent() {
        let id = Uuid::new_v4();
        assert!(FactCheckRun::fresh(id).announces_start());
        let retry = FactCheckRun {
            id,
            entry_status: Some(ProcessingStatus::Pending),
            delivery_attempt: 1,
        };
        assert!(!retry.announces_start());
        let redelivery = FactCheckRun {
            id,
            entry_status: Some(ProcessingStatus::Completed),
            delivery_attempt: 2,
        };
        assert!(!redelivery.announces_start());
    }

    #[test]
    fn preview_merges_into_existing_block() {
        let mut v = verification();
        v.preview_data = Some(PreviewData {
            title: Some("old".into()),
            site_name: Some("site".into()),
            ..Default::default()
        });
        let fields = preview_fields(
            &v,
            &PreviewData {
                title: Some("new".into()),
                ..Default::default()
            },
        );
        assert!(fields.contains(&FieldSet::Title(Some("new".into()))));
        assert!(fields.contains(&FieldSet::PreviewData(PreviewData {
            title: Some("new".into()),
            site_name: Some("site".into()),
            ..Default::default()
        })));
    }
}
