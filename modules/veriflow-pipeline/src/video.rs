//! Video summaries: audio, transcript, summary, then the fact check.

use anyhow::{anyhow, Context};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use veriflow_common::{
    CheckFactEvent, PipelineError, ProcessingStatus, StatusField, Verification, VideoProcessorEvent,
};
use veriflow_store::{ApplyOutcome, FieldSet, Guard, VerificationUpdate};

use crate::deps::PipelineDeps;
use crate::messages;
use crate::social::{awaits_fact_check, mark_fact_check_failed};
use crate::traits::VideoInfo;

pub const REASON_TOO_LONG: &str = "Video too long";

#[derive(Debug, Clone, PartialEq)]
pub enum VideoOutcome {
    Summarized,
    /// Summarized earlier; the fact-check hand-off was published again.
    HandedOff,
    /// Summary copied from an earlier verification of the same video.
    Reused { from: Uuid },
    TooLong { duration_secs: u64, limit_secs: u64 },
    /// Another worker holds the summary claim.
    AlreadyRunning,
    NotFound,
    Failed { reason: String },
    TimedOut,
}

#[derive(Clone)]
pub struct VideoPipeline {
    deps: PipelineDeps,
}

impl VideoPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// First delivery of a video callback.
    pub async fn handle(&self, event: &VideoProcessorEvent) -> Result<VideoOutcome, PipelineError> {
        self.handle_attempt(event, 1).await
    }

    /// Run the callback under the configured ceiling. Running out of time
    /// marks the verification FAILED and counts as handled.
    pub async fn handle_attempt(
        &self,
        event: &VideoProcessorEvent,
        delivery_attempt: u32,
    ) -> Result<VideoOutcome, PipelineError> {
        let limit = self.deps.settings.video_callback_timeout;
        let span = info_span!("video", verification_id = %event.verification_id, delivery_attempt);
        match tokio::time::timeout(limit, self.process(event, delivery_attempt).instrument(span)).await {
            Ok(result) => result,
            Err(_) => {
                let reason = PipelineError::Timeout {
                    operation: "video processing",
                    seconds: limit.as_secs(),
                }
                .to_string();
                warn!(verification_id = %event.verification_id, reason, "Video callback timed out");
                if let Some(v) = self.deps.store.get(event.verification_id).await? {
                    self.fail(&v, &reason).await?;
                }
                Ok(VideoOutcome::TimedOut)
            }
        }
    }

    pub async fn process(
        &self,
        event: &VideoProcessorEvent,
        delivery_attempt: u32,
    ) -> Result<VideoOutcome, PipelineError> {
        let id = event.verification_id;
        if delivery_attempt > 1 {
            if let Some(v) = self.deps.store.get(id).await? {
                let summarized = v.status(StatusField::AiVideoSummary) == Some(ProcessingStatus::Completed);
                if summarized && awaits_fact_check(&v) {
                    self.hand_off(id, &event.external_user_id).await?;
                    info!("Fact check hand-off repeated");
                    return Ok(VideoOutcome::HandedOff);
                }
            }
        }

        let info = self.deps.video.info(&event.youtube_url).await?;
        info!(youtube_id = %info.id, duration_secs = info.duration_secs, "Video resolved");

        if let Some(source) = self.deps.store.find_summarized_video(&info.id).await? {
            if source.id != id {
                return self.reuse(id, &source, &info).await;
            }
        }

        let Some(v) = self.deps.store.get(id).await? else {
            warn!("Verification not found for video");
            return Ok(VideoOutcome::NotFound);
        };

        let claim = VerificationUpdate::new()
            .only_if(Guard::IsNot(StatusField::AiVideoSummary, ProcessingStatus::Pending))
            .reenter(StatusField::AiVideoSummary, ProcessingStatus::Pending)
            .reenter(StatusField::Metadata, ProcessingStatus::Completed);
        match self.deps.store.apply(id, &claim).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Ok(VideoOutcome::NotFound),
            ApplyOutcome::Rejected(reason) => {
                info!(reason, "Video summary already in progress");
                return Ok(VideoOutcome::AlreadyRunning);
            }
        }

        let outcome = match self.summarize(&v, event, &info).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{e:#}");
                self.fail(&v, &reason).await?;
                return Ok(VideoOutcome::Failed { reason });
            }
        };
        if outcome == VideoOutcome::Summarized {
            self.hand_off(id, &event.external_user_id).await?;
            info!(youtube_id = %info.id, "Video summarized");
        }
        Ok(outcome)
    }

    /// Publish the fact check, then tell the owner. A failed publish is
    /// returned so the message is redelivered.
    async fn hand_off(&self, id: Uuid, user_id: &str) -> Result<(), PipelineError> {
        self.deps
            .queue
            .publish(&self.deps.settings.check_fact_topic, &CheckFactEvent::single(id))
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to trigger fact check"))?;
        self.deps.notifier.notify_user(user_id, &messages::video_complete(id)).await;
        Ok(())
    }

    async fn reuse(&self, id: Uuid, source: &Verification, info: &VideoInfo) -> Result<VideoOutcome, PipelineError> {
        let Some(summary) = source.ai_video_summary.clone() else {
            return Err(PipelineError::Store(format!("verification {} has no summary", source.id)));
        };
        let update = VerificationUpdate::new()
            .reenter(StatusField::AiVideoSummary, ProcessingStatus::Completed)
            .reenter(StatusField::Metadata, ProcessingStatus::Completed)
            .set(FieldSet::AiVideoSummary(summary))
            .set(FieldSet::YoutubeId(info.id.clone()));
        match self.deps.store.apply(id, &update).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Ok(VideoOutcome::NotFound),
            ApplyOutcome::Rejected(reason) => return Err(PipelineError::Store(reason)),
        }

        self.deps
            .queue
            .publish(&self.deps.settings.check_fact_topic, &CheckFactEvent::single(id))
            .await?;
        info!(source = %source.id, youtube_id = %info.id, "Reused existing video summary");
        Ok(VideoOutcome::Reused { from: source.id })
    }

    async fn summarize(
        &self,
        v: &Verification,
        event: &VideoProcessorEvent,
        info: &VideoInfo,
    ) -> anyhow::Result<VideoOutcome> {
        let extended = self
            .deps
            .users
            .profile(&v.assignee_user_id)
            .await?
            .is_some_and(|p| p.can_summarize);
        let limit_secs = if extended {
            self.deps.settings.video_max_duration_extended_secs
        } else {
            self.deps.settings.video_max_duration_secs
        };
        if info.duration_secs > limit_secs {
            return self.too_long(v, info.duration_secs, limit_secs).await;
        }

        let audio_name = format!("audio/{}.webm", info.id);
        let audio_uri = match self.deps.storage.locate(&audio_name).await? {
            Some(uri) => {
                info!(audio_name, "Reusing stored audio");
                uri
            }
            None => {
                let data = self
                    .deps
                    .video
                    .download_audio(&event.youtube_url)
                    .await
                    .context("audio download failed")?;
                self.deps.storage.upload(data, &audio_name, "audio/webm").await?
            }
        };

        let transcript = self.deps.transcriber.transcribe(&audio_uri).await?;
        if transcript.trim().is_empty() {
            return Err(anyhow!("empty transcript"));
        }
        let title = event.video_title.as_deref().or(info.title.as_deref());
        let summary = self.deps.summarizer.summarize(&transcript, title).await?;

        let update = VerificationUpdate::new()
            .status(StatusField::AiVideoSummary, ProcessingStatus::Completed)
            .set(FieldSet::AiVideoSummary(summary))
            .set(FieldSet::YoutubeId(info.id.clone()));
        match self.deps.store.apply(v.id, &update).await? {
            ApplyOutcome::Applied => Ok(VideoOutcome::Summarized),
            ApplyOutcome::NotFound => Ok(VideoOutcome::NotFound),
            ApplyOutcome::Rejected(reason) => {
                warn!(reason, "Video summary not persisted");
                Ok(VideoOutcome::AlreadyRunning)
            }
        }
    }

    async fn too_long(&self, v: &Verification, duration_secs: u64, limit_secs: u64) -> anyhow::Result<VideoOutcome> {
        let mut update = VerificationUpdate::new()
            .status(StatusField::AiVideoSummary, ProcessingStatus::Failed)
            .reenter(StatusField::FactCheck, ProcessingStatus::Failed)
            .set(FieldSet::Error(Some(REASON_TOO_LONG.to_string())));
        if !v.is_generated_news {
            update = update.set(FieldSet::IsPublic(false));
        }
        self.deps.store.apply(v.id, &update).await?;
        self.deps
            .notifier
            .notify_user(&v.assignee_user_id, &messages::video_too_long(v.id))
            .await;
        warn!(duration_secs, limit_secs, "Video too long");
        Ok(VideoOutcome::TooLong {
            duration_secs,
            limit_secs,
        })
    }

    /// A summary that already finished is left alone, and so is its fact check.
    async fn fail(&self, v: &Verification, reason: &str) -> Result<(), PipelineError> {
        warn!(verification_id = %v.id, reason, "Video processing failed");
        let summary = VerificationUpdate::new().status(StatusField::AiVideoSummary, ProcessingStatus::Failed);
        match self.deps.store.apply(v.id, &summary).await? {
            ApplyOutcome::Applied => mark_fact_check_failed(&self.deps, v, reason).await,
            ApplyOutcome::NotFound => Ok(()),
            ApplyOutcome::Rejected(why) => {
                warn!(verification_id = %v.id, why, "Summary already finished; failure not recorded");
                Ok(())
            }
        }
    }
}
