use tracing::{info, warn};
use uuid::Uuid;
use veriflow_common::{MediaState, PipelineError, TranscodeJobEvent};
use veriflow_store::{ApplyOutcome, FieldSet, StoreError, VerificationUpdate};

use crate::deps::PipelineDeps;
use crate::traits::TranscodeSubmission;

/// Transcoding of uploaded videos into streaming formats.
#[derive(Clone)]
pub struct MediaPipeline {
    deps: PipelineDeps,
}

impl MediaPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub async fn submit_video_transcode(
        &self,
        id: Uuid,
        raw_object_uri: &str,
    ) -> Result<TranscodeSubmission, PipelineError> {
        let output_prefix = format!("transcoded/{id}/");
        let submission = self.deps.transcoder.submit(raw_object_uri, &output_prefix).await?;

        let update = VerificationUpdate::new()
            .set(FieldSet::TranscodeJob {
                name: submission.job_name.clone(),
                playback: submission.playback.clone(),
            })
            .set(FieldSet::MediaState(MediaState::ProcessingMedia));
        match self.deps.store.apply(id, &update).await? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::NotFound => return Err(StoreError::NotFound(id).into()),
            ApplyOutcome::Rejected(reason) => return Err(PipelineError::Store(reason)),
        }

        info!(verification_id = %id, job = %submission.job_name, "Transcode submitted");
        Ok(submission)
    }

    /// Settle the media state of the verification that owns the finished job.
    pub async fn complete(&self, event: &TranscodeJobEvent) -> Result<Option<MediaState>, PipelineError> {
        let Some(v) = self.deps.store.find_by_transcode_job(&event.job.name).await? else {
            warn!(job = %event.job.name, "No verification for transcode job");
            return Ok(None);
        };

        let state = if event.job.succeeded() {
            MediaState::ReadyForUse
        } else {
            MediaState::ProcessingFailed
        };
        self.deps
            .store
            .apply(v.id, &VerificationUpdate::new().set(FieldSet::MediaState(state)))
            .await?;
        info!(verification_id = %v.id, job = %event.job.name, job_state = %event.job.state, ?state, "Transcode settled");
        Ok(Some(state))
    }
}
