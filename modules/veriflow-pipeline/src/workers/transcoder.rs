use async_trait::async_trait;
use veriflow_common::TranscodeJobEvent;
use veriflow_queue::{MessageHandler, ReceivedMessage};

use super::decode;
use crate::deps::PipelineDeps;
use crate::media::MediaPipeline;

/// Consumes job-completion notices from the transcoding service.
pub struct TranscoderWorker {
    pipeline: MediaPipeline,
}

impl TranscoderWorker {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            pipeline: MediaPipeline::new(deps),
        }
    }
}

#[async_trait]
impl MessageHandler for TranscoderWorker {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        let Some(event) = decode::<TranscodeJobEvent>(message, "transcoder") else {
            return Ok(());
        };
        self.pipeline.complete(&event).await?;
        Ok(())
    }
}
