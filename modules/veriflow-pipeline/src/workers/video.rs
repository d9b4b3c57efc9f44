use async_trait::async_trait;
use tracing::{debug, warn};
use veriflow_common::{StatusField, VideoProcessorEvent};
use veriflow_queue::{MessageHandler, ReceivedMessage};

use super::{decode, error_field, fail_exhausted};
use crate::deps::PipelineDeps;
use crate::video::VideoPipeline;

pub struct VideoWorker {
    deps: PipelineDeps,
    pipeline: VideoPipeline,
    max_attempts: u32,
}

impl VideoWorker {
    pub fn new(deps: PipelineDeps, max_attempts: u32) -> Self {
        Self {
            pipeline: VideoPipeline::new(deps.clone()),
            deps,
            max_attempts,
        }
    }
}

#[async_trait]
impl MessageHandler for VideoWorker {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        let Some(event) = decode::<VideoProcessorEvent>(message, "video-processor") else {
            return Ok(());
        };

        if message.delivery_attempt > self.max_attempts {
            fail_exhausted(
                self.deps.store.as_ref(),
                &[event.verification_id],
                &[StatusField::AiVideoSummary, StatusField::FactCheck],
                error_field,
                self.max_attempts,
            )
            .await?;
            warn!(verification_id = %event.verification_id, "Video retry budget exhausted");
            return Ok(());
        }

        let outcome = self.pipeline.handle_attempt(&event, message.delivery_attempt).await?;
        debug!(verification_id = %event.verification_id, ?outcome, "Video handled");
        Ok(())
    }
}
