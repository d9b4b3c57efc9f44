use async_trait::async_trait;
use tracing::{debug, warn};
use veriflow_common::{StatusField, TranslationEvent};
use veriflow_queue::{MessageHandler, ReceivedMessage};
use veriflow_store::FieldSet;

use super::{decode, fail_exhausted};
use crate::deps::PipelineDeps;
use crate::translation::TranslationPipeline;

pub struct TranslationWorker {
    deps: PipelineDeps,
    pipeline: TranslationPipeline,
    max_attempts: u32,
}

impl TranslationWorker {
    pub fn new(deps: PipelineDeps, max_attempts: u32) -> Self {
        Self {
            pipeline: TranslationPipeline::new(deps.clone()),
            deps,
            max_attempts,
        }
    }
}

fn translation_error(reason: String) -> FieldSet {
    FieldSet::TranslationError(Some(reason))
}

#[async_trait]
impl MessageHandler for TranslationWorker {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        let Some(event) = decode::<TranslationEvent>(message, "translation") else {
            return Ok(());
        };

        if message.delivery_attempt > self.max_attempts {
            fail_exhausted(
                self.deps.store.as_ref(),
                &[event.verification_id],
                &[StatusField::Translation],
                translation_error,
                self.max_attempts,
            )
            .await?;
            warn!(verification_id = %event.verification_id, "Translation retry budget exhausted");
            return Ok(());
        }

        let outcome = self.pipeline.translate(event.verification_id).await?;
        debug!(verification_id = %event.verification_id, ?outcome, "Translation handled");
        Ok(())
    }
}
