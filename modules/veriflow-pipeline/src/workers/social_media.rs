use async_trait::async_trait;
use tracing::{debug, warn};
use veriflow_common::{SocialMediaScrapeEvent, StatusField};
use veriflow_queue::{MessageHandler, ReceivedMessage};
use veriflow_store::FieldSet;

use super::{decode, error_field, fail_exhausted};
use crate::deps::PipelineDeps;
use crate::social::SocialMediaPipeline;

pub struct SocialMediaWorker {
    deps: PipelineDeps,
    pipeline: SocialMediaPipeline,
    max_attempts: u32,
}

impl SocialMediaWorker {
    pub fn new(deps: PipelineDeps, max_attempts: u32) -> Self {
        Self {
            pipeline: SocialMediaPipeline::new(deps.clone()),
            deps,
            max_attempts,
        }
    }
}

fn social_error(reason: String) -> FieldSet {
    FieldSet::SocialError(Some(reason))
}

#[async_trait]
impl MessageHandler for SocialMediaWorker {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        let Some(event) = decode::<SocialMediaScrapeEvent>(message, "social-media-scrape") else {
            return Ok(());
        };
        let ids = [event.verification_id];

        if message.delivery_attempt > self.max_attempts {
            let store = self.deps.store.as_ref();
            fail_exhausted(store, &ids, &[StatusField::SocialMediaScrape], social_error, self.max_attempts).await?;
            fail_exhausted(store, &ids, &[StatusField::FactCheck], error_field, self.max_attempts).await?;
            warn!(verification_id = %event.verification_id, "Scrape retry budget exhausted");
            return Ok(());
        }

        let outcome = self
            .pipeline
            .process(event.verification_id, message.delivery_attempt)
            .await?;
        debug!(verification_id = %event.verification_id, ?outcome, "Scrape handled");
        Ok(())
    }
}
