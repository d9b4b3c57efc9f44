use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use veriflow_common::{CheckFactEvent, ReentryPolicy, StatusField};
use veriflow_queue::{MessageHandler, ReceivedMessage};
use veriflow_store::IdempotencyGuard;

use super::{decode, error_field, fail_exhausted};
use crate::deps::PipelineDeps;
use crate::fact_check::{FactCheckOrchestrator, FactCheckRun};

pub struct CheckFactWorker {
    deps: PipelineDeps,
    guard: IdempotencyGuard,
    orchestrator: FactCheckOrchestrator,
    max_attempts: u32,
}

impl CheckFactWorker {
    pub fn new(deps: PipelineDeps, policy: ReentryPolicy, max_attempts: u32) -> Self {
        Self {
            guard: IdempotencyGuard::new(deps.store.clone(), policy),
            orchestrator: FactCheckOrchestrator::new(deps.clone()),
            deps,
            max_attempts,
        }
    }
}

#[async_trait]
impl MessageHandler for CheckFactWorker {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        let Some(event) = decode::<CheckFactEvent>(message, "check-fact") else {
            return Ok(());
        };
        if event.verifications.is_empty() {
            warn!("Check-fact message without verifications");
            return Ok(());
        }

        let attempt = message.delivery_attempt;
        if attempt > self.max_attempts {
            let failed = fail_exhausted(
                self.deps.store.as_ref(),
                &event.verifications,
                &[StatusField::FactCheck],
                error_field,
                self.max_attempts,
            )
            .await?;
            warn!(
                delivery_attempt = attempt,
                max_attempts = self.max_attempts,
                failed,
                "Retry budget exhausted; marked verifications failed"
            );
            return Ok(());
        }

        let classification = self
            .guard
            .classify(&event.verifications, StatusField::FactCheck, attempt)
            .await?;
        let skipped = classification.skipped();
        if skipped > 0 {
            info!(skipped, "Skipping verifications finished before this redelivery");
        }

        let total = classification.needs_processing.len();
        let mut failures = 0;
        let mut last_error = None;
        for id in &classification.needs_processing {
            let run = FactCheckRun {
                id: *id,
                entry_status: classification.entry_status(*id),
                delivery_attempt: attempt,
            };
            match self.orchestrator.run(run).await {
                Ok(outcome) => debug!(verification_id = %id, ?outcome, "Fact check run finished"),
                Err(e) => {
                    error!(verification_id = %id, error = %e, "Fact check run errored");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(anyhow::Error::new(e).context(format!("{failures} of {total} fact checks errored"))),
            None => Ok(()),
        }
    }
}
