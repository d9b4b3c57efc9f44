use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;
use veriflow_common::{ProcessingStatus, ReentryPolicy, StatusField};

use crate::error::StoreError;
use crate::traits::VerificationStore;

/// Outcome of [`IdempotencyGuard::classify`]. The status buckets describe
/// what each id looked like on entry; `needs_processing` is what the caller
/// should actually run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub needs_processing: Vec<Uuid>,
    pub already_completed: Vec<Uuid>,
    pub already_pending: Vec<Uuid>,
    pub already_failed: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
    entry: HashMap<Uuid, Option<ProcessingStatus>>,
}

impl Classification {
    /// Status of `id` when the batch was read. `None` if absent or unknown.
    pub fn entry_status(&self, id: Uuid) -> Option<ProcessingStatus> {
        self.entry.get(&id).copied().flatten()
    }

    /// Terminal ids that this delivery leaves alone.
    pub fn skipped(&self) -> usize {
        self.already_completed
            .iter()
            .chain(&self.already_failed)
            .filter(|id| !self.needs_processing.contains(id))
            .count()
    }
}

/// Decides which ids in a message still need work, from one batched read
/// of the relevant status field.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn VerificationStore>,
    policy: ReentryPolicy,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn VerificationStore>, policy: ReentryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> ReentryPolicy {
        self.policy
    }

    /// Pending and unknown ids always need processing. Completed and failed
    /// ids are terminal and re-run according to the re-entry policy:
    /// `FreshOnly` re-runs them only on a message's first delivery, so broker
    /// redeliveries do not repeat finished work.
    pub async fn classify(
        &self,
        ids: &[Uuid],
        field: StatusField,
        delivery_attempt: u32,
    ) -> Result<Classification, StoreError> {
        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let current = self.store.statuses(&ids, field).await?;

        let mut out = Classification::default();
        for id in ids {
            let Some(status) = current.get(&id).copied() else {
                out.not_found.push(id);
                out.needs_processing.push(id);
                continue;
            };
            out.entry.insert(id, status);

            let rerun_terminal = match self.policy {
                ReentryPolicy::Always => true,
                ReentryPolicy::FreshOnly => delivery_attempt <= 1,
                ReentryPolicy::Never => false,
            };
            match status {
                Some(ProcessingStatus::Completed) => {
                    out.already_completed.push(id);
                    if rerun_terminal {
                        out.needs_processing.push(id);
                    }
                }
                Some(ProcessingStatus::Failed) => {
                    out.already_failed.push(id);
                    if rerun_terminal {
                        out.needs_processing.push(id);
                    }
                }
                Some(ProcessingStatus::Pending | ProcessingStatus::Processing) => {
                    out.already_pending.push(id);
                    out.needs_processing.push(id);
                }
                Some(ProcessingStatus::Idle) | None => out.needs_processing.push(id),
            }
        }

        debug!(
            field = %field,
            delivery_attempt,
            needs_processing = out.needs_processing.len(),
            completed = out.already_completed.len(),
            pending = out.already_pending.len(),
            failed = out.already_failed.len(),
            not_found = out.not_found.len(),
            "Classified batch"
        );
        Ok(out)
    }
}
