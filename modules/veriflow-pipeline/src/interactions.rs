use tracing::debug;
use uuid::Uuid;
use veriflow_common::PipelineError;
use veriflow_notify::{Interaction, InteractionOutcome};

use crate::deps::PipelineDeps;
use crate::messages;

/// Like and view-milestone notifications for a verification's owner.
#[derive(Clone)]
pub struct InteractionNotifier {
    deps: PipelineDeps,
}

impl InteractionNotifier {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub async fn liked(&self, verification_id: Uuid, liker_id: &str) -> Result<Option<InteractionOutcome>, PipelineError> {
        let Some(owner) = self.owner_of(verification_id, liker_id).await? else {
            return Ok(None);
        };
        let name = self.display_name(liker_id).await?;
        let message = messages::liked(verification_id, &name);
        let outcome = self
            .deps
            .notifier
            .notify_interaction(Interaction::Like, liker_id, &owner, verification_id, &message)
            .await?;
        Ok(Some(outcome))
    }

    pub async fn impression_milestone(
        &self,
        verification_id: Uuid,
        viewer_id: &str,
        views: u64,
    ) -> Result<Option<InteractionOutcome>, PipelineError> {
        let Some(owner) = self.owner_of(verification_id, viewer_id).await? else {
            return Ok(None);
        };
        let name = self.display_name(viewer_id).await?;
        let message = messages::impression_milestone(verification_id, views, &name);
        let outcome = self
            .deps
            .notifier
            .notify_interaction(Interaction::Impression, viewer_id, &owner, verification_id, &message)
            .await?;
        Ok(Some(outcome))
    }

    /// Owner to notify, unless the actor is the owner.
    async fn owner_of(&self, verification_id: Uuid, actor: &str) -> Result<Option<String>, PipelineError> {
        let Some(v) = self.deps.store.get(verification_id).await? else {
            debug!(%verification_id, "Interaction on unknown verification");
            return Ok(None);
        };
        if v.assignee_user_id == actor {
            return Ok(None);
        }
        Ok(Some(v.assignee_user_id))
    }

    async fn display_name(&self, user_id: &str) -> Result<String, PipelineError> {
        Ok(self
            .deps
            .users
            .profile(user_id)
            .await?
            .and_then(|p| p.username)
            .unwrap_or_else(|| user_id.to_string()))
    }
}
