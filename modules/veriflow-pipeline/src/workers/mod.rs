//! Broker subscribers, one per pipeline topic.
//!
//! Every worker follows the same contract: an undecodable message is logged
//! and acked, a message past its delivery-attempt ceiling is written off as
//! FAILED and acked, and anything else runs its pipeline. Returning `Err`
//! nacks the message for broker redelivery.

pub mod check_fact;
pub mod social_media;
pub mod transcoder;
pub mod translation;
pub mod video;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{error, info};
use uuid::Uuid;
use veriflow_common::{Config, PipelineError, ProcessingStatus, StatusField};
use veriflow_queue::{BrokerError, FlowControl, ReceivedMessage, SubscribeOptions, SubscriptionHandle};
use veriflow_store::{FieldSet, StoreError, VerificationStore, VerificationUpdate};

use crate::deps::PipelineDeps;

pub use check_fact::CheckFactWorker;
pub use social_media::SocialMediaWorker;
pub use transcoder::TranscoderWorker;
pub use translation::TranslationWorker;
pub use video::VideoWorker;

pub(crate) fn decode<T: DeserializeOwned>(message: &ReceivedMessage, worker: &'static str) -> Option<T> {
    match message.decode::<T>() {
        Ok(event) => Some(event),
        Err(e) => {
            error!(worker, message_id = %message.message_id, error = %e, "Undecodable message; dropping");
            None
        }
    }
}

/// Write off `ids` after the message ran out of delivery attempts: every
/// listed status goes to FAILED and `error` records the reason.
pub(crate) async fn fail_exhausted(
    store: &dyn VerificationStore,
    ids: &[Uuid],
    fields: &[StatusField],
    error: fn(String) -> FieldSet,
    max_attempts: u32,
) -> Result<usize, StoreError> {
    let reason = PipelineError::RetryBudgetExhausted(max_attempts).to_string();
    let mut update = VerificationUpdate::new().set(error(reason));
    for field in fields {
        update = update.reenter(*field, ProcessingStatus::Failed);
    }
    store.apply_many(ids, &update).await
}

pub(crate) fn error_field(reason: String) -> FieldSet {
    FieldSet::Error(Some(reason))
}

/// Subscribe every worker with the configured flow control.
pub async fn start_all(deps: &PipelineDeps, config: &Config) -> Result<Vec<SubscriptionHandle>, BrokerError> {
    let options = SubscribeOptions::builder()
        .flow_control(FlowControl {
            max_messages: config.max_outstanding_messages,
            max_bytes: config.max_outstanding_bytes,
            max_lease: config.max_lease,
        })
        .graceful_shutdown(config.graceful_shutdown)
        .build();
    let queue = deps.queue.clone();

    let check_fact = Arc::new(CheckFactWorker::new(
        deps.clone(),
        config.reentry_policy,
        config.check_fact_max_attempts,
    ));
    let translation = Arc::new(TranslationWorker::new(deps.clone(), config.translation_max_attempts));
    let social = Arc::new(SocialMediaWorker::new(deps.clone(), config.social_max_attempts));
    let video = Arc::new(VideoWorker::new(deps.clone(), config.video_max_attempts));
    let transcoder = Arc::new(TranscoderWorker::new(deps.clone()));

    let handles = vec![
        queue
            .subscribe(&config.check_fact.topic, &config.check_fact.subscription, check_fact, options.clone())
            .await?,
        queue
            .subscribe(&config.translation.topic, &config.translation.subscription, translation, options.clone())
            .await?,
        queue
            .subscribe(
                &config.social_media_scrape.topic,
                &config.social_media_scrape.subscription,
                social,
                options.clone(),
            )
            .await?,
        queue
            .subscribe(&config.video_processor.topic, &config.video_processor.subscription, video, options.clone())
            .await?,
        queue
            .subscribe(&config.transcoder.topic, &config.transcoder.subscription, transcoder, options)
            .await?,
    ];
    info!(subscriptions = handles.len(), "Workers started");
    Ok(handles)
}
