use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use veriflow_common::{
    topics, CheckFactEvent, Config, MediaState, NotificationKind, ProcessingStatus, ReentryPolicy,
    SocialMediaScrapeEvent, SocialPlatform, StatusField, TranscodeJob, TranscodeJobEvent, TranslationEvent,
    VideoProcessorEvent,
};
use veriflow_pipeline::testing::{message, TestHarness, OWNER};
use veriflow_pipeline::workers::{
    self, CheckFactWorker, SocialMediaWorker, TranscoderWorker, TranslationWorker, VideoWorker,
};
use veriflow_pipeline::{MediaPipeline, SocialMediaPipeline};
use veriflow_queue::{MessageHandler, ReceivedMessage};

const EXHAUSTED: &str = "Exceeded maximum retry attempts (2)";

fn check_fact_worker(h: &TestHarness) -> CheckFactWorker {
    CheckFactWorker::new(h.deps(), ReentryPolicy::FreshOnly, 2)
}

fn failed_pushes(h: &TestHarness) -> usize {
    h.owner_pushes()
        .iter()
        .filter(|m| m.kind == NotificationKind::FactCheckFailed)
        .count()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// check-fact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_fact_processes_every_referenced_verification() {
    let h = TestHarness::new();
    let a = h.insert(h.verification().with_text("claim A")).await;
    let b = h.insert(h.verification().with_text("claim B")).await;

    let event = CheckFactEvent {
        verifications: vec![a, b],
    };
    check_fact_worker(&h).handle(&message(&event, 1)).await.unwrap();

    for id in [a, b] {
        assert_eq!(h.get(id).status(StatusField::FactCheck), Some(ProcessingStatus::Completed));
    }
    assert_eq!(h.fact_checker.requests().len(), 2);
}

#[tokio::test]
async fn redelivery_of_a_finished_message_is_skipped() {
    let h = TestHarness::new();
    let id = h.insert(h.verification().with_text("claim")).await;
    let worker = check_fact_worker(&h);
    let event = CheckFactEvent::single(id);

    worker.handle(&message(&event, 1)).await.unwrap();
    worker.handle(&message(&event, 2)).await.unwrap();

    assert_eq!(h.fact_checker.requests().len(), 1);
    let started = h
        .owner_pushes()
        .iter()
        .filter(|m| m.kind == NotificationKind::FactCheckStarted)
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn collaborator_outage_nacks_and_retry_is_silent() {
    let h = TestHarness::new();
    let id = h.insert(h.verification().with_text("claim")).await;
    let worker = check_fact_worker(&h);
    let event = CheckFactEvent::single(id);

    h.validity.error();
    assert!(worker.handle(&message(&event, 1)).await.is_err());

    h.validity.valid();
    worker.handle(&message(&event, 2)).await.unwrap();

    assert_eq!(h.get(id).status(StatusField::FactCheck), Some(ProcessingStatus::Completed));
    let kinds: Vec<_> = h.owner_pushes().iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![NotificationKind::FactCheckStarted, NotificationKind::FactCheckCompleted]
    );
}

#[tokio::test]
async fn invalid_content_is_not_rechecked_on_redelivery() {
    let h = TestHarness::new();
    let id = h.insert(h.verification().with_text("claim")).await;
    h.validity.invalid("not checkable");
    let worker = check_fact_worker(&h);
    let event = CheckFactEvent::single(id);

    worker.handle(&message(&event, 1)).await.unwrap();
    worker.handle(&message(&event, 2)).await.unwrap();

    assert_eq!(h.validity.requests().len(), 1);
    assert_eq!(h.get(id).status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert_eq!(failed_pushes(&h), 1);
}

#[tokio::test]
async fn erroring_id_is_retried_while_invalid_sibling_is_left_alone() {
    let h = TestHarness::new();
    let a = h.insert(h.verification().with_text("claim A")).await;
    let b = h.insert(h.verification().with_text("claim B")).await;
    h.validity.error_for("claim A");
    h.validity.invalid_for("claim B", "not checkable");
    let worker = check_fact_worker(&h);
    let event = CheckFactEvent {
        verifications: vec![a, b],
    };

    assert!(worker.handle(&message(&event, 1)).await.is_err());
    assert!(worker.handle(&message(&event, 2)).await.is_err());

    let checks = |claim: &str| {
        h.validity
            .requests()
            .iter()
            .filter(|r| r.statement.contains(claim))
            .count()
    };
    assert_eq!(checks("claim A"), 2);
    assert_eq!(checks("claim B"), 1);
    assert_eq!(h.get(a).status(StatusField::FactCheck), Some(ProcessingStatus::Pending));
    let b = h.get(b);
    assert_eq!(b.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert_eq!(b.error.as_deref(), Some("not checkable"));
    assert_eq!(failed_pushes(&h), 1);
}

#[tokio::test]
async fn exhausted_budget_fails_every_verification() {
    let h = TestHarness::new();
    let a = h.insert(h.verification().with_text("claim A")).await;
    let b = h.insert(h.verification().with_text("claim B")).await;

    let event = CheckFactEvent {
        verifications: vec![a, b],
    };
    check_fact_worker(&h).handle(&message(&event, 3)).await.unwrap();

    for id in [a, b] {
        let v = h.get(id);
        assert_eq!(v.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
        assert_eq!(v.error.as_deref(), Some(EXHAUSTED));
    }
    assert!(h.validity.requests().is_empty());
    assert!(h.owner_pushes().is_empty());
}

#[tokio::test]
async fn undecodable_message_is_acked() {
    let h = TestHarness::new();
    let garbage = ReceivedMessage {
        ack_id: "a".into(),
        message_id: "m".into(),
        data: b"not json".to_vec(),
        delivery_attempt: 1,
        publish_time: Utc::now(),
    };

    assert!(check_fact_worker(&h).handle(&garbage).await.is_ok());
    assert!(TranslationWorker::new(h.deps(), 2).handle(&garbage).await.is_ok());
}

// ---------------------------------------------------------------------------
// translation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn translation_fills_every_target_language() {
    let h = TestHarness::new();
    let mut v = h.verification().with_text("claim");
    v.title = Some("Title".into());
    let id = h.insert(v).await;

    TranslationWorker::new(h.deps(), 5)
        .handle(&message(&TranslationEvent { verification_id: id }, 1))
        .await
        .unwrap();

    let v = h.get(id);
    assert_eq!(v.status(StatusField::Translation), Some(ProcessingStatus::Completed));
    assert!(v.translation_completed_at.is_some());
    assert_eq!(v.translations["title"]["ka"], "[ka] Title");
    assert_eq!(v.translations["text_content"].len(), 5);
}

#[tokio::test]
async fn translator_failure_is_recorded_and_redelivered() {
    let h = TestHarness::new();
    let id = h.insert(h.verification().with_text("claim")).await;
    h.translator.fail();

    let result = TranslationWorker::new(h.deps(), 5)
        .handle(&message(&TranslationEvent { verification_id: id }, 1))
        .await;

    assert!(result.is_err());
    let v = h.get(id);
    assert_eq!(v.status(StatusField::Translation), Some(ProcessingStatus::Failed));
    assert!(v.translation_error.unwrap().contains("quota"));
}

#[tokio::test]
async fn nothing_to_translate_completes_immediately() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;

    TranslationWorker::new(h.deps(), 5)
        .handle(&message(&TranslationEvent { verification_id: id }, 1))
        .await
        .unwrap();

    assert_eq!(h.translator.calls(), 0);
    assert_eq!(h.get(id).status(StatusField::Translation), Some(ProcessingStatus::Completed));
}

#[tokio::test]
async fn exhausted_translation_is_failed() {
    let h = TestHarness::new();
    let id = h.insert(h.verification().with_text("claim")).await;

    TranslationWorker::new(h.deps(), 2)
        .handle(&message(&TranslationEvent { verification_id: id }, 3))
        .await
        .unwrap();

    let v = h.get(id);
    assert_eq!(v.status(StatusField::Translation), Some(ProcessingStatus::Failed));
    assert_eq!(v.translation_error.as_deref(), Some(EXHAUSTED));
    assert_eq!(h.translator.calls(), 0);
}

// ---------------------------------------------------------------------------
// social media and video
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_scrape_fails_scrape_and_fact_check() {
    let h = TestHarness::new();
    let id = h
        .insert(
            h.verification()
                .with_social_link(SocialPlatform::Facebook, "https://facebook.com/p/1"),
        )
        .await;

    SocialMediaWorker::new(h.deps(), 2)
        .handle(&message(&SocialMediaScrapeEvent { verification_id: id }, 3))
        .await
        .unwrap();

    let v = h.get(id);
    assert_eq!(v.status(StatusField::SocialMediaScrape), Some(ProcessingStatus::Failed));
    assert_eq!(v.social_media_scrape_error.as_deref(), Some(EXHAUSTED));
    assert_eq!(v.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert_eq!(h.scraper.calls(), 0);
}

#[tokio::test]
async fn exhausted_video_fails_summary_and_fact_check() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    let event = VideoProcessorEvent {
        verification_id: id,
        youtube_url: "https://youtu.be/vid-1".into(),
        external_user_id: OWNER.into(),
        video_title: None,
    };

    VideoWorker::new(h.deps(), 2).handle(&message(&event, 3)).await.unwrap();

    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Failed));
    assert_eq!(v.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert_eq!(h.video.downloads(), 0);
}

#[tokio::test]
async fn scrape_hand_off_is_published_on_redelivery() {
    let h = TestHarness::new();
    let id = h
        .insert(
            h.verification()
                .with_social_link(SocialPlatform::Facebook, "https://facebook.com/p/1"),
        )
        .await;
    let worker = SocialMediaWorker::new(h.deps(), 3);
    let event = SocialMediaScrapeEvent { verification_id: id };
    h.broker.fail_next_publishes(1);

    assert!(worker.handle(&message(&event, 1)).await.is_err());
    worker.handle(&message(&event, 2)).await.unwrap();

    assert_eq!(h.scraper.calls(), 1);
    assert_eq!(h.published(topics::CHECK_FACT).len(), 1);
}

#[tokio::test]
async fn video_hand_off_is_published_on_redelivery() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    let worker = VideoWorker::new(h.deps(), 3);
    let event = VideoProcessorEvent {
        verification_id: id,
        youtube_url: "https://youtu.be/vid-1".into(),
        external_user_id: OWNER.into(),
        video_title: None,
    };
    h.broker.fail_next_publishes(1);

    assert!(worker.handle(&message(&event, 1)).await.is_err());
    worker.handle(&message(&event, 2)).await.unwrap();

    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Completed));
    assert_ne!(v.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert_eq!(h.transcriber.calls(), 1);
    assert_eq!(h.published(topics::CHECK_FACT).len(), 1);
    assert_eq!(failed_pushes(&h), 0);
}

// ---------------------------------------------------------------------------
// transcoder
// ---------------------------------------------------------------------------

fn job_event(name: &str, state: &str) -> TranscodeJobEvent {
    TranscodeJobEvent {
        job: TranscodeJob {
            name: name.into(),
            state: state.into(),
        },
    }
}

#[tokio::test]
async fn finished_transcode_marks_media_ready() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    let submission = MediaPipeline::new(h.deps())
        .submit_video_transcode(id, "gs://raw/video.mp4")
        .await
        .unwrap();

    let v = h.get(id);
    assert_eq!(v.media_state, Some(MediaState::ProcessingMedia));
    assert_eq!(v.transcode_job_name.as_deref(), Some(submission.job_name.as_str()));
    assert_eq!(v.playback.unwrap().hls, format!("transcoded/{id}/manifest.m3u8"));

    TranscoderWorker::new(h.deps())
        .handle(&message(&job_event(&submission.job_name, "SUCCEEDED"), 1))
        .await
        .unwrap();

    assert_eq!(h.get(id).media_state, Some(MediaState::ReadyForUse));
}

#[tokio::test]
async fn failed_transcode_marks_media_failed() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    let submission = MediaPipeline::new(h.deps())
        .submit_video_transcode(id, "gs://raw/video.mp4")
        .await
        .unwrap();

    TranscoderWorker::new(h.deps())
        .handle(&message(&job_event(&submission.job_name, "FAILED"), 1))
        .await
        .unwrap();

    assert_eq!(h.get(id).media_state, Some(MediaState::ProcessingFailed));
}

#[tokio::test]
async fn transcode_for_unknown_verification_is_rejected() {
    let h = TestHarness::new();
    let result = MediaPipeline::new(h.deps())
        .submit_video_transcode(Uuid::new_v4(), "gs://raw/video.mp4")
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unknown_transcode_job_is_ignored() {
    let h = TestHarness::new();
    let settled = MediaPipeline::new(h.deps())
        .complete(&job_event("jobs/missing", "SUCCEEDED"))
        .await
        .unwrap();
    assert!(settled.is_none());
}

// ---------------------------------------------------------------------------
// Through the queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn social_link_flows_through_scrape_fact_check_and_translation() {
    let h = TestHarness::new();
    let deps = h.deps();
    let handles = workers::start_all(&deps, &Config::default()).await.unwrap();
    assert_eq!(handles.len(), 5);

    let v = SocialMediaPipeline::new(deps)
        .submit_link(OWNER, Uuid::new_v4(), "https://www.facebook.com/nino/posts/9")
        .await
        .unwrap();

    let store = h.store.clone();
    wait_until(|| {
        store
            .snapshot(v.id)
            .is_some_and(|v| v.status(StatusField::Translation) == Some(ProcessingStatus::Completed))
    })
    .await;

    let done = h.get(v.id);
    assert_eq!(done.status(StatusField::SocialMediaScrape), Some(ProcessingStatus::Completed));
    assert_eq!(done.status(StatusField::FactCheck), Some(ProcessingStatus::Completed));
    assert!(done.translations.contains_key("fact_check_reason"));
    assert_eq!(h.published(topics::CHECK_FACT).len(), 1);

    h.queue.close().await;
}
