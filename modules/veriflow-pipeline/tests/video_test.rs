use std::time::Duration;

use uuid::Uuid;
use veriflow_common::{topics, NotificationKind, ProcessingStatus, StatusField, VideoProcessorEvent};
use veriflow_pipeline::testing::{video_summary, TestHarness, OWNER, OWNER_TOKEN};
use veriflow_pipeline::{VideoOutcome, VideoPipeline};
use veriflow_store::UserProfile;

fn event(id: Uuid) -> VideoProcessorEvent {
    VideoProcessorEvent {
        verification_id: id,
        youtube_url: "https://youtu.be/vid-1".into(),
        external_user_id: OWNER.into(),
        video_title: None,
    }
}

#[tokio::test]
async fn video_is_transcribed_summarized_and_sent_to_fact_check() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;

    let outcome = VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(outcome, VideoOutcome::Summarized);
    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Completed));
    assert_eq!(v.status(StatusField::Metadata), Some(ProcessingStatus::Completed));
    assert_eq!(v.youtube_id.as_deref(), Some("vid-1"));
    assert_eq!(v.ai_video_summary, Some(video_summary()));
    assert!(h.storage.contains("audio/vid-1.webm"));
    assert_eq!(h.video.downloads(), 1);

    let pushes = h.owner_pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].kind, NotificationKind::VideoAnalysisComplete);
    assert_eq!(h.published(topics::CHECK_FACT).len(), 1);
}

#[tokio::test]
async fn stored_audio_is_not_downloaded_again() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    h.storage.put("audio/vid-1.webm", b"audio");

    VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(h.video.downloads(), 0);
    assert_eq!(h.transcriber.calls(), 1);
}

#[tokio::test]
async fn summary_of_the_same_video_is_reused() {
    let h = TestHarness::new();
    let mut source = h.verification();
    source.youtube_id = Some("vid-1".into());
    source.ai_video_summary = Some(video_summary());
    source
        .statuses
        .set(StatusField::AiVideoSummary, ProcessingStatus::Completed);
    let source = h.insert(source).await;
    let id = h.insert(h.verification()).await;

    let outcome = VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(outcome, VideoOutcome::Reused { from: source });
    assert_eq!(h.transcriber.calls(), 0);
    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Completed));
    assert_eq!(v.ai_video_summary, Some(video_summary()));
    let published = h.published(topics::CHECK_FACT);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["verifications"][0], id.to_string());
}

#[tokio::test]
async fn long_video_is_refused_for_regular_users() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    h.video.with_info("vid-2", 5000);

    let outcome = VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(
        outcome,
        VideoOutcome::TooLong {
            duration_secs: 5000,
            limit_secs: 4000
        }
    );
    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Failed));
    assert_eq!(v.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert!(!v.is_public);
    assert_eq!(h.video.downloads(), 0);
    assert_eq!(h.owner_pushes()[0].kind, NotificationKind::VideoTooLong);
    assert!(h.published(topics::CHECK_FACT).is_empty());
}

#[tokio::test]
async fn summarizer_accounts_get_the_extended_limit() {
    let h = TestHarness::new();
    h.users
        .upsert(UserProfile::new(OWNER).with_token(OWNER_TOKEN).summarizer());
    let id = h.insert(h.verification()).await;
    h.video.with_info("vid-2", 5000);

    let outcome = VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(outcome, VideoOutcome::Summarized);
}

#[tokio::test]
async fn concurrent_summary_claim_is_left_alone() {
    let h = TestHarness::new();
    let mut v = h.verification();
    v.statuses
        .set(StatusField::AiVideoSummary, ProcessingStatus::Pending);
    let id = h.insert(v).await;

    let outcome = VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(outcome, VideoOutcome::AlreadyRunning);
    assert_eq!(h.video.downloads(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_video_times_out_and_fails_the_verification() {
    let mut h = TestHarness::new();
    h.settings.video_callback_timeout = Duration::from_secs(5);
    let id = h.insert(h.verification()).await;
    h.video.slow_download(Duration::from_secs(60));

    let outcome = VideoPipeline::new(h.deps()).handle(&event(id)).await.unwrap();

    assert_eq!(outcome, VideoOutcome::TimedOut);
    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Failed));
    assert_eq!(v.status(StatusField::FactCheck), Some(ProcessingStatus::Failed));
    assert!(v.error.unwrap().contains("timed out"));
    assert_eq!(h.owner_pushes().last().unwrap().kind, NotificationKind::FactCheckFailed);
}

#[tokio::test]
async fn failed_hand_off_keeps_the_summary_and_is_repeated() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    let pipeline = VideoPipeline::new(h.deps());
    h.broker.fail_next_publishes(1);

    assert!(pipeline.handle(&event(id)).await.is_err());
    let v = h.get(id);
    assert_eq!(v.status(StatusField::AiVideoSummary), Some(ProcessingStatus::Completed));
    assert_eq!(v.status(StatusField::FactCheck), None);
    assert!(v.is_public);
    assert!(h.owner_pushes().is_empty());

    let outcome = pipeline.handle_attempt(&event(id), 2).await.unwrap();

    assert_eq!(outcome, VideoOutcome::HandedOff);
    assert_eq!(h.transcriber.calls(), 1);
    assert_eq!(h.published(topics::CHECK_FACT).len(), 1);
    let kinds: Vec<_> = h.owner_pushes().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::VideoAnalysisComplete]);
}

#[tokio::test]
async fn first_delivery_of_a_summarized_video_runs_again() {
    let h = TestHarness::new();
    let id = h.insert(h.verification()).await;
    let pipeline = VideoPipeline::new(h.deps());

    pipeline.handle(&event(id)).await.unwrap();
    let again = pipeline.handle(&event(id)).await.unwrap();

    assert_eq!(again, VideoOutcome::Summarized);
    assert_eq!(h.transcriber.calls(), 2);
}
