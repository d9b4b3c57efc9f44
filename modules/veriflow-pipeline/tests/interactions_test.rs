use uuid::Uuid;
use veriflow_common::NotificationKind;
use veriflow_pipeline::testing::{TestHarness, OWNER};
use veriflow_pipeline::InteractionNotifier;
use veriflow_store::UserProfile;

fn harness() -> TestHarness {
    let h = TestHarness::new();
    h.users.upsert(UserProfile::new("liker").with_username("giorgi"));
    h
}

#[tokio::test]
async fn like_is_pushed_once_per_cooldown() {
    let h = harness();
    let id = h.insert(h.verification().with_text("claim")).await;
    let notifier = InteractionNotifier::new(h.deps());

    let first = notifier.liked(id, "liker").await.unwrap().unwrap();
    let second = notifier.liked(id, "liker").await.unwrap().unwrap();

    assert!(first.recorded && first.pushed);
    assert!(second.recorded && !second.pushed);

    let pushes = h.owner_pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].kind, NotificationKind::Like);
    assert!(pushes[0].title.contains("giorgi"));
    assert_eq!(h.records.all().len(), 2);
}

#[tokio::test]
async fn owner_liking_own_post_is_ignored() {
    let h = harness();
    let id = h.insert(h.verification()).await;

    let outcome = InteractionNotifier::new(h.deps()).liked(id, OWNER).await.unwrap();

    assert!(outcome.is_none());
    assert!(h.records.all().is_empty());
}

#[tokio::test]
async fn interaction_on_unknown_verification_is_ignored() {
    let h = harness();
    let outcome = InteractionNotifier::new(h.deps())
        .liked(Uuid::new_v4(), "liker")
        .await
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn impression_milestones_share_one_cooldown_per_post() {
    let h = harness();
    let id = h.insert(h.verification()).await;
    let notifier = InteractionNotifier::new(h.deps());

    let first = notifier.impression_milestone(id, "liker", 100).await.unwrap().unwrap();
    let second = notifier
        .impression_milestone(id, "stranger", 200)
        .await
        .unwrap()
        .unwrap();

    assert!(first.pushed);
    assert!(!second.pushed);
    let pushes = h.owner_pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].title.contains("100"));
}
