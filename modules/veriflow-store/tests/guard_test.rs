use std::sync::Arc;

use uuid::Uuid;
use veriflow_common::{ProcessingStatus, ReentryPolicy, StatusField, Verification};
use veriflow_store::{IdempotencyGuard, MemoryVerificationStore, VerificationStore};

async fn seeded(statuses: &[Option<ProcessingStatus>]) -> (Arc<MemoryVerificationStore>, Vec<Uuid>) {
    let store = Arc::new(MemoryVerificationStore::new());
    let mut ids = Vec::new();
    for status in statuses {
        let mut v = Verification::new("owner", Uuid::new_v4()).with_text("claim");
        if let Some(s) = status {
            v.statuses.set(StatusField::FactCheck, *s);
        }
        store.insert(&v).await.unwrap();
        ids.push(v.id);
    }
    (store, ids)
}

#[tokio::test]
async fn unknown_and_fresh_ids_need_processing() {
    let (store, mut ids) = seeded(&[None]).await;
    let missing = Uuid::new_v4();
    ids.push(missing);

    let guard = IdempotencyGuard::new(store, ReentryPolicy::FreshOnly);
    let c = guard.classify(&ids, StatusField::FactCheck, 1).await.unwrap();

    assert_eq!(c.needs_processing, ids);
    assert_eq!(c.not_found, vec![missing]);
}

#[tokio::test]
async fn pending_is_always_reprocessed() {
    use ProcessingStatus::*;
    let (store, ids) = seeded(&[Some(Pending), Some(Processing)]).await;

    let guard = IdempotencyGuard::new(store, ReentryPolicy::Never);
    let c = guard.classify(&ids, StatusField::FactCheck, 3).await.unwrap();

    assert_eq!(c.needs_processing, ids);
    assert_eq!(c.already_pending, ids);
    assert_eq!(c.entry_status(ids[0]), Some(Pending));
}

#[tokio::test]
async fn fresh_only_leaves_failed_alone_on_redelivery() {
    let (store, ids) = seeded(&[Some(ProcessingStatus::Failed)]).await;
    let guard = IdempotencyGuard::new(store, ReentryPolicy::FreshOnly);

    let first = guard.classify(&ids, StatusField::FactCheck, 1).await.unwrap();
    assert_eq!(first.needs_processing, ids);

    let redelivery = guard.classify(&ids, StatusField::FactCheck, 2).await.unwrap();
    assert!(redelivery.needs_processing.is_empty());
    assert_eq!(redelivery.already_failed, ids);
    assert_eq!(redelivery.skipped(), 1);
}

#[tokio::test]
async fn fresh_only_reruns_completed_on_first_delivery_only() {
    let (store, ids) = seeded(&[Some(ProcessingStatus::Completed)]).await;
    let guard = IdempotencyGuard::new(store, ReentryPolicy::FreshOnly);

    let first = guard.classify(&ids, StatusField::FactCheck, 1).await.unwrap();
    assert_eq!(first.needs_processing, ids);

    let redelivery = guard.classify(&ids, StatusField::FactCheck, 2).await.unwrap();
    assert!(redelivery.needs_processing.is_empty());
    assert_eq!(redelivery.already_completed, ids);
    assert_eq!(redelivery.skipped(), 1);
}

#[tokio::test]
async fn always_and_never_policies() {
    let (store, ids) = seeded(&[Some(ProcessingStatus::Completed)]).await;

    let always = IdempotencyGuard::new(store.clone(), ReentryPolicy::Always);
    assert_eq!(always.classify(&ids, StatusField::FactCheck, 5).await.unwrap().needs_processing, ids);

    let never = IdempotencyGuard::new(store, ReentryPolicy::Never);
    assert!(never.classify(&ids, StatusField::FactCheck, 1).await.unwrap().needs_processing.is_empty());

    let (store, failed) = seeded(&[Some(ProcessingStatus::Failed)]).await;
    let always = IdempotencyGuard::new(store.clone(), ReentryPolicy::Always);
    assert_eq!(always.classify(&failed, StatusField::FactCheck, 5).await.unwrap().needs_processing, failed);
    let never = IdempotencyGuard::new(store, ReentryPolicy::Never);
    assert!(never.classify(&failed, StatusField::FactCheck, 1).await.unwrap().needs_processing.is_empty());
}

#[tokio::test]
async fn duplicate_ids_are_classified_once() {
    let (store, ids) = seeded(&[None]).await;
    let guard = IdempotencyGuard::new(store, ReentryPolicy::FreshOnly);

    let c = guard.classify(&[ids[0], ids[0]], StatusField::FactCheck, 1).await.unwrap();
    assert_eq!(c.needs_processing, vec![ids[0]]);
}

#[tokio::test]
async fn classification_reads_the_requested_field() {
    let store = Arc::new(MemoryVerificationStore::new());
    let mut v = Verification::new("owner", Uuid::new_v4());
    v.statuses.set(StatusField::Translation, ProcessingStatus::Completed);
    store.insert(&v).await.unwrap();

    let guard = IdempotencyGuard::new(store, ReentryPolicy::Never);
    let fact = guard.classify(&[v.id], StatusField::FactCheck, 2).await.unwrap();
    let translation = guard.classify(&[v.id], StatusField::Translation, 2).await.unwrap();

    assert_eq!(fact.needs_processing, vec![v.id]);
    assert!(translation.needs_processing.is_empty());
}
