use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use veriflow_pipeline::health::{router, HealthState};
use veriflow_pipeline::testing::TestHarness;
use veriflow_queue::Broker;

fn state(h: &TestHarness) -> HealthState {
    HealthState {
        store: h.store.clone(),
        broker: h.broker.clone(),
    }
}

async fn get_health(state: HealthState) -> (StatusCode, Value) {
    let response = router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn healthy_when_store_and_broker_answer() {
    let h = TestHarness::new();
    let (status, body) = get_health(state(&h)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unavailable_store_is_reported() {
    let h = TestHarness::new();
    h.store.set_unavailable(true);

    let (status, body) = get_health(state(&h)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["component"], "store");
}

#[tokio::test]
async fn closed_broker_is_reported() {
    let h = TestHarness::new();
    h.broker.close().await;

    let (status, body) = get_health(state(&h)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["component"], "broker");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let h = TestHarness::new();
    let response = router(state(&h))
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
