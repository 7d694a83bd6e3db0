use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

use quizer_api::models::SessionAction;

mod common;
use common::ALGEBRA;

#[tokio::test]
async fn test_events_follow_the_session_lifecycle() {
    let app = common::create_test_app().await;
    let mut events = app.state.broadcaster.subscribe();

    let session_id = common::launch(&app, ALGEBRA).await;
    let student = common::student_token(&app, "stud-1");
    let (_, paper) = common::begin(&app, &session_id, &student).await;
    common::submit(&app, &session_id, &student, common::correct_answers(&paper)).await;
    common::send(
        &app,
        "PUT",
        &format!("/api/v1/sessions/{}/stop", session_id),
        Some(&common::lecturer_token(&app)),
        None,
    )
    .await;

    let started = events.recv().await.unwrap();
    assert_eq!(started.action, SessionAction::Started);
    assert_eq!(started.session_id, session_id);
    assert_eq!(started.test_id, ALGEBRA);
    assert_eq!(started.results_count, 0);

    let added = events.recv().await.unwrap();
    assert_eq!(added.action, SessionAction::ResultAdded);
    assert_eq!(added.results_count, 1);

    let stopped = events.recv().await.unwrap();
    assert_eq!(stopped.action, SessionAction::Stopped);
    assert_eq!(stopped.results_count, 1);
}

#[tokio::test]
async fn test_rejected_operations_publish_nothing() {
    let app = common::create_test_app().await;
    let session_id = common::launch(&app, ALGEBRA).await;
    let mut events = app.state.broadcaster.subscribe();

    let student = common::student_token(&app, "stud-1");
    let (status, _) =
        common::submit(&app, &session_id, &student, serde_json::json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = common::send(
        &app,
        "POST",
        "/api/v1/sessions/999",
        Some(&common::lecturer_token(&app)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Only the marker below may reach the subscriber.
    app.state
        .broadcaster
        .publish(quizer_api::models::RunningTestsEvent::stopped("marker", 0, 0));
    let next = events.recv().await.unwrap();
    assert_eq!(next.session_id, "marker");
}

#[tokio::test]
async fn test_stream_endpoint_serves_event_stream() {
    let app = common::create_test_app().await;

    let request = Request::builder()
        .uri("/api/v1/running-tests/stream")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(app.state.broadcaster.subscriber_count(), 1);

    drop(response);
    assert_eq!(app.state.broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn test_stream_delivers_named_events() {
    use http_body_util::BodyExt;

    let app = common::create_test_app().await;
    let request = Request::builder()
        .uri("/api/v1/running-tests/stream")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    let session_id = common::launch(&app, ALGEBRA).await;

    let mut body = response.into_body();
    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), body.frame())
        .await
        .expect("no event within timeout")
        .expect("stream ended")
        .unwrap();
    let chunk = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();

    assert!(chunk.contains("event: started"), "chunk: {}", chunk);
    assert!(chunk.contains(&session_id));
    assert!(chunk.contains("\"results_count\":0"));
}
