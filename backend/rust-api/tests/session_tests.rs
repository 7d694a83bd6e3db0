use axum::http::StatusCode;
use serde_json::json;

use quizer_api::{
    config::Config,
    middlewares::auth::Role,
    models::{RunningTestsEvent, SessionAction},
    services::expiry_worker::ExpiryWorker,
};

mod common;
use common::{ALGEBRA, FLASH, LECTURER, OTHER_LECTURER, PHYSICS};

#[tokio::test]
async fn test_launch_creates_running_session_with_snapshot_size() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let (status, body) = common::send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}", ALGEBRA),
        Some(&token),
        Some(json!({ "comment": "morning group" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["test_id"], ALGEBRA);
    assert_eq!(body["is_running"], true);
    assert_eq!(body["accepting_submissions"], true);
    assert_eq!(body["tasks_num"], 2);
    assert_eq!(body["comment"], "morning group");
    assert_eq!(body["lecturer_id"], LECTURER);
    assert!(body["results"].as_array().unwrap().is_empty());
    // The answer key never leaves the server through the summary.
    assert!(body.get("snapshot").is_none());
}

#[tokio::test]
async fn test_launch_without_body_is_accepted() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let (status, body) = common::send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}", ALGEBRA),
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert!(body.get("comment").is_none());
}

#[tokio::test]
async fn test_launch_underprovisioned_bank_returns_422_and_creates_nothing() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let (status, body) = common::send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}", PHYSICS),
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_questions");
    assert!(body["message"].as_str().unwrap().contains("3 valid questions"));

    let (_, history) = common::send(
        &app,
        "GET",
        &format!("/api/v1/tests/{}/history", PHYSICS),
        Some(&token),
        None,
    )
    .await;
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_launch_unknown_test_returns_404() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let (status, body) =
        common::send(&app, "POST", "/api/v1/sessions/999", Some(&token), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_relaunch_stops_previous_session() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let first = common::launch(&app, ALGEBRA).await;
    let second = common::launch(&app, ALGEBRA).await;
    assert_ne!(first, second);

    let (status, running) =
        common::send(&app, "GET", "/api/v1/sessions/running", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let running = running.as_array().unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0]["id"], second.as_str());

    let (_, finished) =
        common::send(&app, "GET", "/api/v1/sessions/finished", Some(&token), None).await;
    let finished = finished.as_array().unwrap();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0]["id"], first.as_str());
    assert_eq!(finished[0]["is_running"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_launches_leave_one_running_session() {
    let app = std::sync::Arc::new(common::create_test_app().await);
    let mut events = app.state.broadcaster.subscribe();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            common::launch(&app, ALGEBRA).await
        }));
    }
    let mut launched = Vec::new();
    for handle in handles {
        launched.push(handle.await.unwrap());
    }

    let token = common::lecturer_token(&app);
    let (_, running) =
        common::send(&app, "GET", "/api/v1/sessions/running", Some(&token), None).await;
    let running = running.as_array().unwrap();
    assert_eq!(running.len(), 1);
    assert!(launched.contains(&running[0]["id"].as_str().unwrap().to_string()));

    let (_, finished) =
        common::send(&app, "GET", "/api/v1/sessions/finished", Some(&token), None).await;
    assert_eq!(finished.as_array().unwrap().len(), 19);

    let mut started = 0;
    let mut stopped = 0;
    for _ in 0..39 {
        match events.recv().await.unwrap().action {
            SessionAction::Started => started += 1,
            SessionAction::Stopped => stopped += 1,
            SessionAction::ResultAdded => panic!("no results were submitted"),
        }
    }
    assert_eq!((started, stopped), (20, 19));
}

#[tokio::test]
async fn test_running_sessions_are_scoped_per_lecturer() {
    let app = common::create_test_app().await;
    let own = common::launch(&app, ALGEBRA).await;

    let other = common::token(&app, OTHER_LECTURER, Role::Lecturer);
    let (status, _) = common::send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}", ALGEBRA),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Two lecturers may run the same test at once.
    let (_, listing) = common::send(
        &app,
        "GET",
        "/api/v1/sessions?state=running",
        Some(&other),
        None,
    )
    .await;
    let listing = listing.as_array().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0]["id"], ALGEBRA);
    assert_eq!(listing[0]["running_sessions"].as_array().unwrap().len(), 2);

    // A lecturer cannot stop someone else's session.
    let (status, _) = common::send(
        &app,
        "PUT",
        &format!("/api/v1/sessions/{}/stop", own),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);
    let session_id = common::launch(&app, ALGEBRA).await;
    let mut events = app.state.broadcaster.subscribe();

    let uri = format!("/api/v1/sessions/{}/stop", session_id);
    let (status, body) = common::send(&app, "PUT", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], false);
    assert_eq!(body["message"], "Session stopped");

    let (status, body) = common::send(&app, "PUT", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Session was already stopped");

    // Only the first stop is announced.
    let event = events.recv().await.unwrap();
    assert_eq!(event.action, SessionAction::Stopped);
    app.state
        .broadcaster
        .publish(RunningTestsEvent::started("marker", 0));
    assert_eq!(events.recv().await.unwrap().session_id, "marker");
}

#[tokio::test]
async fn test_stop_unknown_session_returns_404() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let (status, body) = common::send(
        &app,
        "PUT",
        "/api/v1/sessions/does-not-exist/stop",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_list_tests_filters_by_running_state() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);
    common::launch(&app, ALGEBRA).await;

    let (status, all) = common::send(&app, "GET", "/api/v1/sessions", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 3);
    let algebra = all.iter().find(|t| t["id"] == ALGEBRA).unwrap();
    assert_eq!(algebra["is_running"], true);
    assert_eq!(algebra["questions_num"], 3);
    assert_eq!(algebra["name"], "Algebra");

    let (_, idle) = common::send(
        &app,
        "GET",
        "/api/v1/sessions?state=not_running",
        Some(&token),
        None,
    )
    .await;
    let idle_ids: Vec<i64> = idle
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_i64().unwrap())
        .collect();
    assert_eq!(idle_ids, vec![PHYSICS, FLASH]);
}

#[tokio::test]
async fn test_history_is_newest_first_and_latest_results_follow_newest_session() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let first = common::launch(&app, ALGEBRA).await;
    let student = common::student_token(&app, "stud-1");
    let (_, paper) = common::begin(&app, &first, &student).await;
    let (status, _) = common::submit(&app, &first, &student, common::correct_answers(&paper)).await;
    assert_eq!(status, StatusCode::OK);

    let second = common::launch(&app, ALGEBRA).await;

    let (_, history) = common::send(
        &app,
        "GET",
        &format!("/api/v1/tests/{}/history", ALGEBRA),
        Some(&token),
        None,
    )
    .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["id"], second.as_str());
    assert_eq!(history[1]["id"], first.as_str());
    assert_eq!(history[1]["results"].as_array().unwrap().len(), 1);

    let (_, latest) = common::send(
        &app,
        "GET",
        &format!("/api/v1/tests/{}/latest-results", ALGEBRA),
        Some(&token),
        None,
    )
    .await;
    assert!(latest.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_results_are_visible_to_owner_only() {
    let app = common::create_test_app().await;
    let session_id = common::launch(&app, ALGEBRA).await;
    let uri = format!("/api/v1/sessions/{}/results", session_id);

    let (status, body) =
        common::send(&app, "GET", &uri, Some(&common::lecturer_token(&app)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], session_id.as_str());

    let other = common::token(&app, OTHER_LECTURER, Role::Lecturer);
    let (status, _) = common::send(&app, "GET", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_student_cannot_launch_or_stop() {
    let app = common::create_test_app().await;
    let student = common::student_token(&app, "stud-1");

    let (status, body) = common::send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}", ALGEBRA),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) =
        common::send(&app, "GET", "/api/v1/sessions/running", Some(&student), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_or_invalid_token_returns_401() {
    let app = common::create_test_app().await;

    let (status, _) = common::send(&app, "GET", "/api/v1/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        common::send(&app, "GET", "/api/v1/sessions", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_overlong_comment_is_rejected() {
    let app = common::create_test_app().await;
    let token = common::lecturer_token(&app);

    let (status, body) = common::send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}", ALGEBRA),
        Some(&token),
        Some(json!({ "comment": "x".repeat(501) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_expired_session_is_closed_and_swept() {
    let app = common::create_test_app_with(Config {
        submission_grace_seconds: 0,
        ..common::test_config()
    })
    .await;
    let session_id = common::launch(&app, FLASH).await;
    let student = common::student_token(&app, "stud-1");

    let (status, body) = common::begin(&app, &session_id, &student).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "session_closed");

    let mut events = app.state.broadcaster.subscribe();
    let report = ExpiryWorker::new(&app.state).run_once().await.unwrap();
    assert_eq!(report.closed_sessions, 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.action, SessionAction::Stopped);
    assert_eq!(event.session_id, session_id);

    // A second sweep finds nothing left to close.
    let report = ExpiryWorker::new(&app.state).run_once().await.unwrap();
    assert_eq!(report.closed_sessions, 0);
}

#[tokio::test]
async fn test_health_reports_in_memory_stores() {
    let app = common::create_test_app().await;

    let (status, body) = common::send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["sessions"]["status"], "healthy");
}

#[tokio::test]
async fn test_metrics_require_basic_auth() {
    let app = common::create_test_app().await;

    let (status, _) = common::send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
