#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use quizer_api::{
    config::{Config, StorageBackend},
    create_router,
    middlewares::auth::{JwtClaims, JwtService, Role},
    models::{CatalogBundle, Question, QuestionOption, TestDefinition},
    services::{catalog_seed, AppState},
};

pub const LECTURER: &str = "lect-1";
pub const OTHER_LECTURER: &str = "lect-2";

/// Test with 3 valid questions drawing 2 per session.
pub const ALGEBRA: i64 = 1;
/// Asks for 5 questions but the bank holds 3.
pub const PHYSICS: i64 = 2;
/// Zero duration: without a grace period its window closes at launch.
pub const FLASH: i64 = 3;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn test_config() -> Config {
    Config {
        storage_backend: StorageBackend::Memory,
        jwt_secret: "integration-test-secret".to_string(),
        submission_grace_seconds: 30,
        pending_slack_seconds: 60,
        ..Config::default()
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(test_config()).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let state = Arc::new(AppState::in_memory(config));
    catalog_seed::load_bundle(state.catalog.as_ref(), catalog())
        .await
        .expect("Failed to seed catalog");

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

fn option(text: &str, is_true: bool) -> QuestionOption {
    QuestionOption {
        text: Some(text.to_string()),
        image: None,
        is_true,
    }
}

pub fn question(id: &str, test_id: i64, multiselect: bool, options: &[bool]) -> Question {
    Question {
        id: id.to_string(),
        test_id,
        formulation: format!("Formulation of {}", id),
        multiselect,
        options: options
            .iter()
            .enumerate()
            .map(|(i, is_true)| option(&format!("{}-option-{}", id, i + 1), *is_true))
            .collect(),
    }
}

pub fn test_definition(id: i64, name: &str, tasks_num: u32, duration_seconds: u32) -> TestDefinition {
    TestDefinition {
        id,
        name: name.to_string(),
        description: format!("{} quiz", name),
        subject_id: 10,
        subject_name: "Science".to_string(),
        author_id: LECTURER.to_string(),
        tasks_num,
        duration_seconds,
    }
}

fn catalog() -> CatalogBundle {
    CatalogBundle {
        tests: vec![
            test_definition(ALGEBRA, "Algebra", 2, 600),
            test_definition(PHYSICS, "Physics", 5, 600),
            test_definition(FLASH, "Flash", 1, 0),
        ],
        questions: vec![
            question("alg-1", ALGEBRA, false, &[false, true, false]),
            question("alg-2", ALGEBRA, true, &[true, false, true]),
            question("alg-3", ALGEBRA, false, &[true, false]),
            question("phy-1", PHYSICS, false, &[true, false]),
            question("phy-2", PHYSICS, false, &[false, true]),
            question("phy-3", PHYSICS, true, &[true, true]),
            question("fla-1", FLASH, false, &[true, false]),
        ],
    }
}

/// Correct answer for a seeded question in the wire format.
pub fn correct_answer(question_id: &str) -> Value {
    match question_id {
        "alg-1" => json!(2),
        "alg-2" => json!([1, 3]),
        "alg-3" => json!(1),
        "fla-1" => json!(1),
        other => panic!("no answer key for {}", other),
    }
}

/// Answers every question of a `begin` response correctly.
pub fn correct_answers(paper: &Value) -> Value {
    let mut answers = serde_json::Map::new();
    for question in paper["questions"].as_array().expect("questions array") {
        let id = question["question_id"].as_str().expect("question id");
        answers.insert(id.to_string(), correct_answer(id));
    }
    Value::Object(answers)
}

pub fn token(app: &TestApp, user_id: &str, role: Role) -> String {
    JwtService::new(&app.state.config.jwt_secret)
        .generate_token(JwtClaims::new(user_id, &format!("{}-name", user_id), role, 3600))
        .expect("Failed to sign token")
}

pub fn lecturer_token(app: &TestApp) -> String {
    token(app, LECTURER, Role::Lecturer)
}

pub fn student_token(app: &TestApp, student_id: &str) -> String {
    token(app, student_id, Role::Student)
}

pub async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

/// Launches `test_id` as the default lecturer and returns the session id.
pub async fn launch(app: &TestApp, test_id: i64) -> String {
    let token = lecturer_token(app);
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/sessions/{}", test_id),
        Some(&token),
        Some(json!({ "comment": "group A" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "launch failed: {}", body);
    body["id"].as_str().expect("session id").to_string()
}

pub async fn begin(app: &TestApp, session_id: &str, student_token: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/v1/sessions/{}/begin", session_id),
        Some(student_token),
        None,
    )
    .await
}

pub async fn submit(
    app: &TestApp,
    session_id: &str,
    student_token: &str,
    answers: Value,
) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/v1/sessions/{}/submit", session_id),
        Some(student_token),
        Some(json!({ "answers": answers, "elapsed_seconds": 42 })),
    )
    .await
}
