use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::QuizError,
    extractors::AppJson,
    middlewares::auth::{require_role, JwtClaims, Role},
    models::{
        BeginResponse, LaunchRequest, ListState, RunningSession, SessionSummary, StopResponse,
        StudentResult, TestListing,
    },
    services::{answer_service::AnswerService, session_service::SessionService, AppState},
};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub state: ListState,
}

fn summaries(sessions: Vec<RunningSession>) -> Vec<SessionSummary> {
    let now = Utc::now();
    sessions.iter().map(|session| session.summary(now)).collect()
}

/// GET /api/v1/sessions?state=running|not_running|all
pub async fn list_tests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TestListing>>, QuizError> {
    let service = SessionService::new(&state);
    Ok(Json(service.list_tests(query.state).await?))
}

/// POST /api/v1/sessions/{test_id}
pub async fn launch(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(test_id): Path<i64>,
    payload: Option<AppJson<LaunchRequest>>,
) -> Result<impl IntoResponse, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let req = payload.map(|AppJson(req)| req).unwrap_or_default();
    req.validate().map_err(|e| QuizError::InvalidRequest {
        reason: e.to_string(),
    })?;

    let service = SessionService::new(&state);
    let session = service.launch(test_id, &claims.sub, req.comment).await?;

    Ok((StatusCode::CREATED, Json(session.summary(Utc::now()))))
}

/// PUT /api/v1/sessions/{session_id}/stop
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<StopResponse>, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let service = SessionService::new(&state);
    Ok(Json(service.stop(&session_id, &claims.sub).await?))
}

/// GET /api/v1/sessions/running
pub async fn get_running(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<Vec<SessionSummary>>, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let service = SessionService::new(&state);
    Ok(Json(summaries(service.get_running(&claims.sub).await?)))
}

/// GET /api/v1/sessions/finished
pub async fn get_finished(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<Vec<SessionSummary>>, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let service = SessionService::new(&state);
    Ok(Json(summaries(service.get_finished(&claims.sub).await?)))
}

/// GET /api/v1/sessions/{session_id}/results
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let service = SessionService::new(&state);
    let session = service.get_results(&session_id, &claims.sub).await?;
    Ok(Json(session.summary(Utc::now())))
}

/// GET /api/v1/tests/{test_id}/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(test_id): Path<i64>,
) -> Result<Json<Vec<SessionSummary>>, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let service = SessionService::new(&state);
    Ok(Json(summaries(
        service.get_history(test_id, &claims.sub).await?,
    )))
}

/// GET /api/v1/tests/{test_id}/latest-results
pub async fn latest_results(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(test_id): Path<i64>,
) -> Result<Json<Vec<StudentResult>>, QuizError> {
    require_role(&claims, &[Role::Lecturer])?;

    let service = SessionService::new(&state);
    Ok(Json(service.latest_results(test_id, &claims.sub).await?))
}

/// POST /api/v1/sessions/{session_id}/begin
pub async fn begin(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    require_role(&claims, &[Role::Student])?;

    let service = AnswerService::new(&state);
    let pending = service
        .begin(&session_id, &claims.sub, &claims.username)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BeginResponse::from_pending(&pending, Utc::now())),
    ))
}

/// GET /api/v1/sessions/{session_id}/pending
pub async fn pending_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    require_role(&claims, &[Role::Student])?;

    let service = AnswerService::new(&state);
    Ok(Json(service.pending(&session_id, &claims.sub).await?))
}

/// DELETE /api/v1/sessions/{session_id}/pending
pub async fn abandon(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, QuizError> {
    require_role(&claims, &[Role::Student])?;

    let service = AnswerService::new(&state);
    service.abandon(&session_id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/{session_id}/submit
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(body): AppJson<serde_json::Value>,
) -> Result<Json<StudentResult>, QuizError> {
    require_role(&claims, &[Role::Student])?;

    let service = AnswerService::new(&state);
    let req = service.parse_submission(&session_id, body)?;
    let result = service
        .submit(&session_id, &claims.sub, &req.answers, req.elapsed_seconds)
        .await?;

    Ok(Json(result))
}
