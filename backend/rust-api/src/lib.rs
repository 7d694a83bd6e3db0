use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::QuizError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .route(
            "/api/v1/running-tests/stream",
            get(handlers::stream::running_tests_stream),
        )
        // Protected endpoints (require JWT)
        .nest(
            "/api/v1",
            api_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(handlers::sessions::list_tests))
        .route("/sessions/running", get(handlers::sessions::get_running))
        .route("/sessions/finished", get(handlers::sessions::get_finished))
        .route("/sessions/{id}", post(handlers::sessions::launch))
        .route("/sessions/{id}/stop", put(handlers::sessions::stop))
        .route("/sessions/{id}/results", get(handlers::sessions::get_results))
        .route("/sessions/{id}/begin", post(handlers::sessions::begin))
        .route(
            "/sessions/{id}/pending",
            get(handlers::sessions::pending_status).delete(handlers::sessions::abandon),
        )
        .route("/sessions/{id}/submit", post(handlers::sessions::submit))
        .route("/tests/{id}/history", get(handlers::sessions::get_history))
        .route(
            "/tests/{id}/latest-results",
            get(handlers::sessions::latest_results),
        )
}
