use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

const STREAM_ROUTE: &str = "/api/v1/running-tests/stream";

/// Records request count and latency per route template.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = route_label(req.extensions().get::<MatchedPath>(), req.uri().path());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &route, &status])
        .inc();

    // SSE handlers return at once; their lifetime is tracked by the subscriber gauge.
    if route != STREAM_ROUTE {
        HTTP_REQUEST_DURATION_SECONDS
            .with_label_values(&[&method, &route])
            .observe(start.elapsed().as_secs_f64());
    }

    response
}

/// Route template when the router matched one, otherwise the path with id-like
/// segments collapsed.
fn route_label(matched: Option<&MatchedPath>, path: &str) -> String {
    match matched {
        Some(matched) => matched.as_str().to_string(),
        None => collapse_ids(path),
    }
}

fn collapse_ids(path: &str) -> String {
    path.split('/')
        .map(|segment| if is_id_segment(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// Session ids are UUIDs, test ids are integers.
fn is_id_segment(segment: &str) -> bool {
    let numeric = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
    numeric || uuid::Uuid::parse_str(segment).is_ok()
}
