use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;

use crate::services::{broadcaster::Subscription, AppState};

/// SSE feed of the `running_tests` topic
/// GET /api/v1/running-tests/stream
pub async fn running_tests_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    tracing::info!(
        subscribers = state.broadcaster.subscriber_count(),
        "Client connected to running_tests stream"
    );

    Sse::new(event_stream(subscription)).keep_alive(KeepAlive::default())
}

/// Ends when the broadcaster goes away; the subscription is dropped with the stream.
fn event_stream(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let sse = Event::default()
            .event(event.event_name())
            .data(event.to_sse_data());
        Some((Ok(sse), subscription))
    })
}
