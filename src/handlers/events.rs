// src/handlers/events.rs
use crate::error::ChatError;
use crate::handlers::principal;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::sync::Arc;
use uuid::Uuid;

pub fn event_routes() -> Router {
    Router::new()
        .route("/api/chat/sessions/:session_id/events", get(session_events))
        .layer(axum::middleware::from_fn(auth_middleware))
}

/// SSE stream for one session viewer. The distributor polls the store and
/// feeds a channel; this handler just relays it, with keep-alive comments so
/// proxies don't cut the connection between polls.
async fn session_events(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let principal = principal(&claims)?;
    let rx = state.events.open(&principal, session_id).await?;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default()
            .event(event.name())
            .json_data(event.payload());
        Some((sse, rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
