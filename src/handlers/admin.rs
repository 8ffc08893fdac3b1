// src/handlers/admin.rs
//! Moderation review queue, feedback triage, and operational views. Every
//! route here sits behind both the auth and admin middleware.

use crate::error::ChatError;
use crate::handlers::principal;
use crate::middleware::admin::admin_middleware;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::moderation::Resolution;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub fn admin_routes() -> Router {
    Router::new()
        .route("/api/admin/moderation/queue", get(moderation_queue))
        .route("/api/admin/moderation/:event_id/resolve", post(resolve_event))
        .route(
            "/api/admin/moderation/sessions/:session_id",
            get(session_events),
        )
        .route(
            "/api/admin/moderation/volunteers/:volunteer_id",
            get(volunteer_events),
        )
        .route("/api/admin/moderation/audit", get(audit_log))
        .route("/api/admin/feedback/flagged", get(flagged_feedback))
        .route("/api/admin/feedback/:feedback_id/review", post(review_feedback))
        .route("/api/admin/sessions/stale", get(stale_sessions))
        .route("/api/admin/volunteers/:volunteer_id", get(volunteer_profile))
        .layer(axum::middleware::from_fn(admin_middleware))
        .layer(axum::middleware::from_fn(auth_middleware))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

impl LimitQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}

async fn moderation_queue(
    Query(query): Query<LimitQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let events = state.moderation.queue(query.limit()).await?;
    Ok(Json(events))
}

#[derive(Deserialize)]
struct ResolveRequest {
    resolution: String,
    notes: Option<String>,
}

async fn resolve_event(
    Path(event_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let resolution = Resolution::parse(&request.resolution).ok_or_else(|| {
        ChatError::Validation(format!("unknown resolution '{}'", request.resolution))
    })?;
    let event = state
        .moderation
        .resolve(
            &principal,
            event_id,
            resolution,
            request.notes.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(Json(event))
}

async fn session_events(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let events = state.moderation.session_history(session_id).await?;
    Ok(Json(events))
}

async fn volunteer_events(
    Path(volunteer_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let events = state
        .moderation
        .volunteer_history(volunteer_id, query.limit())
        .await?;
    Ok(Json(events))
}

/// Side-effect failures from past resolutions, oldest first.
async fn audit_log(
    Query(query): Query<LimitQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let entries = state.moderation.audit_log(query.limit()).await?;
    Ok(Json(entries))
}

async fn flagged_feedback(
    Query(query): Query<LimitQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let feedback = state.feedback.flagged_queue(query.limit()).await?;
    Ok(Json(feedback))
}

async fn review_feedback(
    Path(feedback_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    state.feedback.review(&principal, feedback_id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn stale_sessions(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let sessions = state.lifecycle.stale().await?;
    Ok(Json(sessions))
}

async fn volunteer_profile(
    Path(volunteer_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let profile = state
        .store
        .volunteer_profile(volunteer_id)
        .await?
        .ok_or(ChatError::NotFound("volunteer"))?;
    Ok(Json(profile))
}
