// src/handlers/feedback.rs
use crate::error::ChatError;
use crate::handlers::principal;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::feedback::Rating;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub fn feedback_routes() -> Router {
    Router::new()
        .route(
            "/api/chat/sessions/:session_id/feedback",
            post(submit_feedback),
        )
        .route(
            "/api/chat/volunteers/:volunteer_id/feedback",
            get(volunteer_feedback),
        )
        .layer(axum::middleware::from_fn(auth_middleware))
}

#[derive(Deserialize)]
struct FeedbackRequest {
    rating: String,
    comments: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

async fn submit_feedback(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let rating = Rating::parse(&request.rating)
        .ok_or_else(|| ChatError::Validation(format!("unknown rating '{}'", request.rating)))?;
    let feedback = state
        .feedback
        .submit(
            &principal,
            session_id,
            rating,
            request.comments,
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

async fn volunteer_feedback(
    Path(volunteer_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let (history, stats) = state
        .feedback
        .volunteer_view(&principal, volunteer_id)
        .await?;
    Ok(Json(json!({ "feedback": history, "stats": stats })))
}
