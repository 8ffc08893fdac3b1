// src/handlers/sessions.rs
use crate::error::ChatError;
use crate::handlers::principal;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::session::SessionStatus;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub fn session_routes() -> Router {
    Router::new()
        .route("/api/chat/sessions", post(create_session).get(list_sessions))
        .route("/api/chat/sessions/waiting", get(waiting_sessions))
        .route(
            "/api/chat/sessions/:session_id",
            get(get_session).post(session_action),
        )
        .route("/api/chat/sessions/:session_id/typing", put(set_typing))
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn create_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let session = state.lifecycle.request(&principal).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_sessions(
    Query(query): Query<ListQuery>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let status = match query.status.as_deref() {
        Some(s) => Some(
            SessionStatus::parse(s)
                .ok_or_else(|| ChatError::Validation(format!("unknown status '{}'", s)))?,
        ),
        None => None,
    };
    let sessions = state.lifecycle.mine(&principal, status).await?;
    Ok(Json(sessions))
}

#[derive(Deserialize)]
struct WaitingQuery {
    limit: Option<i64>,
}

async fn waiting_sessions(
    Query(query): Query<WaitingQuery>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let sessions = state.lifecycle.waiting(&principal, limit).await?;
    Ok(Json(sessions))
}

async fn get_session(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let session = state.lifecycle.get(&principal, session_id).await?;
    Ok(Json(session))
}

#[derive(Deserialize)]
struct ActionRequest {
    action: String,
    message_count: Option<i64>,
}

/// Lifecycle transitions are posted against the session as named actions.
async fn session_action(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ActionRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    match request.action.as_str() {
        "assign" => {
            let session = state
                .lifecycle
                .claim(&principal, session_id, state.welcome_message.as_deref())
                .await?;
            Ok(Json(session))
        }
        "complete" => {
            let session = state.lifecycle.complete(&principal, session_id).await?;
            Ok(Json(session))
        }
        "resume" => {
            let session = state.lifecycle.resume(&principal, session_id).await?;
            Ok(Json(session))
        }
        "update_count" => {
            let count = request.message_count.ok_or_else(|| {
                ChatError::Validation("message_count is required for update_count".to_string())
            })?;
            state
                .lifecycle
                .update_count(&principal, session_id, count)
                .await?;
            let session = state.lifecycle.get(&principal, session_id).await?;
            Ok(Json(session))
        }
        other => Err(ChatError::InvalidAction(other.to_string())),
    }
}

#[derive(Deserialize)]
struct TypingRequest {
    is_typing: bool,
}

async fn set_typing(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<TypingRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    state
        .messages
        .set_typing(&principal, session_id, request.is_typing)
        .await?;
    Ok(Json(json!({ "success": true })))
}
