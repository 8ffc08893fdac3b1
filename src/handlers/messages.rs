// src/handlers/messages.rs
use crate::error::ChatError;
use crate::handlers::principal;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::store::MessageQuery;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub fn message_routes() -> Router {
    Router::new()
        .route(
            "/api/chat/sessions/:session_id/messages",
            get(get_messages).post(send_message).put(acknowledge),
        )
        .route(
            "/api/chat/messages/:message_id",
            get(get_message).delete(delete_message),
        )
        .route("/api/chat/messages/:message_id/report", post(report_message))
        .layer(axum::middleware::from_fn(auth_middleware))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
    before: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
}

async fn get_messages(
    Path(session_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let query = MessageQuery {
        limit: query.limit.unwrap_or(50).clamp(1, 200),
        before: query.before,
        after: query.after,
    };
    let messages = state.messages.history(&principal, session_id, query).await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct SendRequest {
    body: String,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    system: bool,
}

async fn send_message(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<SendRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let outcome = state
        .messages
        .append(
            &principal,
            session_id,
            &request.body,
            request.metadata,
            request.system,
        )
        .await?;

    // Classification runs inline but never blocks the send.
    if !outcome.is_duplicate() {
        if let Err(e) = state.moderation.evaluate(outcome.message()).await {
            tracing::warn!(
                message_id = %outcome.message().id,
                "moderation evaluation failed: {}",
                e
            );
        }
    }

    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let duplicate = outcome.is_duplicate();
    Ok((
        status,
        Json(json!({ "message": outcome.message(), "duplicate": duplicate })),
    ))
}

#[derive(Deserialize)]
struct AcknowledgeRequest {
    status: String,
}

/// Delivery acknowledgements: the caller marks the counterpart's messages
/// delivered or read.
async fn acknowledge(
    Path(session_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let updated = match request.status.as_str() {
        "delivered" => state.messages.mark_delivered(&principal, session_id).await?,
        "read" => state.messages.mark_read(&principal, session_id).await?,
        other => return Err(ChatError::InvalidAction(other.to_string())),
    };
    Ok(Json(json!({ "updated": updated })))
}

async fn get_message(
    Path(message_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let message = state.messages.get(&principal, message_id).await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
struct ReportRequest {
    reason: Option<String>,
}

async fn report_message(
    Path(message_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ReportRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    let event = state
        .moderation
        .report(&principal, message_id, request.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn delete_message(
    Path(message_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let principal = principal(&claims)?;
    state.messages.delete(&principal, message_id).await?;
    Ok(Json(json!({ "success": true })))
}
