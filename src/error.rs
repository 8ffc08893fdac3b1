// src/error.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

use crate::models::auth::ErrorResponse;

/// Error taxonomy for the coordination engine. Validation, authorization,
/// and not-found errors are rejected before any state change; `AlreadyClaimed`
/// is the single expected conflict (claim race lost); `Store` failures are
/// transient and safe to retry.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid action '{0}'")]
    InvalidAction(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("session already claimed by another volunteer")]
    AlreadyClaimed,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ChatError {
    pub fn forbidden(msg: &str) -> Self {
        ChatError::Forbidden(msg.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "VALIDATION",
            ChatError::InvalidAction(_) => "INVALID_ACTION",
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::Forbidden(_) => "FORBIDDEN",
            ChatError::AlreadyClaimed => "SESSION_ALREADY_CLAIMED",
            ChatError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) | ChatError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::AlreadyClaimed => StatusCode::CONFLICT,
            ChatError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let ChatError::Store(ref e) = self {
            tracing::error!("store error surfaced to caller: {}", e);
        }
        let body = ErrorResponse {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
