use crate::models::auth::{Claims, ErrorResponse};
use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

/// Gate for the moderation and triage surfaces. Runs after `auth_middleware`,
/// which populates the claims extension.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, impl IntoResponse> {
    let claims = request.extensions().get::<Claims>();

    match claims {
        Some(claims) => {
            if claims.is_admin {
                Ok(next.run(request).await)
            } else {
                Err((
                    StatusCode::FORBIDDEN,
                    Json(ErrorResponse {
                        success: false,
                        code: "FORBIDDEN".to_string(),
                        message: "Administrator access required.".to_string(),
                    }),
                ))
            }
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                success: false,
                code: "UNAUTHORIZED".to_string(),
                message: "Authentication required for admin access.".to_string(),
            }),
        )),
    }
}
