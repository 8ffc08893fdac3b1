use crate::models::auth::{Claims, ErrorResponse};
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};

/// Verifies a bearer token against JWT_SECRET. Tokens are issued elsewhere;
/// the engine only consumes them.
pub fn verify_jwt_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string());

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            success: false,
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
        }),
    )
}

pub async fn auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let auth_header = match headers.get("Authorization") {
        Some(header) => header,
        None => return Err(unauthorized("Missing Authorization header")),
    };

    let auth_str = match auth_header.to_str() {
        Ok(str) => str,
        Err(_) => return Err(unauthorized("Invalid Authorization header format")),
    };

    let token = match auth_str.strip_prefix("Bearer ") {
        Some(token) => token,
        None => {
            return Err(unauthorized(
                "Invalid Authorization header format. Expected 'Bearer <token>'",
            ))
        }
    };

    let claims = match verify_jwt_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("JWT verification failed: {}", e);
            return Err(unauthorized("Invalid or expired token"));
        }
    };

    // Make the claims available to handlers downstream.
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
