// src/models/auth.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::volunteer::VOLUNTEER_ROLE;

/// JWT claims for an authenticated principal. The engine never issues
/// tokens; identity is an external concern consumed as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user id)
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize, // Expiration time
    pub iat: usize, // Issued at
}

impl Claims {
    pub fn principal(&self) -> Result<Principal, ChatError> {
        let id = Uuid::parse_str(&self.sub)
            .map_err(|_| ChatError::Validation("malformed user id in token".to_string()))?;
        Ok(Principal {
            id,
            is_admin: self.is_admin,
            roles: self.roles.clone(),
        })
    }
}

/// The opaque authenticated principal everything downstream authorizes
/// against: an id, an administrator flag, and a set of role strings.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub is_admin: bool,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_volunteer(&self) -> bool {
        self.roles.iter().any(|r| r == VOLUNTEER_ROLE)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
}
