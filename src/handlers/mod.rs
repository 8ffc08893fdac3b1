pub mod admin;
pub mod events;
pub mod feedback;
pub mod messages;
pub mod sessions;

use crate::error::ChatError;
use crate::models::auth::{Claims, Principal};

/// Pulls the authenticated principal out of the claims the auth middleware
/// stashed in request extensions.
pub fn principal(claims: &Claims) -> Result<Principal, ChatError> {
    claims.principal()
}
