// src/services/mod.rs
//! The coordination engine proper: session lifecycle, message log, event
//! distribution, moderation pipeline, and feedback tracking. Handlers stay
//! thin; every rule lives here, against the `ChatStore` trait.

pub mod events;
pub mod feedback;
pub mod lifecycle;
pub mod messages;
pub mod moderation;

use crate::models::auth::Principal;
use crate::models::session::{ChatSession, SessionStatus};

/// Administrator, the seeker, or the assigned volunteer.
pub fn is_participant(principal: &Principal, session: &ChatSession) -> bool {
    principal.is_admin
        || session.is_seeker(principal.id)
        || session.is_assigned_volunteer(principal.id)
}

/// Participant access, plus waiting-queue visibility: any volunteer may look
/// at a waiting session they could pick up.
pub fn can_view_session(principal: &Principal, session: &ChatSession) -> bool {
    is_participant(principal, session)
        || (principal.is_volunteer() && session.status == SessionStatus::Waiting)
}
