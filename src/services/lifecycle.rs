// src/services/lifecycle.rs
//! Session lifecycle: request, claim, complete, resume. The claim path is the
//! contended one; it leans on the store's atomic conditional update so two
//! volunteers racing for the same waiting session cannot both win.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::auth::Principal;
use crate::models::message::{ChatMessage, SenderRole};
use crate::models::session::{ChatSession, SessionStatus};
use crate::models::volunteer::VolunteerStatus;
use crate::services::is_participant;
use crate::store::ChatStore;

/// Waiting/active sessions idle past this many minutes count as stale.
pub const STALE_SESSION_MINUTES: i64 = 30;

#[derive(Clone)]
pub struct SessionLifecycle {
    store: Arc<dyn ChatStore>,
}

impl SessionLifecycle {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        SessionLifecycle { store }
    }

    /// Opens a new waiting session for the seeker.
    pub async fn request(&self, seeker: &Principal) -> Result<ChatSession, ChatError> {
        let session = ChatSession::new(seeker.id, Utc::now());
        self.store.insert_session(session.clone()).await?;
        tracing::info!(session_id = %session.id, seeker_id = %seeker.id, "chat session requested");
        Ok(session)
    }

    pub async fn get(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<ChatSession, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !crate::services::can_view_session(principal, &session) {
            return Err(ChatError::forbidden("no access to this session"));
        }
        Ok(session)
    }

    /// Claims a waiting session for a volunteer. Exactly one of N concurrent
    /// claimers succeeds; the rest observe `AlreadyClaimed`. On success the
    /// configured welcome message is posted, at most once per session.
    pub async fn claim(
        &self,
        principal: &Principal,
        session_id: Uuid,
        welcome: Option<&str>,
    ) -> Result<ChatSession, ChatError> {
        if !principal.is_volunteer() && !principal.is_admin {
            return Err(ChatError::forbidden("only volunteers can claim a session"));
        }
        if !principal.is_admin {
            self.ensure_not_suspended(principal.id).await?;
        }

        let now = Utc::now();
        let claimed = self.store.claim_session(session_id, principal.id, now).await?;
        if claimed == 0 {
            let session = self
                .store
                .session(session_id)
                .await?
                .ok_or(ChatError::NotFound("session"))?;
            // A retry by the volunteer who already holds the session is
            // treated as success, not a conflict.
            if !(session.status == SessionStatus::Active
                && session.is_assigned_volunteer(principal.id))
            {
                return Err(ChatError::AlreadyClaimed);
            }
        } else {
            tracing::info!(
                session_id = %session_id,
                volunteer_id = %principal.id,
                "session claimed"
            );
        }

        self.store.touch_volunteer(principal.id, now).await?;
        self.send_welcome(session_id, welcome).await?;

        self.store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))
    }

    /// Identity is external, so suspension cannot revoke the role claim in a
    /// token. The engine's own profile record is the source of truth here.
    async fn ensure_not_suspended(&self, volunteer_id: Uuid) -> Result<(), ChatError> {
        if let Some(profile) = self.store.volunteer_profile(volunteer_id).await? {
            if profile.status == VolunteerStatus::Suspended {
                return Err(ChatError::forbidden("volunteer is suspended"));
            }
        }
        Ok(())
    }

    async fn send_welcome(&self, session_id: Uuid, welcome: Option<&str>) -> Result<(), ChatError> {
        let text = match welcome.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => return Ok(()),
        };
        if self.store.welcome_exists(session_id).await? {
            return Ok(());
        }
        let now = Utc::now();
        let message = ChatMessage::new(
            session_id,
            None,
            SenderRole::System,
            text.to_string(),
            json!({ "welcome_message": true, "automated": true }),
            now,
        );
        self.store.insert_message(message).await?;
        self.store.record_message_activity(session_id, now).await?;
        Ok(())
    }

    /// Ends an active session, stamping its duration. Waiting sessions cannot
    /// be completed; they have no conversation to close out.
    pub async fn complete(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<ChatSession, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !is_participant(principal, &session) {
            return Err(ChatError::forbidden("no access to this session"));
        }
        if session.status != SessionStatus::Active {
            return Err(ChatError::Validation(
                "only an active session can be completed".to_string(),
            ));
        }

        let now = Utc::now();
        let duration_secs = (now - session.created_at).num_seconds().max(0);
        if !self.store.complete_session(session_id, now, duration_secs).await? {
            // Lost a race with a concurrent completion.
            return Err(ChatError::Validation(
                "only an active session can be completed".to_string(),
            ));
        }
        if let Some(volunteer_id) = session.volunteer_id {
            self.store.add_completed_session(volunteer_id).await?;
        }
        tracing::info!(session_id = %session_id, duration_secs, "session completed");

        self.store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))
    }

    /// Reopens a completed session with the same volunteer. Message history
    /// is preserved untouched.
    pub async fn resume(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<ChatSession, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !is_participant(principal, &session) {
            return Err(ChatError::forbidden("no access to this session"));
        }
        if session.status != SessionStatus::Completed {
            return Err(ChatError::Validation(
                "only a completed session can be resumed".to_string(),
            ));
        }
        if session.volunteer_id.is_none() {
            return Err(ChatError::Validation(
                "session has no volunteer to resume with".to_string(),
            ));
        }

        if !self.store.resume_session(session_id).await? {
            return Err(ChatError::Validation(
                "only a completed session can be resumed".to_string(),
            ));
        }
        tracing::info!(session_id = %session_id, "session resumed");

        self.store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))
    }

    /// Sets the cached message count to an absolute value reported by the
    /// client, for reconciliation after reconnects.
    pub async fn update_count(
        &self,
        principal: &Principal,
        session_id: Uuid,
        count: i64,
    ) -> Result<(), ChatError> {
        if count < 0 {
            return Err(ChatError::Validation(
                "message count cannot be negative".to_string(),
            ));
        }
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !is_participant(principal, &session) {
            return Err(ChatError::forbidden("no access to this session"));
        }
        self.store.set_message_count(session_id, count).await?;
        Ok(())
    }

    /// Waiting queue, oldest first, for volunteers picking up work.
    pub async fn waiting(
        &self,
        principal: &Principal,
        limit: i64,
    ) -> Result<Vec<ChatSession>, ChatError> {
        if !principal.is_volunteer() && !principal.is_admin {
            return Err(ChatError::forbidden("only volunteers can view the waiting queue"));
        }
        if !principal.is_admin {
            self.ensure_not_suspended(principal.id).await?;
        }
        self.store.waiting_sessions(limit).await
    }

    pub async fn mine(
        &self,
        principal: &Principal,
        status: Option<SessionStatus>,
    ) -> Result<Vec<ChatSession>, ChatError> {
        if principal.is_volunteer() {
            let status = status.unwrap_or(SessionStatus::Active);
            self.store.volunteer_sessions(principal.id, status).await
        } else {
            self.store.seeker_sessions(principal.id, status).await
        }
    }

    /// Waiting/active sessions idle past the stale cutoff. Admin triage view;
    /// stale active sessions are closed with an explicit complete, stale
    /// waiting sessions have no close-out and stay claimable.
    pub async fn stale(&self) -> Result<Vec<ChatSession>, ChatError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(STALE_SESSION_MINUTES);
        self.store.stale_sessions(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::volunteer::VOLUNTEER_ROLE;
    use crate::store::{MemoryStore, MessageQuery};

    fn seeker() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![],
        }
    }

    fn volunteer() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![VOLUNTEER_ROLE.to_string()],
        }
    }

    fn lifecycle() -> SessionLifecycle {
        SessionLifecycle::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_request_creates_waiting_session() {
        let lifecycle = lifecycle();
        let session = lifecycle.request(&seeker()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.volunteer_id.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_yield_one_winner() {
        let lifecycle = lifecycle();
        let session = lifecycle.request(&seeker()).await.unwrap();
        let (a, b) = (volunteer(), volunteer());

        let (ra, rb) = tokio::join!(
            lifecycle.claim(&a, session.id, None),
            lifecycle.claim(&b, session.id, None),
        );

        let wins = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one claim must win");
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(matches!(loser, Err(ChatError::AlreadyClaimed)));
    }

    #[tokio::test]
    async fn test_claim_requires_volunteer_role() {
        let lifecycle = lifecycle();
        let session = lifecycle.request(&seeker()).await.unwrap();
        let result = lifecycle.claim(&seeker(), session.id, None).await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_suspended_volunteer_cannot_claim_or_browse() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = SessionLifecycle::new(store.clone());
        let session = lifecycle.request(&seeker()).await.unwrap();
        let vol = volunteer();
        store.suspend_volunteer(vol.id).await.unwrap();

        // The token still carries the role, but the profile says suspended.
        let result = lifecycle.claim(&vol, session.id, None).await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
        let result = lifecycle.waiting(&vol, 10).await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));

        // The session stays claimable for volunteers in good standing.
        let claimed = lifecycle.claim(&volunteer(), session.id, None).await.unwrap();
        assert_eq!(claimed.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_welcome_posted_once_across_claim_retries() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = SessionLifecycle::new(store.clone());
        let session = lifecycle.request(&seeker()).await.unwrap();
        let vol = volunteer();

        lifecycle.claim(&vol, session.id, Some("Welcome!")).await.unwrap();
        // Retry by the same volunteer is idempotent and must not duplicate
        // the welcome message.
        lifecycle.claim(&vol, session.id, Some("Welcome!")).await.unwrap();

        let messages = store
            .session_messages(session.id, MessageQuery::default())
            .await
            .unwrap();
        let welcomes = messages.iter().filter(|m| m.is_welcome()).count();
        assert_eq!(welcomes, 1);
    }

    #[tokio::test]
    async fn test_waiting_session_cannot_be_completed() {
        let lifecycle = lifecycle();
        let requester = seeker();
        let session = lifecycle.request(&requester).await.unwrap();
        let result = lifecycle.complete(&requester, session.id).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_complete_stamps_duration_and_resume_reopens() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = SessionLifecycle::new(store.clone());
        let requester = seeker();
        let vol = volunteer();
        let session = lifecycle.request(&requester).await.unwrap();
        lifecycle.claim(&vol, session.id, Some("hi")).await.unwrap();

        let completed = lifecycle.complete(&requester, session.id).await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.ended_at.is_some());
        assert!(completed.duration_secs.is_some());

        let resumed = lifecycle.resume(&vol, session.id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.volunteer_id, Some(vol.id));

        // History survives the round trip.
        let messages = store
            .session_messages(session.id, MessageQuery::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_requires_completed_session() {
        let lifecycle = lifecycle();
        let requester = seeker();
        let session = lifecycle.request(&requester).await.unwrap();
        let result = lifecycle.resume(&requester, session.id).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_count_rejects_negative() {
        let lifecycle = lifecycle();
        let requester = seeker();
        let session = lifecycle.request(&requester).await.unwrap();
        let result = lifecycle.update_count(&requester, session.id, -1).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }
}
