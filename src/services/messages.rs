// src/services/messages.rs
//! Ordered message log for a session: append with duplicate suppression,
//! delivery/read receipts, typing indicators, and admin removal.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::auth::Principal;
use crate::models::message::{ChatMessage, SenderRole};
use crate::models::session::{ChatSession, SessionStatus};
use crate::services::is_participant;
use crate::store::{ChatStore, MessageQuery};

/// An identical body from the same sender inside this window is treated as a
/// client retry, not a new message.
pub const DUPLICATE_WINDOW_SECS: i64 = 30;

/// Typing indicators expire on their own after this long.
pub const TYPING_TTL_MS: i64 = 4000;

/// Result of an append: either a freshly persisted message, or the earlier
/// message a duplicate send collapsed into.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Created(ChatMessage),
    Duplicate(ChatMessage),
}

impl AppendOutcome {
    pub fn message(&self) -> &ChatMessage {
        match self {
            AppendOutcome::Created(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn ChatStore>,
}

impl MessageLog {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        MessageLog { store }
    }

    fn sender_role(
        &self,
        principal: &Principal,
        session: &ChatSession,
        as_system: bool,
    ) -> Result<SenderRole, ChatError> {
        if as_system {
            if !principal.is_admin {
                return Err(ChatError::forbidden(
                    "only administrators can post system messages",
                ));
            }
            return Ok(SenderRole::System);
        }
        if session.is_seeker(principal.id) {
            Ok(SenderRole::Seeker)
        } else if session.is_assigned_volunteer(principal.id) {
            Ok(SenderRole::Volunteer)
        } else {
            Err(ChatError::forbidden("not a participant in this session"))
        }
    }

    /// Appends a message to an active session. A repeat of the same body by
    /// the same sender within the duplicate window returns the earlier
    /// message instead of writing a second copy.
    pub async fn append(
        &self,
        principal: &Principal,
        session_id: Uuid,
        body: &str,
        metadata: serde_json::Value,
        as_system: bool,
    ) -> Result<AppendOutcome, ChatError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::Validation("message body is required".to_string()));
        }

        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        let role = self.sender_role(principal, &session, as_system)?;
        if session.status != SessionStatus::Active {
            return Err(ChatError::Validation(
                "messages can only be sent in an active session".to_string(),
            ));
        }

        let now = Utc::now();
        if role != SenderRole::System {
            let since = now - Duration::seconds(DUPLICATE_WINDOW_SECS);
            if let Some(existing) = self
                .store
                .recent_duplicate(session_id, principal.id, body, since)
                .await?
            {
                tracing::debug!(
                    session_id = %session_id,
                    message_id = %existing.id,
                    "duplicate send suppressed"
                );
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let sender_id = (role != SenderRole::System).then_some(principal.id);
        let metadata = if metadata.is_object() {
            metadata
        } else {
            serde_json::json!({})
        };
        let message = ChatMessage::new(session_id, sender_id, role, body.to_string(), metadata, now);
        let message = self.store.insert_message(message).await?;
        self.store.record_message_activity(session_id, now).await?;
        // Sending implies the sender stopped typing.
        if role != SenderRole::System {
            self.store.set_typing(session_id, role, None).await?;
        }
        Ok(AppendOutcome::Created(message))
    }

    /// Session history window. Viewing marks the counterpart's messages as
    /// read, so receipts flow without a separate client call.
    pub async fn history(
        &self,
        principal: &Principal,
        session_id: Uuid,
        query: MessageQuery,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !is_participant(principal, &session) {
            return Err(ChatError::forbidden("no access to this session"));
        }
        let messages = self.store.session_messages(session_id, query).await?;
        if let Some(counterpart) = self.counterpart_role(principal, &session) {
            self.store
                .mark_read(session_id, counterpart, principal.id, Utc::now())
                .await?;
        }
        Ok(messages)
    }

    pub async fn get(
        &self,
        principal: &Principal,
        message_id: Uuid,
    ) -> Result<ChatMessage, ChatError> {
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        let session = self
            .store
            .session(message.session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !is_participant(principal, &session) {
            return Err(ChatError::forbidden("no access to this message"));
        }
        Ok(message)
    }

    fn counterpart_role(
        &self,
        principal: &Principal,
        session: &ChatSession,
    ) -> Option<SenderRole> {
        if session.is_seeker(principal.id) {
            Some(SenderRole::Volunteer)
        } else if session.is_assigned_volunteer(principal.id) {
            Some(SenderRole::Seeker)
        } else {
            None
        }
    }

    fn counterpart_or_forbidden(
        &self,
        principal: &Principal,
        session: &ChatSession,
    ) -> Result<SenderRole, ChatError> {
        self.counterpart_role(principal, session)
            .ok_or_else(|| ChatError::forbidden("only participants can acknowledge messages"))
    }

    /// Marks the counterpart's undelivered messages as delivered. Returns how
    /// many messages advanced.
    pub async fn mark_delivered(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<u64, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        let counterpart = self.counterpart_or_forbidden(principal, &session)?;
        self.store
            .mark_delivered(session_id, counterpart, Utc::now())
            .await
    }

    /// Marks the counterpart's unread messages as read by the caller.
    pub async fn mark_read(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<u64, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        let counterpart = self.counterpart_or_forbidden(principal, &session)?;
        self.store
            .mark_read(session_id, counterpart, principal.id, Utc::now())
            .await
    }

    /// Sets or clears the caller's typing indicator. The set form expires on
    /// its own after `TYPING_TTL_MS`.
    pub async fn set_typing(
        &self,
        principal: &Principal,
        session_id: Uuid,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        let role = if session.is_seeker(principal.id) {
            SenderRole::Seeker
        } else if session.is_assigned_volunteer(principal.id) {
            SenderRole::Volunteer
        } else {
            return Err(ChatError::forbidden("not a participant in this session"));
        };
        let until = is_typing.then(|| Utc::now() + Duration::milliseconds(TYPING_TTL_MS));
        self.store.set_typing(session_id, role, until).await?;
        Ok(())
    }

    /// Removes a message outright. Administrator only; moderation resolutions
    /// prefer flagging over deletion so the review trail survives.
    pub async fn delete(&self, principal: &Principal, message_id: Uuid) -> Result<(), ChatError> {
        if !principal.is_admin {
            return Err(ChatError::forbidden(
                "only administrators can delete messages",
            ));
        }
        if !self.store.delete_message(message_id).await? {
            return Err(ChatError::NotFound("message"));
        }
        tracing::info!(message_id = %message_id, "message deleted by administrator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::DeliveryStatus;
    use crate::models::volunteer::VOLUNTEER_ROLE;
    use crate::services::lifecycle::SessionLifecycle;
    use crate::store::MemoryStore;
    use serde_json::json;

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

    async fn active_session(
        store: &Arc<MemoryStore>,
    ) -> (SessionLifecycle, ChatSession, Principal, Principal) {
        let lifecycle = SessionLifecycle::new(store.clone() as Arc<dyn ChatStore>);
        let requester = seeker();
        let vol = volunteer();
        let session = lifecycle.request(&requester).await.unwrap();
        let session = lifecycle.claim(&vol, session.id, None).await.unwrap();
        (lifecycle, session, requester, vol)
    }

    #[tokio::test]
    async fn test_append_requires_active_session() {
        let store = Arc::new(MemoryStore::new());
        let log = MessageLog::new(store.clone() as Arc<dyn ChatStore>);
        let lifecycle = SessionLifecycle::new(store as Arc<dyn ChatStore>);
        let requester = seeker();
        let session = lifecycle.request(&requester).await.unwrap();

        let result = log
            .append(&requester, session.id, "hello", json!({}), false)
            .await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_append_rejects_non_participants() {
        let store = Arc::new(MemoryStore::new());
        let log = MessageLog::new(store.clone() as Arc<dyn ChatStore>);
        let (_, session, _, _) = active_session(&store).await;

        let stranger = seeker();
        let result = log
            .append(&stranger, session.id, "hello", json!({}), false)
            .await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_duplicate_send_within_window_is_collapsed() {
        let store = Arc::new(MemoryStore::new());
        let log = MessageLog::new(store.clone() as Arc<dyn ChatStore>);
        let (_, session, requester, _) = active_session(&store).await;

        let first = log
            .append(&requester, session.id, "are you there?", json!({}), false)
            .await
            .unwrap();
        assert!(!first.is_duplicate());

        let second = log
            .append(&requester, session.id, "are you there?", json!({}), false)
            .await
            .unwrap();
        assert!(second.is_duplicate());
        assert_eq!(second.message().id, first.message().id);

        // The same body from the other participant is a real message.
        let vol_session = store.session(session.id).await.unwrap().unwrap();
        let vol = Principal {
            id: vol_session.volunteer_id.unwrap(),
            is_admin: false,
            roles: vec![VOLUNTEER_ROLE.to_string()],
        };
        let third = log
            .append(&vol, session.id, "are you there?", json!({}), false)
            .await
            .unwrap();
        assert!(!third.is_duplicate());
    }

    #[tokio::test]
    async fn test_read_receipt_flow() {
        let store = Arc::new(MemoryStore::new());
        let log = MessageLog::new(store.clone() as Arc<dyn ChatStore>);
        let (_, session, requester, vol) = active_session(&store).await;

        let sent = log
            .append(&requester, session.id, "rough day today", json!({}), false)
            .await
            .unwrap();
        assert_eq!(sent.message().status, DeliveryStatus::Sent);

        let delivered = log.mark_delivered(&vol, session.id).await.unwrap();
        assert_eq!(delivered, 1);

        let read = log.mark_read(&vol, session.id).await.unwrap();
        assert_eq!(read, 1);

        let message = store.message(sent.message().id).await.unwrap().unwrap();
        assert_eq!(message.status, DeliveryStatus::Read);
        assert!(message.read_at.is_some());
        assert_eq!(message.read_by.len(), 1);
        assert_eq!(message.read_by[0].reader_id, vol.id);

        // Re-marking is a no-op.
        let again = log.mark_read(&vol, session.id).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_typing_indicator_expires() {
        let store = Arc::new(MemoryStore::new());
        let log = MessageLog::new(store.clone() as Arc<dyn ChatStore>);
        let (_, session, requester, _) = active_session(&store).await;

        log.set_typing(&requester, session.id, true).await.unwrap();
        let state = store.typing_state(session.id).await.unwrap().unwrap();
        assert!(state.flags_at(Utc::now()).seeker);
        assert!(!state
            .flags_at(Utc::now() + Duration::milliseconds(TYPING_TTL_MS + 100))
            .seeker);

        log.set_typing(&requester, session.id, false).await.unwrap();
        let state = store.typing_state(session.id).await.unwrap().unwrap();
        assert!(!state.flags_at(Utc::now()).seeker);
    }

    #[tokio::test]
    async fn test_delete_is_admin_only() {
        let store = Arc::new(MemoryStore::new());
        let log = MessageLog::new(store.clone() as Arc<dyn ChatStore>);
        let (_, session, requester, _) = active_session(&store).await;

        let sent = log
            .append(&requester, session.id, "hello", json!({}), false)
            .await
            .unwrap();

        let result = log.delete(&requester, sent.message().id).await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));

        let admin = Principal {
            id: Uuid::new_v4(),
            is_admin: true,
            roles: vec![],
        };
        log.delete(&admin, sent.message().id).await.unwrap();
        assert!(store.message(sent.message().id).await.unwrap().is_none());
    }
}
