// src/store/memory.rs
//! In-memory `ChatStore`. All mutations run under a single write lock, which
//! is what makes the conditional claim atomic here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChatStore, Cursor, MessageQuery};
use crate::error::ChatError;
use crate::models::feedback::{Feedback, Rating};
use crate::models::message::{ChatMessage, DeliveryStatus, ReadReceipt, SenderRole};
use crate::models::moderation::{AuditEntry, ModerationEvent, Resolution};
use crate::models::session::{ChatSession, FeedbackSummary, SessionStatus, TypingState};
use crate::models::volunteer::{VolunteerProfile, VolunteerStatus, VOLUNTEER_ROLE};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, ChatSession>,
    messages: Vec<ChatMessage>,
    next_seq: i64,
    events: Vec<ModerationEvent>,
    feedback: Vec<Feedback>,
    volunteers: HashMap<Uuid, VolunteerProfile>,
    audits: Vec<AuditEntry>,
}

impl Inner {
    fn volunteer_entry(&mut self, id: Uuid) -> &mut VolunteerProfile {
        self.volunteers
            .entry(id)
            .or_insert_with(|| VolunteerProfile::new(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_session(&self, session: ChatSession) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Option<ChatSession>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn claim_session(
        &self,
        id: Uuid,
        volunteer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(s) if s.status == SessionStatus::Waiting && s.volunteer_id.is_none() => {
                s.volunteer_id = Some(volunteer_id);
                s.status = SessionStatus::Active;
                s.last_activity = s.last_activity.max(now);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn complete_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(s) if s.status == SessionStatus::Active => {
                s.status = SessionStatus::Completed;
                s.ended_at = Some(ended_at);
                s.duration_secs = Some(duration_secs);
                s.last_activity = s.last_activity.max(ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resume_session(&self, id: Uuid) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(s) if s.status == SessionStatus::Completed && s.volunteer_id.is_some() => {
                s.status = SessionStatus::Active;
                s.ended_at = None;
                s.duration_secs = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_message_count(&self, id: Uuid, count: i64) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(s) => {
                s.message_count = count;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_message_activity(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.sessions.get_mut(&id) {
            s.message_count += 1;
            s.last_activity = s.last_activity.max(at);
        }
        Ok(())
    }

    async fn set_typing(
        &self,
        id: Uuid,
        role: SenderRole,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(s) => {
                match role {
                    SenderRole::Seeker => s.typing.seeker_until = until,
                    SenderRole::Volunteer => s.typing.volunteer_until = until,
                    SenderRole::System => {}
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn typing_state(&self, id: Uuid) -> Result<Option<TypingState>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).map(|s| s.typing.clone()))
    }

    async fn set_feedback_summary(
        &self,
        id: Uuid,
        summary: FeedbackSummary,
    ) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(s) => {
                s.feedback = Some(summary);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_session_flags(&self, id: Uuid) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.sessions.get_mut(&id) {
            s.moderation_flags += 1;
        }
        Ok(())
    }

    async fn waiting_sessions(&self, limit: i64) -> Result<Vec<ChatSession>, ChatError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Waiting)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn volunteer_sessions(
        &self,
        volunteer_id: Uuid,
        status: SessionStatus,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.volunteer_id == Some(volunteer_id) && s.status == status)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn seeker_sessions(
        &self,
        seeker_id: Uuid,
        status: Option<SessionStatus>,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.seeker_id == seeker_id && status.map(|st| s.status == st).unwrap_or(true))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatSession>, ChatError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| {
                matches!(s.status, SessionStatus::Waiting | SessionStatus::Active)
                    && s.last_activity < cutoff
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.last_activity);
        Ok(sessions)
    }

    async fn insert_message(&self, mut message: ChatMessage) -> Result<ChatMessage, ChatError> {
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        message.seq = inner.next_seq;
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn message(&self, id: Uuid) -> Result<Option<ChatMessage>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn session_messages(
        &self,
        session_id: Uuid,
        query: MessageQuery,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<_> = inner
            .messages
            .iter()
            .filter(|m| {
                m.session_id == session_id
                    && query.before.map(|t| m.created_at < t).unwrap_or(true)
                    && query.after.map(|t| m.created_at > t).unwrap_or(true)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.seq));
        // Most recent `limit`, still in ascending order.
        let excess = messages.len().saturating_sub(query.limit as usize);
        Ok(messages.split_off(excess))
    }

    async fn messages_updated_since(
        &self,
        session_id: Uuid,
        cursor: Option<Cursor>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<_> = inner
            .messages
            .iter()
            .filter(|m| {
                m.session_id == session_id
                    && cursor.map(|c| !c.covers(m)).unwrap_or(true)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.updated_at, m.seq));
        Ok(messages)
    }

    async fn recent_duplicate(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        body: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ChatMessage>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .find(|m| {
                m.session_id == session_id
                    && m.sender_id == Some(sender_id)
                    && m.body == body
                    && m.created_at > since
            })
            .cloned())
    }

    async fn welcome_exists(&self, session_id: Uuid) -> Result<bool, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .any(|m| m.session_id == session_id && m.is_welcome()))
    }

    async fn mark_delivered(
        &self,
        session_id: Uuid,
        from_role: SenderRole,
        at: DateTime<Utc>,
    ) -> Result<u64, ChatError> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for m in inner.messages.iter_mut().filter(|m| {
            m.session_id == session_id
                && m.sender_role == from_role
                && m.status == DeliveryStatus::Sent
        }) {
            m.status = DeliveryStatus::Delivered;
            m.delivered_at = Some(at);
            m.updated_at = at;
            count += 1;
        }
        Ok(count)
    }

    async fn mark_read(
        &self,
        session_id: Uuid,
        from_role: SenderRole,
        reader: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, ChatError> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for m in inner.messages.iter_mut().filter(|m| {
            m.session_id == session_id
                && m.sender_role == from_role
                && matches!(m.status, DeliveryStatus::Sent | DeliveryStatus::Delivered)
        }) {
            m.status = DeliveryStatus::Read;
            m.read_at = Some(at);
            m.updated_at = at;
            if !m.read_by.iter().any(|r| r.reader_id == reader) {
                m.read_by.push(ReadReceipt {
                    reader_id: reader,
                    timestamp: at,
                });
            }
            count += 1;
        }
        Ok(count)
    }

    async fn flag_message(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.flagged = true;
                m.flag_reason = Some(reason.to_string());
                m.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_message(&self, id: Uuid) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != id);
        Ok(inner.messages.len() < before)
    }

    async fn insert_moderation_event(&self, event: ModerationEvent) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.events.push(event);
        Ok(())
    }

    async fn moderation_event(&self, id: Uuid) -> Result<Option<ModerationEvent>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().find(|e| e.id == id).cloned())
    }

    async fn resolve_moderation_event(
        &self,
        id: Uuid,
        reviewer: Uuid,
        resolution: Resolution,
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.events.iter_mut().find(|e| e.id == id && !e.reviewed) {
            Some(e) => {
                e.reviewed = true;
                e.reviewed_at = Some(at);
                e.reviewed_by = Some(reviewer);
                e.resolution = Some(resolution);
                e.resolution_notes = Some(notes.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unreviewed_moderation_events(
        &self,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner.events.iter().filter(|e| !e.reviewed).cloned().collect();
        events.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        });
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn session_moderation_events(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn volunteer_moderation_events(
        &self,
        volunteer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.volunteer_id == Some(volunteer_id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn volunteer_profile(&self, id: Uuid) -> Result<Option<VolunteerProfile>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner.volunteers.get(&id).cloned())
    }

    async fn touch_volunteer(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.volunteer_entry(id).last_active = Some(at);
        Ok(())
    }

    async fn add_flagged_session(&self, id: Uuid) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.volunteer_entry(id).flagged_sessions += 1;
        Ok(())
    }

    async fn add_completed_session(&self, id: Uuid) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.volunteer_entry(id).sessions_completed += 1;
        Ok(())
    }

    async fn set_average_score(&self, id: Uuid, score: f64) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.volunteer_entry(id).average_score = score;
        Ok(())
    }

    async fn suspend_volunteer(&self, id: Uuid) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        let profile = inner.volunteer_entry(id);
        profile.status = VolunteerStatus::Suspended;
        let had_role = profile.roles.iter().any(|r| r == VOLUNTEER_ROLE);
        profile.roles.retain(|r| r != VOLUNTEER_ROLE);
        Ok(had_role)
    }

    async fn insert_feedback(&self, feedback: Feedback) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.feedback.push(feedback);
        Ok(())
    }

    async fn volunteer_feedback(
        &self,
        volunteer_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Feedback>, ChatError> {
        let inner = self.inner.read().await;
        let mut feedback: Vec<_> = inner
            .feedback
            .iter()
            .filter(|f| f.volunteer_id == Some(volunteer_id))
            .cloned()
            .collect();
        feedback.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            feedback.truncate(limit as usize);
        }
        Ok(feedback)
    }

    async fn flagged_unreviewed_feedback(&self, limit: i64) -> Result<Vec<Feedback>, ChatError> {
        let inner = self.inner.read().await;
        let mut feedback: Vec<_> = inner
            .feedback
            .iter()
            .filter(|f| f.rating == Rating::Flagged && !f.reviewed)
            .cloned()
            .collect();
        feedback.sort_by_key(|f| f.created_at);
        feedback.truncate(limit as usize);
        Ok(feedback)
    }

    async fn mark_feedback_reviewed(
        &self,
        id: Uuid,
        reviewer: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        match inner.feedback.iter_mut().find(|f| f.id == id && !f.reviewed) {
            Some(f) => {
                f.reviewed = true;
                f.reviewed_at = Some(at);
                f.reviewed_by = Some(reviewer);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        inner.audits.push(entry);
        Ok(())
    }

    async fn audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>, ChatError> {
        let inner = self.inner.read().await;
        let mut audits: Vec<_> = inner.audits.iter().cloned().collect();
        audits.sort_by_key(|a| a.created_at);
        audits.truncate(limit as usize);
        Ok(audits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(session_id: Uuid, body: &str, now: DateTime<Utc>) -> ChatMessage {
        ChatMessage::new(session_id, Some(Uuid::new_v4()), SenderRole::Seeker, body.to_string(), json!({}), now)
    }

    #[tokio::test]
    async fn test_cursor_tie_break_on_equal_timestamps() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let now = Utc::now();

        let a = store.insert_message(msg(sid, "first", now)).await.unwrap();
        let b = store.insert_message(msg(sid, "second", now)).await.unwrap();

        // Cursor at the first message must still surface the second one.
        let after = store
            .messages_updated_since(sid, Some(Cursor::of(&a)))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, b.id);

        // Cursor at the second covers both.
        let after = store
            .messages_updated_since(sid, Some(Cursor::of(&b)))
            .await
            .unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_session_messages_returns_most_recent_ascending() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..5 {
            let at = base + chrono::Duration::seconds(i);
            store.insert_message(msg(sid, &format!("m{}", i), at)).await.unwrap();
        }

        let window = store
            .session_messages(sid, MessageQuery { limit: 3, before: None, after: None })
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].body, "m2");
        assert_eq!(window[2].body, "m4");
    }

    #[tokio::test]
    async fn test_suspend_volunteer_removes_role_once() {
        let store = MemoryStore::new();
        let vid = Uuid::new_v4();
        store.touch_volunteer(vid, Utc::now()).await.unwrap();

        assert!(store.suspend_volunteer(vid).await.unwrap());
        assert!(!store.suspend_volunteer(vid).await.unwrap());

        let profile = store.volunteer_profile(vid).await.unwrap().unwrap();
        assert_eq!(profile.status, VolunteerStatus::Suspended);
        assert!(profile.roles.is_empty());
    }
}
