// src/store/mod.rs
//! Collection-like persistence surface for the coordination engine. The
//! engine does not care what sits behind it: `MemoryStore` backs unit tests
//! and zero-config development, `PgStore` backs production.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::feedback::Feedback;
use crate::models::message::{ChatMessage, SenderRole};
use crate::models::moderation::{AuditEntry, ModerationEvent, Resolution};
use crate::models::session::{ChatSession, FeedbackSummary, SessionStatus, TypingState};
use crate::models::volunteer::VolunteerProfile;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Monotonic position in a session's message log, advanced by the event
/// distribution poll loop. Ordered by update time, tie-broken by insertion id
/// so equal timestamps can neither skip nor duplicate events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub updated_at: DateTime<Utc>,
    pub seq: i64,
}

impl Cursor {
    pub fn of(message: &ChatMessage) -> Self {
        Cursor {
            updated_at: message.updated_at,
            seq: message.seq,
        }
    }

    pub fn covers(&self, message: &ChatMessage) -> bool {
        (message.updated_at, message.seq) <= (self.updated_at, self.seq)
    }
}

/// History query options for `session_messages`. With no bounds set, the
/// most recent `limit` messages are returned in ascending order.
#[derive(Debug, Clone, Copy)]
pub struct MessageQuery {
    pub limit: i64,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        MessageQuery {
            limit: 50,
            before: None,
            after: None,
        }
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    // -- sessions ---------------------------------------------------------

    async fn insert_session(&self, session: ChatSession) -> Result<(), ChatError>;

    async fn session(&self, id: Uuid) -> Result<Option<ChatSession>, ChatError>;

    /// Atomic conditional claim: assigns the volunteer and flips the session
    /// to `active` only if it is still waiting and unassigned. Returns the
    /// number of sessions updated (0 when the race was lost or the id does
    /// not resolve). This must never be a read-then-write pair.
    async fn claim_session(
        &self,
        id: Uuid,
        volunteer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ChatError>;

    /// Conditional on the session being active. Returns false otherwise.
    async fn complete_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<bool, ChatError>;

    /// Conditional on the session being completed with a volunteer still
    /// assigned. Message history is left untouched.
    async fn resume_session(&self, id: Uuid) -> Result<bool, ChatError>;

    async fn set_message_count(&self, id: Uuid, count: i64) -> Result<bool, ChatError>;

    /// Bumps the cached message count and advances last-activity.
    async fn record_message_activity(&self, id: Uuid, at: DateTime<Utc>)
        -> Result<(), ChatError>;

    async fn set_typing(
        &self,
        id: Uuid,
        role: SenderRole,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, ChatError>;

    async fn typing_state(&self, id: Uuid) -> Result<Option<TypingState>, ChatError>;

    async fn set_feedback_summary(
        &self,
        id: Uuid,
        summary: FeedbackSummary,
    ) -> Result<bool, ChatError>;

    async fn increment_session_flags(&self, id: Uuid) -> Result<(), ChatError>;

    async fn waiting_sessions(&self, limit: i64) -> Result<Vec<ChatSession>, ChatError>;

    async fn volunteer_sessions(
        &self,
        volunteer_id: Uuid,
        status: SessionStatus,
    ) -> Result<Vec<ChatSession>, ChatError>;

    async fn seeker_sessions(
        &self,
        seeker_id: Uuid,
        status: Option<SessionStatus>,
    ) -> Result<Vec<ChatSession>, ChatError>;

    /// Waiting/active sessions with no activity since the cutoff.
    async fn stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatSession>, ChatError>;

    // -- messages ---------------------------------------------------------

    /// Persists the message, assigning its insertion sequence number.
    async fn insert_message(&self, message: ChatMessage) -> Result<ChatMessage, ChatError>;

    async fn message(&self, id: Uuid) -> Result<Option<ChatMessage>, ChatError>;

    async fn session_messages(
        &self,
        session_id: Uuid,
        query: MessageQuery,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    /// Messages whose update position exceeds the cursor, ascending by
    /// (updated_at, seq). A `None` cursor returns everything.
    async fn messages_updated_since(
        &self,
        session_id: Uuid,
        cursor: Option<Cursor>,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    /// An identical body from the same sender within the window, if any.
    async fn recent_duplicate(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        body: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ChatMessage>, ChatError>;

    async fn welcome_exists(&self, session_id: Uuid) -> Result<bool, ChatError>;

    /// Marks undelivered messages sent by `from_role` as delivered.
    async fn mark_delivered(
        &self,
        session_id: Uuid,
        from_role: SenderRole,
        at: DateTime<Utc>,
    ) -> Result<u64, ChatError>;

    /// Marks unread messages sent by `from_role` as read by `reader`.
    /// Re-marking already-read messages is a no-op.
    async fn mark_read(
        &self,
        session_id: Uuid,
        from_role: SenderRole,
        reader: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, ChatError>;

    async fn flag_message(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError>;

    async fn delete_message(&self, id: Uuid) -> Result<bool, ChatError>;

    // -- moderation -------------------------------------------------------

    async fn insert_moderation_event(&self, event: ModerationEvent) -> Result<(), ChatError>;

    async fn moderation_event(&self, id: Uuid) -> Result<Option<ModerationEvent>, ChatError>;

    /// Writes the resolution iff the event is still unreviewed. Returns
    /// false when it was already resolved.
    async fn resolve_moderation_event(
        &self,
        id: Uuid,
        reviewer: Uuid,
        resolution: Resolution,
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError>;

    /// Review queue: unresolved events, highest severity first, then oldest.
    async fn unreviewed_moderation_events(
        &self,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError>;

    async fn session_moderation_events(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<ModerationEvent>, ChatError>;

    async fn volunteer_moderation_events(
        &self,
        volunteer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError>;

    // -- volunteers -------------------------------------------------------

    async fn volunteer_profile(&self, id: Uuid) -> Result<Option<VolunteerProfile>, ChatError>;

    async fn touch_volunteer(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ChatError>;

    async fn add_flagged_session(&self, id: Uuid) -> Result<(), ChatError>;

    async fn add_completed_session(&self, id: Uuid) -> Result<(), ChatError>;

    async fn set_average_score(&self, id: Uuid, score: f64) -> Result<(), ChatError>;

    /// Removes the volunteer role and marks the profile suspended. Idempotent:
    /// returns true only when the role was present and removed by this call.
    async fn suspend_volunteer(&self, id: Uuid) -> Result<bool, ChatError>;

    // -- feedback ---------------------------------------------------------

    async fn insert_feedback(&self, feedback: Feedback) -> Result<(), ChatError>;

    /// Newest first; `limit` of `None` returns the full history.
    async fn volunteer_feedback(
        &self,
        volunteer_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Feedback>, ChatError>;

    /// Triage queue: unreviewed flagged feedback, oldest first.
    async fn flagged_unreviewed_feedback(&self, limit: i64) -> Result<Vec<Feedback>, ChatError>;

    async fn mark_feedback_reviewed(
        &self,
        id: Uuid,
        reviewer: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError>;

    // -- audit ------------------------------------------------------------

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), ChatError>;

    async fn audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>, ChatError>;
}
