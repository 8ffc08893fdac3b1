// src/store/postgres.rs
//! sqlx-backed `ChatStore`. The conditional claim is a single `UPDATE`
//! guarded on `volunteer_id IS NULL`; the welcome system-message also has a
//! partial unique index in the schema as a second line of defense.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{ChatStore, Cursor, MessageQuery};
use crate::error::ChatError;
use crate::models::feedback::{Feedback, Rating};
use crate::models::message::{ChatMessage, DeliveryStatus, ReadReceipt, SenderRole};
use crate::models::moderation::{
    AuditEntry, FlagSource, MessageDirection, ModerationEvent, Resolution,
};
use crate::models::session::{ChatSession, FeedbackSummary, SessionStatus, TypingState};
use crate::models::volunteer::{VolunteerProfile, VolunteerStatus, VOLUNTEER_ROLE};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

fn bad_enum(field: &'static str, value: &str) -> ChatError {
    ChatError::Store(sqlx::Error::Decode(
        format!("unrecognized {} value '{}'", field, value).into(),
    ))
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    seeker_id: Uuid,
    volunteer_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_secs: Option<i64>,
    message_count: i64,
    moderation_flags: i64,
    feedback: Option<Json<FeedbackSummary>>,
    seeker_typing_until: Option<DateTime<Utc>>,
    volunteer_typing_until: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_model(self) -> Result<ChatSession, ChatError> {
        let status =
            SessionStatus::parse(&self.status).ok_or_else(|| bad_enum("status", &self.status))?;
        Ok(ChatSession {
            id: self.id,
            seeker_id: self.seeker_id,
            volunteer_id: self.volunteer_id,
            status,
            created_at: self.created_at,
            last_activity: self.last_activity,
            ended_at: self.ended_at,
            duration_secs: self.duration_secs,
            message_count: self.message_count,
            moderation_flags: self.moderation_flags,
            feedback: self.feedback.map(|f| f.0),
            typing: TypingState {
                seeker_until: self.seeker_typing_until,
                volunteer_until: self.volunteer_typing_until,
            },
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    seq: i64,
    sender_id: Option<Uuid>,
    sender_role: String,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: String,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    read_by: Json<Vec<ReadReceipt>>,
    flagged: bool,
    flag_reason: Option<String>,
    metadata: Json<serde_json::Value>,
}

impl MessageRow {
    fn into_model(self) -> Result<ChatMessage, ChatError> {
        let sender_role = SenderRole::parse(&self.sender_role)
            .ok_or_else(|| bad_enum("sender_role", &self.sender_role))?;
        let status =
            DeliveryStatus::parse(&self.status).ok_or_else(|| bad_enum("status", &self.status))?;
        Ok(ChatMessage {
            id: self.id,
            session_id: self.session_id,
            seq: self.seq,
            sender_id: self.sender_id,
            sender_role,
            body: self.body,
            created_at: self.created_at,
            updated_at: self.updated_at,
            status,
            delivered_at: self.delivered_at,
            read_at: self.read_at,
            read_by: self.read_by.0,
            flagged: self.flagged,
            flag_reason: self.flag_reason,
            metadata: self.metadata.0,
        })
    }
}

#[derive(FromRow)]
struct ModerationEventRow {
    id: Uuid,
    session_id: Uuid,
    message_id: Option<Uuid>,
    seeker_id: Option<Uuid>,
    volunteer_id: Option<Uuid>,
    message_text: String,
    direction: String,
    flag_type: String,
    severity: f64,
    source: String,
    created_at: DateTime<Utc>,
    reviewed: bool,
    reviewed_at: Option<DateTime<Utc>>,
    reviewed_by: Option<Uuid>,
    resolution: Option<String>,
    resolution_notes: Option<String>,
}

impl ModerationEventRow {
    fn into_model(self) -> Result<ModerationEvent, ChatError> {
        let direction = MessageDirection::parse(&self.direction)
            .ok_or_else(|| bad_enum("direction", &self.direction))?;
        let source =
            FlagSource::parse(&self.source).ok_or_else(|| bad_enum("source", &self.source))?;
        let resolution = match self.resolution {
            Some(ref r) => Some(Resolution::parse(r).ok_or_else(|| bad_enum("resolution", r))?),
            None => None,
        };
        Ok(ModerationEvent {
            id: self.id,
            session_id: self.session_id,
            message_id: self.message_id,
            seeker_id: self.seeker_id,
            volunteer_id: self.volunteer_id,
            message_text: self.message_text,
            direction,
            flag_type: self.flag_type,
            severity: self.severity,
            source,
            created_at: self.created_at,
            reviewed: self.reviewed,
            reviewed_at: self.reviewed_at,
            reviewed_by: self.reviewed_by,
            resolution,
            resolution_notes: self.resolution_notes,
        })
    }
}

#[derive(FromRow)]
struct FeedbackRow {
    id: Uuid,
    session_id: Uuid,
    seeker_id: Uuid,
    volunteer_id: Option<Uuid>,
    rating: String,
    comments: String,
    created_at: DateTime<Utc>,
    metadata: Json<serde_json::Value>,
    reviewed: bool,
    reviewed_at: Option<DateTime<Utc>>,
    reviewed_by: Option<Uuid>,
}

impl FeedbackRow {
    fn into_model(self) -> Result<Feedback, ChatError> {
        let rating =
            Rating::parse(&self.rating).ok_or_else(|| bad_enum("rating", &self.rating))?;
        Ok(Feedback {
            id: self.id,
            session_id: self.session_id,
            seeker_id: self.seeker_id,
            volunteer_id: self.volunteer_id,
            rating,
            comments: self.comments,
            created_at: self.created_at,
            metadata: self.metadata.0,
            reviewed: self.reviewed,
            reviewed_at: self.reviewed_at,
            reviewed_by: self.reviewed_by,
        })
    }
}

#[derive(FromRow)]
struct VolunteerRow {
    user_id: Uuid,
    status: String,
    roles: Vec<String>,
    flagged_sessions: i64,
    sessions_completed: i64,
    average_score: f64,
    last_active: Option<DateTime<Utc>>,
}

impl VolunteerRow {
    fn into_model(self) -> Result<VolunteerProfile, ChatError> {
        let status = VolunteerStatus::parse(&self.status)
            .ok_or_else(|| bad_enum("volunteer status", &self.status))?;
        Ok(VolunteerProfile {
            user_id: self.user_id,
            status,
            roles: self.roles,
            flagged_sessions: self.flagged_sessions,
            sessions_completed: self.sessions_completed,
            average_score: self.average_score,
            last_active: self.last_active,
        })
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    event_id: Uuid,
    action: String,
    detail: String,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_model(self) -> AuditEntry {
        AuditEntry {
            id: self.id,
            event_id: self.event_id,
            action: self.action,
            detail: self.detail,
            created_at: self.created_at,
        }
    }
}

fn collect_sessions(rows: Vec<SessionRow>) -> Result<Vec<ChatSession>, ChatError> {
    rows.into_iter().map(SessionRow::into_model).collect()
}

fn collect_messages(rows: Vec<MessageRow>) -> Result<Vec<ChatMessage>, ChatError> {
    rows.into_iter().map(MessageRow::into_model).collect()
}

fn collect_events(rows: Vec<ModerationEventRow>) -> Result<Vec<ModerationEvent>, ChatError> {
    rows.into_iter().map(ModerationEventRow::into_model).collect()
}

fn collect_feedback(rows: Vec<FeedbackRow>) -> Result<Vec<Feedback>, ChatError> {
    rows.into_iter().map(FeedbackRow::into_model).collect()
}

#[async_trait]
impl ChatStore for PgStore {
    async fn insert_session(&self, session: ChatSession) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, seeker_id, volunteer_id, status, created_at, last_activity,
                ended_at, duration_secs, message_count, moderation_flags, feedback,
                seeker_typing_until, volunteer_typing_until
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.id)
        .bind(session.seeker_id)
        .bind(session.volunteer_id)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.ended_at)
        .bind(session.duration_secs)
        .bind(session.message_count)
        .bind(session.moderation_flags)
        .bind(session.feedback.map(Json))
        .bind(session.typing.seeker_until)
        .bind(session.typing.volunteer_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Option<ChatSession>, ChatError> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM chat_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SessionRow::into_model).transpose()
    }

    async fn claim_session(
        &self,
        id: Uuid,
        volunteer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET volunteer_id = $2, status = 'active', last_activity = GREATEST(last_activity, $3)
            WHERE id = $1 AND status = 'waiting' AND volunteer_id IS NULL
            "#,
        )
        .bind(id)
        .bind(volunteer_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn complete_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 'completed', ended_at = $2, duration_secs = $3,
                last_activity = GREATEST(last_activity, $2)
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .bind(duration_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn resume_session(&self, id: Uuid) -> Result<bool, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 'active', ended_at = NULL, duration_secs = NULL
            WHERE id = $1 AND status = 'completed' AND volunteer_id IS NOT NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_message_count(&self, id: Uuid, count: i64) -> Result<bool, ChatError> {
        let result = sqlx::query("UPDATE chat_sessions SET message_count = $2 WHERE id = $1")
            .bind(id)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_message_activity(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            UPDATE chat_sessions
            SET message_count = message_count + 1, last_activity = GREATEST(last_activity, $2)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_typing(
        &self,
        id: Uuid,
        role: SenderRole,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, ChatError> {
        let column = match role {
            SenderRole::Seeker => "seeker_typing_until",
            SenderRole::Volunteer => "volunteer_typing_until",
            SenderRole::System => return Ok(false),
        };
        let sql = format!("UPDATE chat_sessions SET {} = $2 WHERE id = $1", column);
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(until)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn typing_state(&self, id: Uuid) -> Result<Option<TypingState>, ChatError> {
        let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT seeker_typing_until, volunteer_typing_until FROM chat_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(seeker_until, volunteer_until)| TypingState {
            seeker_until,
            volunteer_until,
        }))
    }

    async fn set_feedback_summary(
        &self,
        id: Uuid,
        summary: FeedbackSummary,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query("UPDATE chat_sessions SET feedback = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(summary))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_session_flags(&self, id: Uuid) -> Result<(), ChatError> {
        sqlx::query("UPDATE chat_sessions SET moderation_flags = moderation_flags + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn waiting_sessions(&self, limit: i64) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM chat_sessions WHERE status = 'waiting' ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_sessions(rows)
    }

    async fn volunteer_sessions(
        &self,
        volunteer_id: Uuid,
        status: SessionStatus,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM chat_sessions
            WHERE volunteer_id = $1 AND status = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(volunteer_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect_sessions(rows)
    }

    async fn seeker_sessions(
        &self,
        seeker_id: Uuid,
        status: Option<SessionStatus>,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM chat_sessions
            WHERE seeker_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(seeker_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        collect_sessions(rows)
    }

    async fn stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM chat_sessions
            WHERE status IN ('waiting', 'active') AND last_activity < $1
            ORDER BY last_activity ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        collect_sessions(rows)
    }

    async fn insert_message(&self, mut message: ChatMessage) -> Result<ChatMessage, ChatError> {
        let (seq,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO chat_messages (
                id, session_id, sender_id, sender_role, body, created_at, updated_at,
                status, delivered_at, read_at, read_by, flagged, flag_reason, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING seq
            "#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.sender_id)
        .bind(message.sender_role.as_str())
        .bind(&message.body)
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.status.as_str())
        .bind(message.delivered_at)
        .bind(message.read_at)
        .bind(Json(&message.read_by))
        .bind(message.flagged)
        .bind(&message.flag_reason)
        .bind(Json(&message.metadata))
        .fetch_one(&self.pool)
        .await?;
        message.seq = seq;
        Ok(message)
    }

    async fn message(&self, id: Uuid) -> Result<Option<ChatMessage>, ChatError> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM chat_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MessageRow::into_model).transpose()
    }

    async fn session_messages(
        &self,
        session_id: Uuid,
        query: MessageQuery,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = $1
              AND ($2::timestamptz IS NULL OR created_at < $2)
              AND ($3::timestamptz IS NULL OR created_at > $3)
            ORDER BY created_at DESC, seq DESC
            LIMIT $4
            "#,
        )
        .bind(session_id)
        .bind(query.before)
        .bind(query.after)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = collect_messages(rows)?;
        messages.reverse();
        Ok(messages)
    }

    async fn messages_updated_since(
        &self,
        session_id: Uuid,
        cursor: Option<Cursor>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let (cursor_at, cursor_seq) = match cursor {
            Some(c) => (Some(c.updated_at), c.seq),
            None => (None, 0),
        };
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = $1
              AND ($2::timestamptz IS NULL
                   OR updated_at > $2
                   OR (updated_at = $2 AND seq > $3))
            ORDER BY updated_at ASC, seq ASC
            "#,
        )
        .bind(session_id)
        .bind(cursor_at)
        .bind(cursor_seq)
        .fetch_all(&self.pool)
        .await?;
        collect_messages(rows)
    }

    async fn recent_duplicate(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        body: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ChatMessage>, ChatError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = $1 AND sender_id = $2 AND body = $3 AND created_at > $4
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .bind(sender_id)
        .bind(body)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MessageRow::into_model).transpose()
    }

    async fn welcome_exists(&self, session_id: Uuid) -> Result<bool, ChatError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM chat_messages
                WHERE session_id = $1
                  AND sender_role = 'system'
                  AND (metadata->>'welcome_message') = 'true'
            )
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_delivered(
        &self,
        session_id: Uuid,
        from_role: SenderRole,
        at: DateTime<Utc>,
    ) -> Result<u64, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET status = 'delivered', delivered_at = $3, updated_at = $3
            WHERE session_id = $1 AND sender_role = $2 AND status = 'sent'
            "#,
        )
        .bind(session_id)
        .bind(from_role.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_read(
        &self,
        session_id: Uuid,
        from_role: SenderRole,
        reader: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET status = 'read', read_at = $4, updated_at = $4,
                read_by = read_by || jsonb_build_array(
                    jsonb_build_object('reader_id', to_jsonb($3::uuid), 'timestamp', to_jsonb($4::timestamptz))
                )
            WHERE session_id = $1 AND sender_role = $2 AND status IN ('sent', 'delivered')
            "#,
        )
        .bind(session_id)
        .bind(from_role.as_str())
        .bind(reader)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn flag_message(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET flagged = TRUE, flag_reason = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_message(&self, id: Uuid) -> Result<bool, ChatError> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_moderation_event(&self, event: ModerationEvent) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_events (
                id, session_id, message_id, seeker_id, volunteer_id, message_text,
                direction, flag_type, severity, source, created_at, reviewed,
                reviewed_at, reviewed_by, resolution, resolution_notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(event.id)
        .bind(event.session_id)
        .bind(event.message_id)
        .bind(event.seeker_id)
        .bind(event.volunteer_id)
        .bind(&event.message_text)
        .bind(event.direction.as_str())
        .bind(event.flag_type)
        .bind(event.severity)
        .bind(event.source.as_str())
        .bind(event.created_at)
        .bind(event.reviewed)
        .bind(event.reviewed_at)
        .bind(event.reviewed_by)
        .bind(event.resolution.map(|r| r.as_str()))
        .bind(event.resolution_notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn moderation_event(&self, id: Uuid) -> Result<Option<ModerationEvent>, ChatError> {
        let row =
            sqlx::query_as::<_, ModerationEventRow>("SELECT * FROM moderation_events WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ModerationEventRow::into_model).transpose()
    }

    async fn resolve_moderation_event(
        &self,
        id: Uuid,
        reviewer: Uuid,
        resolution: Resolution,
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_events
            SET reviewed = TRUE, reviewed_at = $3, reviewed_by = $2,
                resolution = $4, resolution_notes = $5
            WHERE id = $1 AND reviewed = FALSE
            "#,
        )
        .bind(id)
        .bind(reviewer)
        .bind(at)
        .bind(resolution.as_str())
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unreviewed_moderation_events(
        &self,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        let rows = sqlx::query_as::<_, ModerationEventRow>(
            r#"
            SELECT * FROM moderation_events
            WHERE reviewed = FALSE
            ORDER BY severity DESC, created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_events(rows)
    }

    async fn session_moderation_events(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        let rows = sqlx::query_as::<_, ModerationEventRow>(
            "SELECT * FROM moderation_events WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        collect_events(rows)
    }

    async fn volunteer_moderation_events(
        &self,
        volunteer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        let rows = sqlx::query_as::<_, ModerationEventRow>(
            r#"
            SELECT * FROM moderation_events
            WHERE volunteer_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(volunteer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_events(rows)
    }

    async fn volunteer_profile(&self, id: Uuid) -> Result<Option<VolunteerProfile>, ChatError> {
        let row =
            sqlx::query_as::<_, VolunteerRow>("SELECT * FROM volunteer_profiles WHERE user_id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(VolunteerRow::into_model).transpose()
    }

    async fn touch_volunteer(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO volunteer_profiles
                (user_id, status, roles, flagged_sessions, sessions_completed, average_score, last_active)
            VALUES ($1, 'active', $2, 0, 0, 0, $3)
            ON CONFLICT (user_id) DO UPDATE SET last_active = EXCLUDED.last_active
            "#,
        )
        .bind(id)
        .bind(vec![VOLUNTEER_ROLE.to_string()])
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_flagged_session(&self, id: Uuid) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO volunteer_profiles
                (user_id, status, roles, flagged_sessions, sessions_completed, average_score)
            VALUES ($1, 'active', $2, 1, 0, 0)
            ON CONFLICT (user_id)
            DO UPDATE SET flagged_sessions = volunteer_profiles.flagged_sessions + 1
            "#,
        )
        .bind(id)
        .bind(vec![VOLUNTEER_ROLE.to_string()])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_completed_session(&self, id: Uuid) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO volunteer_profiles
                (user_id, status, roles, flagged_sessions, sessions_completed, average_score)
            VALUES ($1, 'active', $2, 0, 1, 0)
            ON CONFLICT (user_id)
            DO UPDATE SET sessions_completed = volunteer_profiles.sessions_completed + 1
            "#,
        )
        .bind(id)
        .bind(vec![VOLUNTEER_ROLE.to_string()])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_average_score(&self, id: Uuid, score: f64) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO volunteer_profiles
                (user_id, status, roles, flagged_sessions, sessions_completed, average_score)
            VALUES ($1, 'active', $2, 0, 0, $3)
            ON CONFLICT (user_id) DO UPDATE SET average_score = EXCLUDED.average_score
            "#,
        )
        .bind(id)
        .bind(vec![VOLUNTEER_ROLE.to_string()])
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn suspend_volunteer(&self, id: Uuid) -> Result<bool, ChatError> {
        // Two statements: ensure the profile reads suspended even on retry,
        // then remove the role conditionally so the caller can tell whether
        // this invocation was the effective one.
        sqlx::query(
            r#"
            INSERT INTO volunteer_profiles
                (user_id, status, roles, flagged_sessions, sessions_completed, average_score)
            VALUES ($1, 'suspended', '{}', 0, 0, 0)
            ON CONFLICT (user_id) DO UPDATE SET status = 'suspended'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE volunteer_profiles
            SET roles = array_remove(roles, $2)
            WHERE user_id = $1 AND $2 = ANY(roles)
            "#,
        )
        .bind(id)
        .bind(VOLUNTEER_ROLE)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_feedback(&self, feedback: Feedback) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO chat_feedback (
                id, session_id, seeker_id, volunteer_id, rating, comments,
                created_at, metadata, reviewed, reviewed_at, reviewed_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(feedback.id)
        .bind(feedback.session_id)
        .bind(feedback.seeker_id)
        .bind(feedback.volunteer_id)
        .bind(feedback.rating.as_str())
        .bind(&feedback.comments)
        .bind(feedback.created_at)
        .bind(Json(&feedback.metadata))
        .bind(feedback.reviewed)
        .bind(feedback.reviewed_at)
        .bind(feedback.reviewed_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn volunteer_feedback(
        &self,
        volunteer_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Feedback>, ChatError> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT * FROM chat_feedback
            WHERE volunteer_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(volunteer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_feedback(rows)
    }

    async fn flagged_unreviewed_feedback(&self, limit: i64) -> Result<Vec<Feedback>, ChatError> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT * FROM chat_feedback
            WHERE rating = 'flagged' AND reviewed = FALSE
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_feedback(rows)
    }

    async fn mark_feedback_reviewed(
        &self,
        id: Uuid,
        reviewer: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_feedback
            SET reviewed = TRUE, reviewed_at = $3, reviewed_by = $2
            WHERE id = $1 AND reviewed = FALSE
            "#,
        )
        .bind(id)
        .bind(reviewer)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_audit (id, event_id, action, detail, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.event_id)
        .bind(&entry.action)
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>, ChatError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM moderation_audit ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditRow::into_model).collect())
    }
}
