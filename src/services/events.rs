// src/services/events.rs
//! Event distribution for stream viewers. There is no pub/sub fabric; each
//! viewer gets a poll loop over the store that diffs against its own state
//! (message cursor, typing flags, status snapshot) and emits only changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::auth::Principal;
use crate::models::message::ChatMessage;
use crate::models::session::{SessionStatus, TypingFlags};
use crate::services::is_participant;
use crate::store::{ChatStore, Cursor, MessageQuery};

pub const POLL_INTERVAL_MS: u64 = 2500;

/// Messages included in the opening snapshot.
pub const INIT_MESSAGE_LIMIT: i64 = 50;

/// Buffered events per viewer before backpressure kicks in.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
}

/// Opening snapshot sent once per stream: recent history plus current
/// typing and status state, so clients render without extra fetches.
#[derive(Debug, Clone, Serialize)]
pub struct InitPayload {
    pub messages: Vec<ChatMessage>,
    pub typing: TypingFlags,
    pub status: StatusSnapshot,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Init(InitPayload),
    Message(ChatMessage),
    MessageUpdate(ChatMessage),
    Typing(TypingFlags),
    Status(StatusSnapshot),
    Error { message: String },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Init(_) => "init",
            StreamEvent::Message(_) => "message",
            StreamEvent::MessageUpdate(_) => "message:update",
            StreamEvent::Typing(_) => "typing",
            StreamEvent::Status(_) => "status",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        let value = match self {
            StreamEvent::Init(p) => serde_json::to_value(p),
            StreamEvent::Message(m) | StreamEvent::MessageUpdate(m) => serde_json::to_value(m),
            StreamEvent::Typing(t) => serde_json::to_value(t),
            StreamEvent::Status(s) => serde_json::to_value(s),
            StreamEvent::Error { message } => Ok(serde_json::json!({ "message": message })),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Per-viewer poll state. Owned by the loop, never shared.
pub struct PollState {
    cursor: Option<Cursor>,
    typing: TypingFlags,
    status: StatusSnapshot,
}

#[derive(Clone)]
pub struct EventDistributor {
    store: Arc<dyn ChatStore>,
    poll_interval: Duration,
}

impl EventDistributor {
    pub fn new(store: Arc<dyn ChatStore>, poll_interval: Duration) -> Self {
        EventDistributor {
            store,
            poll_interval,
        }
    }

    /// Builds the opening snapshot and the poll state positioned just past it.
    pub async fn init(&self, session_id: Uuid) -> Result<(InitPayload, PollState), ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;

        let messages = self
            .store
            .session_messages(
                session_id,
                MessageQuery {
                    limit: INIT_MESSAGE_LIMIT,
                    ..MessageQuery::default()
                },
            )
            .await?;
        let cursor = messages
            .iter()
            .map(Cursor::of)
            .max_by_key(|c| (c.updated_at, c.seq));
        let typing = session.typing.flags_at(Utc::now());
        let status = StatusSnapshot {
            status: session.status,
            last_activity: session.last_activity,
        };

        let payload = InitPayload {
            messages,
            typing,
            status,
        };
        let state = PollState {
            cursor,
            typing,
            status,
        };
        Ok((payload, state))
    }

    /// One poll round: new and mutated messages past the cursor, then typing
    /// and status diffs. Advances the state in place.
    pub async fn poll(
        &self,
        session_id: Uuid,
        state: &mut PollState,
    ) -> Result<Vec<StreamEvent>, ChatError> {
        let mut events = Vec::new();

        let updated = self
            .store
            .messages_updated_since(session_id, state.cursor)
            .await?;
        for message in updated {
            let cursor = Cursor::of(&message);
            if state
                .cursor
                .map(|c| (cursor.updated_at, cursor.seq) > (c.updated_at, c.seq))
                .unwrap_or(true)
            {
                state.cursor = Some(cursor);
            }
            if message.updated_at == message.created_at {
                events.push(StreamEvent::Message(message));
            } else {
                events.push(StreamEvent::MessageUpdate(message));
            }
        }

        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;

        let typing = session.typing.flags_at(Utc::now());
        if typing != state.typing {
            state.typing = typing;
            events.push(StreamEvent::Typing(typing));
        }

        let status = StatusSnapshot {
            status: session.status,
            last_activity: session.last_activity,
        };
        if status != state.status {
            state.status = status;
            events.push(StreamEvent::Status(status));
        }

        Ok(events)
    }

    /// Opens a viewer stream: authorizes, then spawns the poll loop feeding a
    /// bounded channel. The loop ends when the receiver is dropped.
    pub async fn open(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !is_participant(principal, &session) {
            return Err(ChatError::forbidden("no access to this session"));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let distributor = self.clone();
        tokio::spawn(async move {
            distributor.run(session_id, tx).await;
        });
        Ok(rx)
    }

    async fn run(&self, session_id: Uuid, tx: mpsc::Sender<StreamEvent>) {
        let mut state = match self.init(session_id).await {
            Ok((payload, state)) => {
                if tx.send(StreamEvent::Init(payload)).await.is_err() {
                    return;
                }
                state
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, "stream init failed: {}", e);
                let _ = tx
                    .send(StreamEvent::Error {
                        message: "failed to initialize stream".to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            ticker.tick().await;
            match self.poll(session_id, &mut state).await {
                Ok(events) => {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            // Viewer went away.
                            return;
                        }
                    }
                    if tx.is_closed() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "poll failed: {}", e);
                    let failed = tx
                        .send(StreamEvent::Error {
                            message: "failed to poll for updates".to_string(),
                        })
                        .await
                        .is_err();
                    if failed {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::feedback::Feedback;
    use crate::models::message::SenderRole;
    use crate::models::moderation::{AuditEntry, ModerationEvent, Resolution};
    use crate::models::session::{ChatSession, FeedbackSummary, TypingState};
    use crate::models::volunteer::{VolunteerProfile, VOLUNTEER_ROLE};
    use crate::services::lifecycle::SessionLifecycle;
    use crate::services::messages::MessageLog;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        distributor: EventDistributor,
        log: MessageLog,
        session_id: Uuid,
        seeker: Principal,
        volunteer: Principal,
        lifecycle: SessionLifecycle,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn ChatStore>;
        let lifecycle = SessionLifecycle::new(store.clone());
        let log = MessageLog::new(store.clone());
        let distributor = EventDistributor::new(store, Duration::from_millis(10));

        let seeker = Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![],
        };
        let volunteer = Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![VOLUNTEER_ROLE.to_string()],
        };
        let session = lifecycle.request(&seeker).await.unwrap();
        lifecycle
            .claim(&volunteer, session.id, Some("Welcome!"))
            .await
            .unwrap();

        Fixture {
            distributor,
            log,
            session_id: session.id,
            seeker,
            volunteer,
            lifecycle,
        }
    }

    #[tokio::test]
    async fn test_init_snapshot_contains_history() {
        let f = fixture().await;
        f.log
            .append(&f.seeker, f.session_id, "hello", json!({}), false)
            .await
            .unwrap();

        let (payload, _) = f.distributor.init(f.session_id).await.unwrap();
        assert_eq!(payload.messages.len(), 2); // welcome + hello
        assert_eq!(payload.status.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_poll_emits_each_message_exactly_once() {
        let f = fixture().await;
        let (_, mut state) = f.distributor.init(f.session_id).await.unwrap();

        f.log
            .append(&f.seeker, f.session_id, "first", json!({}), false)
            .await
            .unwrap();
        let events = f.distributor.poll(f.session_id, &mut state).await.unwrap();
        let messages: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Message(_)))
            .collect();
        assert_eq!(messages.len(), 1);

        // Nothing new: the same message must not repeat.
        let events = f.distributor.poll(f.session_id, &mut state).await.unwrap();
        assert!(events
            .iter()
            .all(|e| !matches!(e, StreamEvent::Message(_) | StreamEvent::MessageUpdate(_))));
    }

    #[tokio::test]
    async fn test_read_receipt_surfaces_as_message_update() {
        let f = fixture().await;
        f.log
            .append(&f.seeker, f.session_id, "anyone there?", json!({}), false)
            .await
            .unwrap();
        let (_, mut state) = f.distributor.init(f.session_id).await.unwrap();

        f.log.mark_read(&f.volunteer, f.session_id).await.unwrap();
        let events = f.distributor.poll(f.session_id, &mut state).await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::MessageUpdate(_))));
    }

    #[tokio::test]
    async fn test_typing_and_status_changes_are_diffed() {
        let f = fixture().await;
        let (_, mut state) = f.distributor.init(f.session_id).await.unwrap();

        f.log
            .set_typing(&f.seeker, f.session_id, true)
            .await
            .unwrap();
        let events = f.distributor.poll(f.session_id, &mut state).await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Typing(t) if t.seeker)));

        f.lifecycle
            .complete(&f.seeker, f.session_id)
            .await
            .unwrap();
        let events = f.distributor.poll(f.session_id, &mut state).await.unwrap();
        assert!(events.iter().any(
            |e| matches!(e, StreamEvent::Status(s) if s.status == SessionStatus::Completed)
        ));
    }

    #[tokio::test]
    async fn test_open_requires_participant() {
        let f = fixture().await;
        let stranger = Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![],
        };
        let result = f.distributor.open(&stranger, f.session_id).await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_open_streams_init_then_new_messages() {
        let f = fixture().await;
        let mut rx = f.distributor.open(&f.seeker, f.session_id).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "init");

        f.log
            .append(&f.volunteer, f.session_id, "how are you holding up?", json!({}), false)
            .await
            .unwrap();
        let next = rx.recv().await.unwrap();
        assert_eq!(next.name(), "message");
    }

    /// Store wrapper that fails the next cursor read on demand, for driving
    /// the poll loop through its degraded path.
    struct FlakyStore {
        inner: MemoryStore,
        fail_next_poll: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            FlakyStore {
                inner: MemoryStore::new(),
                fail_next_poll: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ChatStore for FlakyStore {
        async fn messages_updated_since(
            &self,
            session_id: Uuid,
            cursor: Option<Cursor>,
        ) -> Result<Vec<ChatMessage>, ChatError> {
            if self.fail_next_poll.swap(false, Ordering::SeqCst) {
                return Err(ChatError::Store(sqlx::Error::PoolTimedOut));
            }
            self.inner.messages_updated_since(session_id, cursor).await
        }

        async fn insert_session(&self, session: ChatSession) -> Result<(), ChatError> {
            self.inner.insert_session(session).await
        }

        async fn session(&self, id: Uuid) -> Result<Option<ChatSession>, ChatError> {
            self.inner.session(id).await
        }

        async fn claim_session(
            &self,
            id: Uuid,
            volunteer_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<u64, ChatError> {
            self.inner.claim_session(id, volunteer_id, now).await
        }

        async fn complete_session(
            &self,
            id: Uuid,
            ended_at: DateTime<Utc>,
            duration_secs: i64,
        ) -> Result<bool, ChatError> {
            self.inner.complete_session(id, ended_at, duration_secs).await
        }

        async fn resume_session(&self, id: Uuid) -> Result<bool, ChatError> {
            self.inner.resume_session(id).await
        }

        async fn set_message_count(&self, id: Uuid, count: i64) -> Result<bool, ChatError> {
            self.inner.set_message_count(id, count).await
        }

        async fn record_message_activity(
            &self,
            id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<(), ChatError> {
            self.inner.record_message_activity(id, at).await
        }

        async fn set_typing(
            &self,
            id: Uuid,
            role: SenderRole,
            until: Option<DateTime<Utc>>,
        ) -> Result<bool, ChatError> {
            self.inner.set_typing(id, role, until).await
        }

        async fn typing_state(&self, id: Uuid) -> Result<Option<TypingState>, ChatError> {
            self.inner.typing_state(id).await
        }

        async fn set_feedback_summary(
            &self,
            id: Uuid,
            summary: FeedbackSummary,
        ) -> Result<bool, ChatError> {
            self.inner.set_feedback_summary(id, summary).await
        }

        async fn increment_session_flags(&self, id: Uuid) -> Result<(), ChatError> {
            self.inner.increment_session_flags(id).await
        }

        async fn waiting_sessions(&self, limit: i64) -> Result<Vec<ChatSession>, ChatError> {
            self.inner.waiting_sessions(limit).await
        }

        async fn volunteer_sessions(
            &self,
            volunteer_id: Uuid,
            status: SessionStatus,
        ) -> Result<Vec<ChatSession>, ChatError> {
            self.inner.volunteer_sessions(volunteer_id, status).await
        }

        async fn seeker_sessions(
            &self,
            seeker_id: Uuid,
            status: Option<SessionStatus>,
        ) -> Result<Vec<ChatSession>, ChatError> {
            self.inner.seeker_sessions(seeker_id, status).await
        }

        async fn stale_sessions(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<ChatSession>, ChatError> {
            self.inner.stale_sessions(cutoff).await
        }

        async fn insert_message(&self, message: ChatMessage) -> Result<ChatMessage, ChatError> {
            self.inner.insert_message(message).await
        }

        async fn message(&self, id: Uuid) -> Result<Option<ChatMessage>, ChatError> {
            self.inner.message(id).await
        }

        async fn session_messages(
            &self,
            session_id: Uuid,
            query: MessageQuery,
        ) -> Result<Vec<ChatMessage>, ChatError> {
            self.inner.session_messages(session_id, query).await
        }

        async fn recent_duplicate(
            &self,
            session_id: Uuid,
            sender_id: Uuid,
            body: &str,
            since: DateTime<Utc>,
        ) -> Result<Option<ChatMessage>, ChatError> {
            self.inner.recent_duplicate(session_id, sender_id, body, since).await
        }

        async fn welcome_exists(&self, session_id: Uuid) -> Result<bool, ChatError> {
            self.inner.welcome_exists(session_id).await
        }

        async fn mark_delivered(
            &self,
            session_id: Uuid,
            from_role: SenderRole,
            at: DateTime<Utc>,
        ) -> Result<u64, ChatError> {
            self.inner.mark_delivered(session_id, from_role, at).await
        }

        async fn mark_read(
            &self,
            session_id: Uuid,
            from_role: SenderRole,
            reader: Uuid,
            at: DateTime<Utc>,
        ) -> Result<u64, ChatError> {
            self.inner.mark_read(session_id, from_role, reader, at).await
        }

        async fn flag_message(
            &self,
            id: Uuid,
            reason: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, ChatError> {
            self.inner.flag_message(id, reason, at).await
        }

        async fn delete_message(&self, id: Uuid) -> Result<bool, ChatError> {
            self.inner.delete_message(id).await
        }

        async fn insert_moderation_event(&self, event: ModerationEvent) -> Result<(), ChatError> {
            self.inner.insert_moderation_event(event).await
        }

        async fn moderation_event(&self, id: Uuid) -> Result<Option<ModerationEvent>, ChatError> {
            self.inner.moderation_event(id).await
        }

        async fn resolve_moderation_event(
            &self,
            id: Uuid,
            reviewer: Uuid,
            resolution: Resolution,
            notes: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, ChatError> {
            self.inner
                .resolve_moderation_event(id, reviewer, resolution, notes, at)
                .await
        }

        async fn unreviewed_moderation_events(
            &self,
            limit: i64,
        ) -> Result<Vec<ModerationEvent>, ChatError> {
            self.inner.unreviewed_moderation_events(limit).await
        }

        async fn session_moderation_events(
            &self,
            session_id: Uuid,
        ) -> Result<Vec<ModerationEvent>, ChatError> {
            self.inner.session_moderation_events(session_id).await
        }

        async fn volunteer_moderation_events(
            &self,
            volunteer_id: Uuid,
            limit: i64,
        ) -> Result<Vec<ModerationEvent>, ChatError> {
            self.inner.volunteer_moderation_events(volunteer_id, limit).await
        }

        async fn volunteer_profile(&self, id: Uuid) -> Result<Option<VolunteerProfile>, ChatError> {
            self.inner.volunteer_profile(id).await
        }

        async fn touch_volunteer(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ChatError> {
            self.inner.touch_volunteer(id, at).await
        }

        async fn add_flagged_session(&self, id: Uuid) -> Result<(), ChatError> {
            self.inner.add_flagged_session(id).await
        }

        async fn add_completed_session(&self, id: Uuid) -> Result<(), ChatError> {
            self.inner.add_completed_session(id).await
        }

        async fn set_average_score(&self, id: Uuid, score: f64) -> Result<(), ChatError> {
            self.inner.set_average_score(id, score).await
        }

        async fn suspend_volunteer(&self, id: Uuid) -> Result<bool, ChatError> {
            self.inner.suspend_volunteer(id).await
        }

        async fn insert_feedback(&self, feedback: Feedback) -> Result<(), ChatError> {
            self.inner.insert_feedback(feedback).await
        }

        async fn volunteer_feedback(
            &self,
            volunteer_id: Uuid,
            limit: Option<i64>,
        ) -> Result<Vec<Feedback>, ChatError> {
            self.inner.volunteer_feedback(volunteer_id, limit).await
        }

        async fn flagged_unreviewed_feedback(
            &self,
            limit: i64,
        ) -> Result<Vec<Feedback>, ChatError> {
            self.inner.flagged_unreviewed_feedback(limit).await
        }

        async fn mark_feedback_reviewed(
            &self,
            id: Uuid,
            reviewer: Uuid,
            at: DateTime<Utc>,
        ) -> Result<bool, ChatError> {
            self.inner.mark_feedback_reviewed(id, reviewer, at).await
        }

        async fn record_audit(&self, entry: AuditEntry) -> Result<(), ChatError> {
            self.inner.record_audit(entry).await
        }

        async fn audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>, ChatError> {
            self.inner.audit_entries(limit).await
        }
    }

    #[tokio::test]
    async fn test_poll_failure_emits_error_then_stream_recovers() {
        let flaky = Arc::new(FlakyStore::new());
        let store = flaky.clone() as Arc<dyn ChatStore>;
        let lifecycle = SessionLifecycle::new(store.clone());
        let log = MessageLog::new(store.clone());
        let distributor = EventDistributor::new(store, Duration::from_millis(10));

        let seeker = Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![],
        };
        let volunteer = Principal {
            id: Uuid::new_v4(),
            is_admin: false,
            roles: vec![VOLUNTEER_ROLE.to_string()],
        };
        let session = lifecycle.request(&seeker).await.unwrap();
        lifecycle.claim(&volunteer, session.id, None).await.unwrap();

        let mut rx = distributor.open(&seeker, session.id).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "init");

        flaky.fail_next_poll.store(true, Ordering::SeqCst);
        assert_eq!(rx.recv().await.unwrap().name(), "error");

        // The failed cycle does not end the stream; the next tick delivers.
        log.append(&volunteer, session.id, "still here", json!({}), false)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "message");
    }
}
