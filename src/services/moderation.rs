// src/services/moderation.rs
//! Moderation pipeline: classify outbound messages, record flags, serve the
//! review queue, and apply resolutions. A resolution is a primary write plus
//! cascading side effects; when a cascade step fails after the primary write
//! landed, the failure is recorded in the audit log rather than rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::classifier::{heuristic_flags, ModerationClient};
use crate::error::ChatError;
use crate::models::auth::Principal;
use crate::models::message::{ChatMessage, SenderRole};
use crate::models::moderation::{
    AuditEntry, FlagSource, MessageDirection, ModerationEvent, Resolution,
};
use crate::models::session::ChatSession;
use crate::services::is_participant;
use crate::services::lifecycle::SessionLifecycle;
use crate::store::ChatStore;

/// Flags below this severity are logged but never recorded as events.
pub const MIN_EVENT_SEVERITY: f64 = 0.3;

/// Above this severity the implicated volunteer's flagged-session counter
/// advances immediately, ahead of any review.
pub const ESCALATION_SEVERITY: f64 = 0.7;

/// Severity assigned to participant reports, which always reach the queue.
pub const USER_REPORT_SEVERITY: f64 = 0.8;

#[derive(Clone)]
pub struct ModerationPipeline {
    store: Arc<dyn ChatStore>,
    classifier: Option<ModerationClient>,
    lifecycle: SessionLifecycle,
}

impl ModerationPipeline {
    pub fn new(
        store: Arc<dyn ChatStore>,
        classifier: Option<ModerationClient>,
        lifecycle: SessionLifecycle,
    ) -> Self {
        ModerationPipeline {
            store,
            classifier,
            lifecycle,
        }
    }

    fn direction(role: SenderRole) -> MessageDirection {
        match role {
            SenderRole::Volunteer => MessageDirection::VolunteerToSeeker,
            _ => MessageDirection::SeekerToVolunteer,
        }
    }

    /// Classifies a freshly appended message and records an event per flagged
    /// category at or above the threshold. Classifier outages fail open; the
    /// heuristics still run.
    pub async fn evaluate(&self, message: &ChatMessage) -> Result<Vec<ModerationEvent>, ChatError> {
        if message.sender_role == SenderRole::System {
            return Ok(Vec::new());
        }

        let mut flags = heuristic_flags(&message.body);
        if let Some(client) = &self.classifier {
            match client.classify(&message.body).await {
                Ok(remote) => flags.extend(remote),
                Err(e) => {
                    tracing::warn!("content classifier unavailable, heuristics only: {}", e)
                }
            }
        }

        // Highest severity wins per category.
        let mut by_category: HashMap<String, f64> = HashMap::new();
        for flag in flags {
            let entry = by_category.entry(flag.flag_type).or_insert(0.0);
            if flag.severity > *entry {
                *entry = flag.severity;
            }
        }
        by_category.retain(|_, severity| *severity >= MIN_EVENT_SEVERITY);
        if by_category.is_empty() {
            return Ok(Vec::new());
        }

        let session = self
            .store
            .session(message.session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;

        let mut events = Vec::new();
        for (flag_type, severity) in by_category {
            let event = self
                .record_flag(
                    &session,
                    Some(message.id),
                    Self::direction(message.sender_role),
                    &message.body,
                    &flag_type,
                    severity,
                    FlagSource::Classifier,
                )
                .await?;
            events.push(event);
        }

        if let Some(top) = events
            .iter()
            .max_by(|a, b| a.severity.total_cmp(&b.severity))
        {
            let reason = format!("{} ({:.2})", top.flag_type, top.severity);
            self.store.flag_message(message.id, &reason, Utc::now()).await?;
        }

        Ok(events)
    }

    /// Records one moderation event and its immediate bookkeeping: the
    /// session's flag counter always advances, and past the escalation
    /// threshold so does the implicated volunteer's.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_flag(
        &self,
        session: &ChatSession,
        message_id: Option<Uuid>,
        direction: MessageDirection,
        text: &str,
        flag_type: &str,
        severity: f64,
        source: FlagSource,
    ) -> Result<ModerationEvent, ChatError> {
        let event = ModerationEvent {
            id: Uuid::new_v4(),
            session_id: session.id,
            message_id,
            seeker_id: Some(session.seeker_id),
            volunteer_id: session.volunteer_id,
            message_text: text.to_string(),
            direction,
            flag_type: flag_type.to_string(),
            severity: severity.clamp(0.0, 1.0),
            source,
            created_at: Utc::now(),
            reviewed: false,
            reviewed_at: None,
            reviewed_by: None,
            resolution: None,
            resolution_notes: None,
        };
        self.store.insert_moderation_event(event.clone()).await?;
        self.store.increment_session_flags(session.id).await?;

        if event.severity > ESCALATION_SEVERITY {
            if let Some(volunteer_id) = event.volunteer_id {
                self.store.add_flagged_session(volunteer_id).await?;
            }
        }

        tracing::info!(
            event_id = %event.id,
            session_id = %session.id,
            flag_type = %event.flag_type,
            severity = event.severity,
            source = source.as_str(),
            "moderation event recorded"
        );
        Ok(event)
    }

    /// Participant report: flags the message and queues an event for review.
    pub async fn report(
        &self,
        principal: &Principal,
        message_id: Uuid,
        reason: Option<String>,
    ) -> Result<ModerationEvent, ChatError> {
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

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "reported by participant".to_string());
        self.store.flag_message(message.id, &reason, Utc::now()).await?;

        self.record_flag(
            &session,
            Some(message.id),
            Self::direction(message.sender_role),
            &message.body,
            "user_report",
            USER_REPORT_SEVERITY,
            FlagSource::UserReport,
        )
        .await
    }

    /// Resolves an event. The resolution write is conditional on the event
    /// still being unreviewed; the cascade then runs best-effort, with any
    /// failure captured as an audit entry for administrators.
    pub async fn resolve(
        &self,
        admin: &Principal,
        event_id: Uuid,
        resolution: Resolution,
        notes: &str,
    ) -> Result<ModerationEvent, ChatError> {
        if !admin.is_admin {
            return Err(ChatError::forbidden(
                "only administrators can resolve moderation events",
            ));
        }
        let event = self
            .store
            .moderation_event(event_id)
            .await?
            .ok_or(ChatError::NotFound("moderation event"))?;
        if resolution == Resolution::VolunteerSuspended && event.volunteer_id.is_none() {
            return Err(ChatError::Validation(
                "event does not implicate a volunteer".to_string(),
            ));
        }

        let now = Utc::now();
        let wrote = self
            .store
            .resolve_moderation_event(event_id, admin.id, resolution, notes, now)
            .await?;
        if !wrote && event.resolution != Some(resolution) {
            return Err(ChatError::Validation(
                "moderation event is already resolved".to_string(),
            ));
        }
        // A retry carrying the same resolution falls through and re-runs the
        // cascade, whose steps are idempotent.

        if let Err(e) = self.apply_resolution(admin, &event, resolution).await {
            tracing::error!(
                event_id = %event.id,
                resolution = resolution.as_str(),
                "resolution side effect failed: {}",
                e
            );
            let entry = AuditEntry::new(event.id, resolution.as_str(), e.to_string(), now);
            self.store.record_audit(entry).await?;
        }

        self.store
            .moderation_event(event_id)
            .await?
            .ok_or(ChatError::NotFound("moderation event"))
    }

    async fn apply_resolution(
        &self,
        admin: &Principal,
        event: &ModerationEvent,
        resolution: Resolution,
    ) -> Result<(), ChatError> {
        match resolution {
            Resolution::Warning | Resolution::FalsePositive => Ok(()),
            Resolution::SessionEnded => {
                match self.lifecycle.complete(admin, event.session_id).await {
                    Ok(_) => Ok(()),
                    // Already completed (or never activated): nothing to end.
                    Err(ChatError::Validation(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Resolution::VolunteerSuspended => {
                let volunteer_id = event.volunteer_id.ok_or_else(|| {
                    ChatError::Validation("event does not implicate a volunteer".to_string())
                })?;
                if self.store.suspend_volunteer(volunteer_id).await? {
                    tracing::warn!(volunteer_id = %volunteer_id, "volunteer suspended");
                }
                Ok(())
            }
        }
    }

    /// Review queue, highest severity first.
    pub async fn queue(&self, limit: i64) -> Result<Vec<ModerationEvent>, ChatError> {
        self.store.unreviewed_moderation_events(limit).await
    }

    pub async fn session_history(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        self.store.session_moderation_events(session_id).await
    }

    pub async fn volunteer_history(
        &self,
        volunteer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ModerationEvent>, ChatError> {
        self.store.volunteer_moderation_events(volunteer_id, limit).await
    }

    pub async fn audit_log(&self, limit: i64) -> Result<Vec<AuditEntry>, ChatError> {
        self.store.audit_entries(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionStatus;
    use crate::models::volunteer::VOLUNTEER_ROLE;
    use crate::services::messages::MessageLog;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn admin() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            is_admin: true,
            roles: vec![],
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        log: MessageLog,
        pipeline: ModerationPipeline,
        session: ChatSession,
        seeker: Principal,
        volunteer: Principal,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let shared = store.clone() as Arc<dyn ChatStore>;
        let lifecycle = SessionLifecycle::new(shared.clone());
        let log = MessageLog::new(shared.clone());
        let pipeline = ModerationPipeline::new(shared, None, lifecycle.clone());

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
        let session = lifecycle.claim(&volunteer, session.id, None).await.unwrap();

        Fixture {
            store,
            log,
            pipeline,
            session,
            seeker,
            volunteer,
        }
    }

    async fn send(f: &Fixture, from: &Principal, body: &str) -> ChatMessage {
        f.log
            .append(from, f.session.id, body, json!({}), false)
            .await
            .unwrap()
            .message()
            .clone()
    }

    #[tokio::test]
    async fn test_clean_message_produces_no_events() {
        let f = fixture().await;
        let message = send(&f, &f.seeker, "thanks for listening tonight").await;
        let events = f.pipeline.evaluate(&message).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_flagged_message_records_event_and_counters() {
        let f = fixture().await;
        let message = send(&f, &f.volunteer, "pay me on venmo or else").await;
        let events = f.pipeline.evaluate(&message).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, MessageDirection::VolunteerToSeeker);
        assert_eq!(events[0].source, FlagSource::Classifier);

        let session = f.store.session(f.session.id).await.unwrap().unwrap();
        assert_eq!(session.moderation_flags, 1);

        let message = f.store.message(message.id).await.unwrap().unwrap();
        assert!(message.flagged);
    }

    #[tokio::test]
    async fn test_high_severity_escalates_volunteer_counter() {
        let f = fixture().await;
        let message = send(&f, &f.volunteer, "I will come after you").await;
        let events = f.pipeline.evaluate(&message).await.unwrap();
        assert!(events.iter().any(|e| e.severity > ESCALATION_SEVERITY));

        let profile = f
            .store
            .volunteer_profile(f.volunteer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.flagged_sessions, 1);
    }

    #[tokio::test]
    async fn test_user_report_reaches_queue() {
        let f = fixture().await;
        let message = send(&f, &f.volunteer, "perfectly ordinary text").await;
        let event = f
            .pipeline
            .report(&f.seeker, message.id, Some("made me uncomfortable".to_string()))
            .await
            .unwrap();
        assert_eq!(event.source, FlagSource::UserReport);
        assert_eq!(event.severity, USER_REPORT_SEVERITY);

        let queue = f.pipeline.queue(10).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, event.id);
    }

    #[tokio::test]
    async fn test_session_ended_resolution_completes_session() {
        let f = fixture().await;
        let message = send(&f, &f.volunteer, "send it to my crypto wallet").await;
        let events = f.pipeline.evaluate(&message).await.unwrap();

        let resolved = f
            .pipeline
            .resolve(&admin(), events[0].id, Resolution::SessionEnded, "ended")
            .await
            .unwrap();
        assert!(resolved.reviewed);
        assert_eq!(resolved.resolution, Some(Resolution::SessionEnded));

        let session = f.store.session(f.session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_suspension_is_idempotent_across_retries() {
        let f = fixture().await;
        let message = send(&f, &f.volunteer, "I will make you pay").await;
        let events = f.pipeline.evaluate(&message).await.unwrap();
        let reviewer = admin();

        f.pipeline
            .resolve(&reviewer, events[0].id, Resolution::VolunteerSuspended, "")
            .await
            .unwrap();
        // Retrying the same resolution succeeds without suspending twice.
        f.pipeline
            .resolve(&reviewer, events[0].id, Resolution::VolunteerSuspended, "")
            .await
            .unwrap();

        let profile = f
            .store
            .volunteer_profile(f.volunteer.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!profile.roles.iter().any(|r| r == VOLUNTEER_ROLE));
    }

    #[tokio::test]
    async fn test_conflicting_second_resolution_is_rejected() {
        let f = fixture().await;
        let message = send(&f, &f.volunteer, "I will make you pay").await;
        let events = f.pipeline.evaluate(&message).await.unwrap();
        let reviewer = admin();

        f.pipeline
            .resolve(&reviewer, events[0].id, Resolution::Warning, "first")
            .await
            .unwrap();
        let second = f
            .pipeline
            .resolve(&reviewer, events[0].id, Resolution::SessionEnded, "second")
            .await;
        assert!(matches!(second, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_queue_orders_by_severity_then_age() {
        let f = fixture().await;
        let spam = send(&f, &f.seeker, "aaaaaaaaaaaaaaaaaaaaaaaa").await;
        f.pipeline.evaluate(&spam).await.unwrap();
        let threat = send(&f, &f.seeker, "I will hurt you").await;
        f.pipeline.evaluate(&threat).await.unwrap();

        let queue = f.pipeline.queue(10).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue[0].severity >= queue[1].severity);
        assert_eq!(queue[0].flag_type, "threats");
    }
}
