// src/services/feedback.rs
//! Post-session feedback and the volunteer reputation it feeds. One rating
//! per submission; resubmitting overwrites the session's summary (last write
//! wins) and the volunteer's average is recomputed over full history.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::auth::Principal;
use crate::models::feedback::{average_score, Feedback, Rating, VolunteerFeedbackStats};
use crate::models::session::{FeedbackSummary, SessionStatus};
use crate::store::ChatStore;

/// Feedback entries returned alongside stats in the volunteer view.
const HISTORY_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct FeedbackTracker {
    store: Arc<dyn ChatStore>,
}

impl FeedbackTracker {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        FeedbackTracker { store }
    }

    /// Records the seeker's rating for a completed session. Flagged ratings
    /// enter the triage queue unreviewed and count against the volunteer
    /// immediately.
    pub async fn submit(
        &self,
        principal: &Principal,
        session_id: Uuid,
        rating: Rating,
        comments: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<Feedback, ChatError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))?;
        if !session.is_seeker(principal.id) && !principal.is_admin {
            return Err(ChatError::forbidden(
                "only the session's seeker can submit feedback",
            ));
        }
        if session.status != SessionStatus::Completed {
            return Err(ChatError::Validation(
                "feedback requires a completed session".to_string(),
            ));
        }

        let now = Utc::now();
        let comments = comments.unwrap_or_default().trim().to_string();
        let mut metadata = if metadata.is_object() {
            metadata
        } else {
            json!({})
        };
        if let (Some(obj), Some(duration)) = (metadata.as_object_mut(), session.duration_secs) {
            obj.entry("session_length_secs").or_insert(json!(duration));
        }

        let feedback = Feedback {
            id: Uuid::new_v4(),
            session_id,
            seeker_id: session.seeker_id,
            volunteer_id: session.volunteer_id,
            rating,
            comments: comments.clone(),
            created_at: now,
            metadata,
            reviewed: rating != Rating::Flagged,
            reviewed_at: None,
            reviewed_by: None,
        };
        self.store.insert_feedback(feedback.clone()).await?;
        self.store
            .set_feedback_summary(
                session_id,
                FeedbackSummary {
                    rating,
                    comments,
                    submitted_at: now,
                },
            )
            .await?;

        if let Some(volunteer_id) = session.volunteer_id {
            if rating == Rating::Flagged {
                self.store.add_flagged_session(volunteer_id).await?;
            }
            let history = self.store.volunteer_feedback(volunteer_id, None).await?;
            let ratings: Vec<Rating> = history.iter().map(|f| f.rating).collect();
            self.store
                .set_average_score(volunteer_id, average_score(&ratings))
                .await?;
        }

        tracing::info!(
            session_id = %session_id,
            rating = rating.as_str(),
            "feedback submitted"
        );
        Ok(feedback)
    }

    /// A volunteer's recent feedback and aggregate stats. Visible to the
    /// volunteer themselves and to administrators.
    pub async fn volunteer_view(
        &self,
        principal: &Principal,
        volunteer_id: Uuid,
    ) -> Result<(Vec<Feedback>, VolunteerFeedbackStats), ChatError> {
        if !principal.is_admin && principal.id != volunteer_id {
            return Err(ChatError::forbidden(
                "no access to this volunteer's feedback",
            ));
        }
        let full = self.store.volunteer_feedback(volunteer_id, None).await?;
        let ratings: Vec<Rating> = full.iter().map(|f| f.rating).collect();
        let stats = VolunteerFeedbackStats::from_ratings(&ratings);
        let recent = full.into_iter().take(HISTORY_LIMIT as usize).collect();
        Ok((recent, stats))
    }

    /// Unreviewed flagged feedback, oldest first.
    pub async fn flagged_queue(&self, limit: i64) -> Result<Vec<Feedback>, ChatError> {
        self.store.flagged_unreviewed_feedback(limit).await
    }

    pub async fn review(&self, admin: &Principal, feedback_id: Uuid) -> Result<(), ChatError> {
        if !admin.is_admin {
            return Err(ChatError::forbidden(
                "only administrators can review feedback",
            ));
        }
        if !self
            .store
            .mark_feedback_reviewed(feedback_id, admin.id, Utc::now())
            .await?
        {
            return Err(ChatError::NotFound("unreviewed feedback"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::volunteer::VOLUNTEER_ROLE;
    use crate::services::lifecycle::SessionLifecycle;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        lifecycle: SessionLifecycle,
        tracker: FeedbackTracker,
        seeker: Principal,
        volunteer: Principal,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let shared = store.clone() as Arc<dyn ChatStore>;
        Fixture {
            store,
            lifecycle: SessionLifecycle::new(shared.clone()),
            tracker: FeedbackTracker::new(shared),
            seeker: Principal {
                id: Uuid::new_v4(),
                is_admin: false,
                roles: vec![],
            },
            volunteer: Principal {
                id: Uuid::new_v4(),
                is_admin: false,
                roles: vec![VOLUNTEER_ROLE.to_string()],
            },
        }
    }

    async fn completed_session(f: &Fixture) -> Uuid {
        let session = f.lifecycle.request(&f.seeker).await.unwrap();
        f.lifecycle.claim(&f.volunteer, session.id, None).await.unwrap();
        f.lifecycle.complete(&f.seeker, session.id).await.unwrap();
        session.id
    }

    #[tokio::test]
    async fn test_feedback_requires_completed_session() {
        let f = fixture().await;
        let session = f.lifecycle.request(&f.seeker).await.unwrap();
        f.lifecycle.claim(&f.volunteer, session.id, None).await.unwrap();

        let result = f
            .tracker
            .submit(&f.seeker, session.id, Rating::Positive, None, json!({}))
            .await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_only_seeker_can_submit() {
        let f = fixture().await;
        let session_id = completed_session(&f).await;

        let result = f
            .tracker
            .submit(&f.volunteer, session_id, Rating::Positive, None, json!({}))
            .await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_submit_updates_summary_and_average() {
        let f = fixture().await;
        let session_id = completed_session(&f).await;

        let feedback = f
            .tracker
            .submit(
                &f.seeker,
                session_id,
                Rating::Positive,
                Some("very kind".to_string()),
                json!({}),
            )
            .await
            .unwrap();
        assert!(feedback.reviewed);
        assert_eq!(
            feedback.metadata.get("session_length_secs").and_then(|v| v.as_i64()),
            f.store
                .session(session_id)
                .await
                .unwrap()
                .unwrap()
                .duration_secs
        );

        let session = f.store.session(session_id).await.unwrap().unwrap();
        let summary = session.feedback.unwrap();
        assert_eq!(summary.rating, Rating::Positive);
        assert_eq!(summary.comments, "very kind");

        let profile = f
            .store
            .volunteer_profile(f.volunteer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.average_score, 1.0);
    }

    #[tokio::test]
    async fn test_resubmission_overwrites_summary() {
        let f = fixture().await;
        let session_id = completed_session(&f).await;

        f.tracker
            .submit(&f.seeker, session_id, Rating::Positive, None, json!({}))
            .await
            .unwrap();
        f.tracker
            .submit(&f.seeker, session_id, Rating::Neutral, None, json!({}))
            .await
            .unwrap();

        let session = f.store.session(session_id).await.unwrap().unwrap();
        assert_eq!(session.feedback.unwrap().rating, Rating::Neutral);
        // Both entries count toward the average: (1.0 + 0.5) / 2.
        let profile = f
            .store
            .volunteer_profile(f.volunteer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.average_score, 0.75);
    }

    #[tokio::test]
    async fn test_flagged_feedback_enters_triage_queue() {
        let f = fixture().await;
        let session_id = completed_session(&f).await;

        let feedback = f
            .tracker
            .submit(
                &f.seeker,
                session_id,
                Rating::Flagged,
                Some("volunteer was dismissive".to_string()),
                json!({}),
            )
            .await
            .unwrap();
        assert!(!feedback.reviewed);

        let queue = f.tracker.flagged_queue(10).await.unwrap();
        assert_eq!(queue.len(), 1);

        let profile = f
            .store
            .volunteer_profile(f.volunteer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.flagged_sessions, 1);
        assert_eq!(profile.average_score, 0.0);

        let reviewer = Principal {
            id: Uuid::new_v4(),
            is_admin: true,
            roles: vec![],
        };
        f.tracker.review(&reviewer, feedback.id).await.unwrap();
        assert!(f.tracker.flagged_queue(10).await.unwrap().is_empty());

        // A second review of the same entry is rejected.
        let again = f.tracker.review(&reviewer, feedback.id).await;
        assert!(matches!(again, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_volunteer_view_access_control() {
        let f = fixture().await;
        let session_id = completed_session(&f).await;
        f.tracker
            .submit(&f.seeker, session_id, Rating::Positive, None, json!({}))
            .await
            .unwrap();

        let (history, stats) = f
            .tracker
            .volunteer_view(&f.volunteer, f.volunteer.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.positive_percent, 100.0);

        let result = f.tracker.volunteer_view(&f.seeker, f.volunteer.id).await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }
}
