// src/models/session.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::feedback::Rating;

/// Lifecycle states of a support session. `Completed` is terminal but
/// reopenable via resume; there is no direct `Waiting` -> `Completed` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(SessionStatus::Waiting),
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// Feedback summary mirrored onto the session (last write wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub rating: Rating,
    pub comments: String,
    pub submitted_at: DateTime<Utc>,
}

/// Raw typing indicator state. Each flag carries an expiry so a client that
/// never sends "stopped typing" goes quiet on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypingState {
    pub seeker_until: Option<DateTime<Utc>>,
    pub volunteer_until: Option<DateTime<Utc>>,
}

impl TypingState {
    pub fn flags_at(&self, now: DateTime<Utc>) -> TypingFlags {
        TypingFlags {
            seeker: self.seeker_until.map(|t| t > now).unwrap_or(false),
            volunteer: self.volunteer_until.map(|t| t > now).unwrap_or(false),
        }
    }
}

/// The pair of typing booleans broadcast to stream viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypingFlags {
    pub seeker: bool,
    pub volunteer: bool,
}

/// One coordinated conversation between a seeker and (optionally) a volunteer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub seeker_id: Uuid,
    pub volunteer_id: Option<Uuid>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub message_count: i64,
    pub moderation_flags: i64,
    pub feedback: Option<FeedbackSummary>,
    #[serde(default)]
    pub typing: TypingState,
}

impl ChatSession {
    pub fn new(seeker_id: Uuid, now: DateTime<Utc>) -> Self {
        ChatSession {
            id: Uuid::new_v4(),
            seeker_id,
            volunteer_id: None,
            status: SessionStatus::Waiting,
            created_at: now,
            last_activity: now,
            ended_at: None,
            duration_secs: None,
            message_count: 0,
            moderation_flags: 0,
            feedback: None,
            typing: TypingState::default(),
        }
    }

    pub fn is_seeker(&self, user_id: Uuid) -> bool {
        self.seeker_id == user_id
    }

    pub fn is_assigned_volunteer(&self, user_id: Uuid) -> bool {
        self.volunteer_id == Some(user_id)
    }
}
