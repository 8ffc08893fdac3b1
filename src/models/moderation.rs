// src/models/moderation.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    SeekerToVolunteer,
    VolunteerToSeeker,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::SeekerToVolunteer => "seeker_to_volunteer",
            MessageDirection::VolunteerToSeeker => "volunteer_to_seeker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "seeker_to_volunteer" => Some(MessageDirection::SeekerToVolunteer),
            "volunteer_to_seeker" => Some(MessageDirection::VolunteerToSeeker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    Classifier,
    UserReport,
    Admin,
}

impl FlagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagSource::Classifier => "classifier",
            FlagSource::UserReport => "user_report",
            FlagSource::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classifier" => Some(FlagSource::Classifier),
            "user_report" => Some(FlagSource::UserReport),
            "admin" => Some(FlagSource::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Warning,
    SessionEnded,
    VolunteerSuspended,
    FalsePositive,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Warning => "warning",
            Resolution::SessionEnded => "session_ended",
            Resolution::VolunteerSuspended => "volunteer_suspended",
            Resolution::FalsePositive => "false_positive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(Resolution::Warning),
            "session_ended" => Some(Resolution::SessionEnded),
            "volunteer_suspended" => Some(Resolution::VolunteerSuspended),
            "false_positive" => Some(Resolution::FalsePositive),
            _ => None,
        }
    }
}

/// A (category, severity) pair produced by content classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFlag {
    pub flag_type: String,
    pub severity: f64,
}

/// One recorded content-safety flag. Mutated exactly once, by resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message_id: Option<Uuid>,
    pub seeker_id: Option<Uuid>,
    pub volunteer_id: Option<Uuid>,
    pub message_text: String,
    pub direction: MessageDirection,
    pub flag_type: String,
    pub severity: f64,
    pub source: FlagSource,
    pub created_at: DateTime<Utc>,
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub resolution: Option<Resolution>,
    pub resolution_notes: Option<String>,
}

/// Record of a cascading side effect that failed after its primary write
/// succeeded. Surfaced to administrators instead of silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub action: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event_id: Uuid, action: &str, detail: String, now: DateTime<Utc>) -> Self {
        AuditEntry {
            id: Uuid::new_v4(),
            event_id,
            action: action.to_string(),
            detail,
            created_at: now,
        }
    }
}
