// src/models/volunteer.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role string granting access to the waiting queue and claim action.
pub const VOLUNTEER_ROLE: &str = "volunteer_listener";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolunteerStatus {
    Active,
    Suspended,
}

impl VolunteerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolunteerStatus::Active => "active",
            VolunteerStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(VolunteerStatus::Active),
            "suspended" => Some(VolunteerStatus::Suspended),
            _ => None,
        }
    }
}

/// The engine's reputation view of a volunteer. Created lazily on first
/// claim and updated by moderation, lifecycle, and feedback writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolunteerProfile {
    pub user_id: Uuid,
    pub status: VolunteerStatus,
    pub roles: Vec<String>,
    pub flagged_sessions: i64,
    pub sessions_completed: i64,
    pub average_score: f64,
    pub last_active: Option<DateTime<Utc>>,
}

impl VolunteerProfile {
    pub fn new(user_id: Uuid) -> Self {
        VolunteerProfile {
            user_id,
            status: VolunteerStatus::Active,
            roles: vec![VOLUNTEER_ROLE.to_string()],
            flagged_sessions: 0,
            sessions_completed: 0,
            average_score: 0.0,
            last_active: None,
        }
    }
}
