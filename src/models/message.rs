// src/models/message.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Seeker,
    Volunteer,
    System,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Seeker => "seeker",
            SenderRole::Volunteer => "volunteer",
            SenderRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "seeker" => Some(SenderRole::Seeker),
            "volunteer" => Some(SenderRole::Volunteer),
            "system" => Some(SenderRole::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub reader_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// One utterance in a session. `created_at` is immutable; `updated_at` moves
/// only for delivery/read/flag mutations, never for body edits. `seq` is the
/// store-assigned insertion id used to break ordering ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub seq: i64,
    pub sender_id: Option<Uuid>,
    pub sender_role: SenderRole,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub read_by: Vec<ReadReceipt>,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl ChatMessage {
    pub fn new(
        session_id: Uuid,
        sender_id: Option<Uuid>,
        sender_role: SenderRole,
        body: String,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            seq: 0, // assigned by the store on insert
            sender_id,
            sender_role,
            body,
            created_at: now,
            updated_at: now,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            read_at: None,
            read_by: Vec::new(),
            flagged: false,
            flag_reason: None,
            metadata,
        }
    }

    /// Whether this is the automated welcome system-message for its session.
    pub fn is_welcome(&self) -> bool {
        self.sender_role == SenderRole::System
            && self
                .metadata
                .get("welcome_message")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
    }
}
