// src/models/feedback.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Neutral,
    Flagged,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Positive => "positive",
            Rating::Neutral => "neutral",
            Rating::Flagged => "flagged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Rating::Positive),
            "neutral" => Some(Rating::Neutral),
            "flagged" => Some(Rating::Flagged),
            _ => None,
        }
    }

    /// Weight used for the volunteer's rolling average score.
    pub fn weight(&self) -> f64 {
        match self {
            Rating::Positive => 1.0,
            Rating::Neutral => 0.5,
            Rating::Flagged => 0.0,
        }
    }
}

/// One post-session rating. Immutable after creation except for the
/// `reviewed` transition (flagged feedback starts unreviewed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub session_id: Uuid,
    pub seeker_id: Uuid,
    pub volunteer_id: Option<Uuid>,
    pub rating: Rating,
    pub comments: String,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
}

/// Aggregate rating counts and percentages for one volunteer.
#[derive(Debug, Clone, Serialize)]
pub struct VolunteerFeedbackStats {
    pub positive: i64,
    pub neutral: i64,
    pub flagged: i64,
    pub total: i64,
    pub positive_percent: f64,
    pub neutral_percent: f64,
    pub flagged_percent: f64,
    pub average_score: f64,
}

impl VolunteerFeedbackStats {
    pub fn from_ratings(ratings: &[Rating]) -> Self {
        let positive = ratings.iter().filter(|r| **r == Rating::Positive).count() as i64;
        let neutral = ratings.iter().filter(|r| **r == Rating::Neutral).count() as i64;
        let flagged = ratings.iter().filter(|r| **r == Rating::Flagged).count() as i64;
        let total = ratings.len() as i64;

        let pct = |n: i64| {
            if total > 0 {
                (n as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        };

        VolunteerFeedbackStats {
            positive,
            neutral,
            flagged,
            total,
            positive_percent: pct(positive),
            neutral_percent: pct(neutral),
            flagged_percent: pct(flagged),
            average_score: average_score(ratings),
        }
    }
}

/// Weighted average over a volunteer's full feedback history:
/// (count(positive) + 0.5 * count(neutral)) / total.
pub fn average_score(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let total: f64 = ratings.iter().map(Rating::weight).sum();
    total / ratings.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_score_weights() {
        let ratings = vec![Rating::Positive, Rating::Positive, Rating::Neutral, Rating::Flagged];
        assert_eq!(average_score(&ratings), 0.625);
    }

    #[test]
    fn test_average_score_empty_history() {
        assert_eq!(average_score(&[]), 0.0);
    }

    #[test]
    fn test_stats_percentages() {
        let ratings = vec![
            Rating::Positive,
            Rating::Positive,
            Rating::Neutral,
            Rating::Flagged,
        ];
        let stats = VolunteerFeedbackStats::from_ratings(&ratings);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.positive, 2);
        assert_eq!(stats.positive_percent, 50.0);
        assert_eq!(stats.neutral_percent, 25.0);
        assert_eq!(stats.flagged_percent, 25.0);
        assert_eq!(stats.average_score, 0.625);
    }
}
