// Content classification for the moderation pipeline.
// Two layers: a cheap synchronous heuristic that always runs, and an
// optional remote moderation API invoked when credentials are configured.
// Classification failures never block a message (fail open).

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::moderation::ContentFlag;

lazy_static! {
    static ref THREAT_TERMS: Regex =
        Regex::new(r"(?i)\b(kill you|hurt you|come after you|make you pay)\b").unwrap();
    static ref SELF_HARM_TERMS: Regex =
        Regex::new(r"(?i)\b(kill myself|end it all|hurt myself|not worth living)\b").unwrap();
    static ref CONTACT_SOLICITATION: Regex =
        Regex::new(r"(?i)\b(venmo|cashapp|paypal\.me|onlyfans|crypto wallet)\b").unwrap();
}

/// Heuristic pre-filter. Shapes rather than vocabulary: shouting, spammy
/// repetition, solicitation, and a small set of threat/self-harm phrases
/// that must reach the review queue even when the remote classifier is down.
pub fn heuristic_flags(text: &str) -> Vec<ContentFlag> {
    let mut flags = Vec::new();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return flags;
    }

    if THREAT_TERMS.is_match(trimmed) {
        flags.push(ContentFlag {
            flag_type: "threats".to_string(),
            severity: 0.85,
        });
    }

    if SELF_HARM_TERMS.is_match(trimmed) {
        flags.push(ContentFlag {
            flag_type: "self_harm".to_string(),
            severity: 0.9,
        });
    }

    if CONTACT_SOLICITATION.is_match(trimmed) {
        flags.push(ContentFlag {
            flag_type: "spam".to_string(),
            severity: 0.6,
        });
    }

    if has_repeated_run(trimmed) {
        flags.push(ContentFlag {
            flag_type: "spam".to_string(),
            severity: 0.4,
        });
    }

    // Mostly-uppercase long messages read as shouting/spam.
    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    if trimmed.len() > 20 && !letters.is_empty() {
        let caps = letters.iter().filter(|c| c.is_uppercase()).count();
        if caps as f64 / letters.len() as f64 > 0.7 {
            flags.push(ContentFlag {
                flag_type: "spam".to_string(),
                severity: 0.35,
            });
        }
    }

    flags
}

// Equivalent of the backreference pattern `(.)\1{10,}`, which the `regex`
// crate cannot compile: any non-newline character repeated 11+ times in a row.
fn has_repeated_run(text: &str) -> bool {
    let mut prev = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= 11 && c != '\n' {
            return true;
        }
    }
    false
}

#[derive(Clone)]
pub struct ModerationClient {
    api_key: String,
    client: Client,
    base_url: String,
}

#[derive(Serialize, Debug)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize, Debug)]
struct ModerationResult {
    #[serde(default)]
    category_scores: HashMap<String, f64>,
}

impl ModerationClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        ModerationClient {
            api_key,
            client: Client::new(),
            base_url,
        }
    }

    /// Classify a message body, returning (category, severity) pairs.
    pub async fn classify(&self, text: &str) -> Result<Vec<ContentFlag>, reqwest::Error> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&ModerationRequest { input: text })
            .send()
            .await?
            .error_for_status()?
            .json::<ModerationResponse>()
            .await?;

        let flags = response
            .results
            .into_iter()
            .flat_map(|r| r.category_scores)
            .map(|(flag_type, severity)| ContentFlag {
                flag_type,
                severity: severity.clamp(0.0, 1.0),
            })
            .collect();

        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_produces_no_flags() {
        assert!(heuristic_flags("I had a rough day but the meeting helped.").is_empty());
    }

    #[test]
    fn test_repeated_character_spam() {
        let flags = heuristic_flags("aaaaaaaaaaaaaaaaaaaaaa");
        assert!(flags.iter().any(|f| f.flag_type == "spam"));
    }

    #[test]
    fn test_shouting_is_flagged_as_spam() {
        let flags = heuristic_flags("WHY WOULD YOU EVER SAY THAT TO ME RIGHT NOW");
        assert!(flags.iter().any(|f| f.flag_type == "spam"));
    }

    #[test]
    fn test_threat_language_is_high_severity() {
        let flags = heuristic_flags("if you log off I will come after you");
        let threat = flags.iter().find(|f| f.flag_type == "threats").unwrap();
        assert!(threat.severity > 0.7);
    }

    #[test]
    fn test_self_harm_language_is_highest_severity() {
        let flags = heuristic_flags("some days it feels not worth living");
        let flag = flags.iter().find(|f| f.flag_type == "self_harm").unwrap();
        assert!(flag.severity >= 0.9);
    }
}
