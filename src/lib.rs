// src/lib.rs
//! Coordination engine for anonymous peer-support chat: session lifecycle
//! with atomic volunteer claims, an ordered message log, polling-based event
//! streams, a moderation pipeline, and post-session feedback tracking.

pub mod classifier;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use classifier::ModerationClient;
use services::events::{EventDistributor, POLL_INTERVAL_MS};
use services::feedback::FeedbackTracker;
use services::lifecycle::SessionLifecycle;
use services::messages::MessageLog;
use services::moderation::ModerationPipeline;
use store::ChatStore;

/// Shared application state: one store handle and the services wired over it.
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub lifecycle: SessionLifecycle,
    pub messages: MessageLog,
    pub moderation: ModerationPipeline,
    pub feedback: FeedbackTracker,
    pub events: EventDistributor,
    pub welcome_message: Option<String>,
    pub backend: &'static str,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        classifier: Option<ModerationClient>,
        welcome_message: Option<String>,
        poll_interval: Option<Duration>,
        backend: &'static str,
    ) -> Self {
        let lifecycle = SessionLifecycle::new(store.clone());
        let messages = MessageLog::new(store.clone());
        let moderation = ModerationPipeline::new(store.clone(), classifier, lifecycle.clone());
        let feedback = FeedbackTracker::new(store.clone());
        let events = EventDistributor::new(
            store.clone(),
            poll_interval.unwrap_or(Duration::from_millis(POLL_INTERVAL_MS)),
        );

        AppState {
            store,
            lifecycle,
            messages,
            moderation,
            feedback,
            events,
            welcome_message,
            backend,
        }
    }
}
