pub mod auth;
pub mod feedback;
pub mod message;
pub mod moderation;
pub mod session;
pub mod volunteer;
