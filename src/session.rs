//! Session status monitoring.
//!
//! Abstracts the source of desktop session idle/available transitions so the
//! updater can be driven by GNOME's session manager or by a test double.

mod gnome;

use async_trait::async_trait;
pub use gnome::GnomeSessionMonitor;
use thiserror::Error;

use crate::domain::SessionStatus;

/// Trait for session status sources.
#[async_trait]
pub trait SessionMonitor: Send {
    /// Wait for the next session status change.
    async fn next_status(&mut self) -> Result<SessionStatus, SessionError>;

    /// Drop the status subscription. Safe to call more than once.
    fn unsubscribe(&mut self);
}

/// Errors that can occur while monitoring the session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("DBus connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to subscribe to session status: {0}")]
    SubscribeFailed(String),

    #[error("Session status stream ended")]
    Disconnected,

    #[error("Not subscribed to session status")]
    Unsubscribed,
}
