//! IM presence providers.
//!
//! A provider reports the most available presence across all accounts and
//! accepts a single request that applies a presence to every account.

mod telepathy;

use async_trait::async_trait;
use thiserror::Error;
pub use telepathy::TelepathyAccountManager;

use crate::domain::PresenceUpdate;

/// Trait for presence providers.
#[async_trait]
pub trait PresenceProvider: Send {
    /// Current most available presence.
    async fn most_available_presence(&mut self) -> Result<PresenceUpdate, PresenceError>;

    /// Wait for the most available presence to change.
    async fn next_change(&mut self) -> Result<PresenceUpdate, PresenceError>;

    /// Request a presence on all valid accounts.
    async fn set_all_requested_presences(
        &mut self,
        request: &PresenceUpdate,
    ) -> Result<(), PresenceError>;

    /// Drop the change subscription. Safe to call more than once.
    fn unsubscribe(&mut self);
}

/// Errors that can occur talking to the presence provider.
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("DBus connection failed: {0}")]
    ConnectionFailed(String),

    #[error("DBus call failed: {0}")]
    CallFailed(String),

    #[error("Malformed presence payload: {0}")]
    Malformed(String),

    #[error("Presence change stream ended")]
    Disconnected,

    #[error("Not subscribed to presence changes")]
    Unsubscribed,
}
