//! Presence reconciliation state machine.
//!
//! Couples session idle state to IM presence:
//! - Session goes idle: force an away-like presence, unless the user is offline/hidden
//! - Session becomes available: restore the presence held before idling
//! - Presence changes we caused ourselves are recognized as echoes and never saved

use tracing::debug;

use crate::domain::{PresenceUpdate, PresenceValue, SessionStatus};

/// Outcome of a presence-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// Echo of our own most recent request, ignored.
    Echo,
    /// External change, saved for later restore.
    Saved,
}

/// Outcome of a session status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDecision {
    /// Request this presence across all accounts.
    SetPresence(PresenceUpdate),
    /// Nothing to do.
    Ignore,
}

/// Presence reconciler state.
#[derive(Debug)]
pub struct PresenceReconciler {
    /// Last externally-caused presence.
    saved_presence: Option<PresenceValue>,

    /// Message accompanying `saved_presence`.
    saved_message: Option<String>,

    /// Presence we most recently requested. Overwritten, never queued.
    expected_presence: Option<PresenceValue>,

    /// Presence applied when the session goes idle.
    idle_presence: PresenceValue,
}

impl PresenceReconciler {
    /// Create a reconciler with nothing saved yet.
    pub fn new(idle_presence: PresenceValue) -> Self {
        Self {
            saved_presence: None,
            saved_message: None,
            expected_presence: None,
            idle_presence,
        }
    }

    /// Handle a most-available-presence change.
    pub fn on_presence_changed(&mut self, update: &PresenceUpdate) -> PresenceChange {
        debug!("IM status changed: {}", update);

        if Some(update.presence) == self.expected_presence {
            debug!("... expected this presence update, ignoring it");
            return PresenceChange::Echo;
        }

        debug!("saving new presence for when session goes to idle");
        self.saved_presence = Some(update.presence);
        self.saved_message = Some(update.message.clone());
        PresenceChange::Saved
    }

    /// Handle a session status change.
    ///
    /// Returns the presence to request, if any. The returned presence is
    /// recorded as expected so that its echo is not saved.
    pub fn on_session_status_changed(&mut self, status: SessionStatus) -> SessionDecision {
        debug!("session status changed: {}", status);

        let (new_presence, message) = match status {
            SessionStatus::Available => (self.saved_presence, self.saved_message.clone()),
            SessionStatus::Idle => match self.saved_presence {
                Some(saved) if !saved.is_unreachable() => {
                    (Some(self.idle_presence), self.saved_message.clone())
                }
                Some(saved) => {
                    debug!("presence is {}, not overriding it while idle", saved);
                    return SessionDecision::Ignore;
                }
                None => {
                    debug!("no presence saved yet, not doing anything");
                    return SessionDecision::Ignore;
                }
            },
            SessionStatus::Other(_) => return SessionDecision::Ignore,
        };

        let Some(new_presence) = new_presence else {
            debug!("nothing to restore yet, not doing anything");
            return SessionDecision::Ignore;
        };

        let request = PresenceUpdate::new(new_presence, message.unwrap_or_default());
        debug!("setting IM presence: {}", request);

        self.expected_presence = Some(new_presence);
        SessionDecision::SetPresence(request)
    }

    pub fn saved_presence(&self) -> Option<PresenceValue> {
        self.saved_presence
    }

    pub fn saved_message(&self) -> Option<&str> {
        self.saved_message.as_deref()
    }

    pub fn expected_presence(&self) -> Option<PresenceValue> {
        self.expected_presence
    }
}

impl Default for PresenceReconciler {
    fn default() -> Self {
        Self::new(PresenceValue::ExtendedAway)
    }
}
