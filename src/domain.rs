//! Domain types for IM presence and session status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// IM presence type.
///
/// Wire codes follow Telepathy's `Connection_Presence_Type`.
/// See: <https://telepathy.freedesktop.org/spec/Connection_Interface_Simple_Presence.html>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceValue {
    Offline,
    Available,
    Away,
    ExtendedAway,
    Hidden,
    Busy,
    /// Any presence code not listed above (including unset and error).
    Unknown,
}

impl PresenceValue {
    /// Decode a `Connection_Presence_Type` code.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Offline,
            2 => Self::Available,
            3 => Self::Away,
            4 => Self::ExtendedAway,
            5 => Self::Hidden,
            6 => Self::Busy,
            _ => Self::Unknown,
        }
    }

    /// Encode as a `Connection_Presence_Type` code.
    pub fn code(self) -> u32 {
        match self {
            Self::Offline => 1,
            Self::Available => 2,
            Self::Away => 3,
            Self::ExtendedAway => 4,
            Self::Hidden => 5,
            Self::Busy => 6,
            Self::Unknown => 7,
        }
    }

    /// Protocol status token used when requesting this presence.
    pub fn status_token(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Hidden => "hidden",
            Self::Away => "away",
            Self::ExtendedAway => "xa",
            Self::Unknown => "unknown",
        }
    }

    /// Rank used to pick the most available presence across accounts.
    pub fn availability(self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Unknown => 1,
            Self::Hidden => 2,
            Self::ExtendedAway => 3,
            Self::Away => 4,
            Self::Busy => 5,
            Self::Available => 6,
        }
    }

    /// Whether the user deliberately made themselves unreachable.
    pub fn is_unreachable(self) -> bool {
        matches!(self, Self::Offline | Self::Hidden)
    }
}

impl fmt::Display for PresenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_token())
    }
}

/// A (presence, status token, message) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub presence: PresenceValue,
    pub status: String,
    pub message: String,
}

impl PresenceUpdate {
    /// Create an update with the canonical status token for `presence`.
    pub fn new(presence: PresenceValue, message: impl Into<String>) -> Self {
        Self {
            presence,
            status: presence.status_token().to_string(),
            message: message.into(),
        }
    }

    /// Decode the `(uss)` structure used on the wire.
    pub fn from_wire((code, status, message): (u32, String, String)) -> Self {
        Self {
            presence: PresenceValue::from_code(code),
            status,
            message,
        }
    }

    /// Presence reported when no account is enabled.
    pub fn offline() -> Self {
        Self::new(PresenceValue::Offline, "")
    }
}

impl fmt::Display for PresenceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {:?}]",
            self.presence.code(),
            self.status,
            self.message
        )
    }
}

/// Desktop session status.
///
/// Wire codes follow `org.gnome.SessionManager.Presence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Available,
    Idle,
    /// Invisible, busy, or any code we don't act on.
    Other(u32),
}

impl SessionStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Available,
            3 => Self::Idle,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Idle => f.write_str("idle"),
            Self::Other(code) => write!(f, "other({code})"),
        }
    }
}
