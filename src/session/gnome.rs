//! GNOME session manager presence backend.
//!
//! Listens for `StatusChanged` on `org.gnome.SessionManager.Presence`.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info, trace, warn};
use zbus::Connection;
use zbus::proxy::SignalStream;

use super::{SessionError, SessionMonitor};
use crate::domain::SessionStatus;

/// `DBus` service, path and interface for GNOME session presence.
const SESSION_SERVICE: &str = "org.gnome.SessionManager";
const PRESENCE_PATH: &str = "/org/gnome/SessionManager/Presence";
const PRESENCE_INTERFACE: &str = "org.gnome.SessionManager.Presence";

/// Session monitor backed by gnome-session.
pub struct GnomeSessionMonitor {
    stream: Option<SignalStream<'static>>,
}

impl GnomeSessionMonitor {
    /// Subscribe to session status changes on the given connection.
    pub async fn subscribe(conn: &Connection) -> Result<Self, SessionError> {
        let proxy = zbus::Proxy::new(conn, SESSION_SERVICE, PRESENCE_PATH, PRESENCE_INTERFACE)
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let stream = proxy
            .receive_signal("StatusChanged")
            .await
            .map_err(|e| SessionError::SubscribeFailed(e.to_string()))?;

        info!("Subscribed to {} StatusChanged", PRESENCE_INTERFACE);

        Ok(Self {
            stream: Some(stream),
        })
    }
}

#[async_trait]
impl SessionMonitor for GnomeSessionMonitor {
    async fn next_status(&mut self) -> Result<SessionStatus, SessionError> {
        let stream = self.stream.as_mut().ok_or(SessionError::Unsubscribed)?;

        loop {
            let Some(msg) = stream.next().await else {
                warn!("Session status stream ended");
                return Err(SessionError::Disconnected);
            };

            match msg.body().deserialize::<(u32,)>() {
                Ok((code,)) => {
                    trace!("StatusChanged({})", code);
                    return Ok(SessionStatus::from_code(code));
                }
                Err(e) => {
                    // Tolerate malformed payloads
                    warn!("Ignoring malformed StatusChanged signal: {}", e);
                }
            }
        }
    }

    fn unsubscribe(&mut self) {
        if self.stream.take().is_some() {
            debug!("Unsubscribed from session status");
        }
    }
}
