//! Presence updater lifecycle and event loop.
//!
//! Wires a session monitor and a presence provider to the reconciler and
//! dispatches their notifications one at a time.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{PresenceUpdate, SessionStatus};
use crate::presence::{PresenceError, PresenceProvider};
use crate::reconciler::{PresenceReconciler, SessionDecision};
use crate::session::{SessionError, SessionMonitor};

/// Errors that stop the event loop.
#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Presence(#[from] PresenceError),
}

/// A notification from either source.
#[derive(Debug)]
enum Event {
    Session(SessionStatus),
    Presence(PresenceUpdate),
    Shutdown,
}

/// Owns both subscriptions and the reconciler for the lifetime of the daemon.
pub struct PresenceUpdater<S: SessionMonitor, P: PresenceProvider> {
    session: S,
    presence: P,
    reconciler: PresenceReconciler,
    dry_run: bool,
    print_events: bool,
    enabled: bool,
}

impl<S: SessionMonitor, P: PresenceProvider> PresenceUpdater<S, P> {
    /// Construct the updater from already-subscribed sources.
    ///
    /// Nothing is written to the presence provider here. When configured, the
    /// current presence is saved so the first idle transition has something
    /// to act on.
    #[tracing::instrument(name = "im_presence_updates", skip_all)]
    pub async fn enable(session: S, mut presence: P, config: &Config) -> Self {
        debug!("enabling");

        let mut reconciler = PresenceReconciler::new(config.idle_presence);

        if config.seed_initial_presence {
            match presence.most_available_presence().await {
                Ok(current) => {
                    debug!("initial presence: {}", current);
                    reconciler.on_presence_changed(&current);
                }
                Err(e) => warn!("Failed to read initial presence: {}", e),
            }
        }

        debug!("finished initialising presence updater");

        Self {
            session,
            presence,
            reconciler,
            dry_run: config.dry_run,
            print_events: false,
            enabled: true,
        }
    }

    /// Print normalized events to stdout.
    #[must_use]
    pub fn with_print_events(mut self, print_events: bool) -> Self {
        self.print_events = print_events;
        self
    }

    /// Run until `shutdown` is cancelled or a source fails.
    #[tracing::instrument(name = "im_presence_updates", skip_all)]
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), UpdaterError> {
        info!("Presence updater running");

        loop {
            let event = tokio::select! {
                biased;

                () = shutdown.cancelled() => Event::Shutdown,
                status = self.session.next_status() => Event::Session(status?),
                update = self.presence.next_change() => Event::Presence(update?),
            };

            match event {
                Event::Session(status) => self.handle_session_status(status).await,
                Event::Presence(update) => self.handle_presence_change(&update),
                Event::Shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Handle a most-available-presence change.
    pub fn handle_presence_change(&mut self, update: &PresenceUpdate) {
        if self.print_events {
            println!(
                "[PRESENCE] | presence={} status={} message={:?}",
                update.presence, update.status, update.message
            );
        }

        self.reconciler.on_presence_changed(update);
    }

    /// Handle a session status change, requesting a presence if needed.
    pub async fn handle_session_status(&mut self, status: SessionStatus) {
        if self.print_events {
            println!("[SESSION] | status={status}");
        }

        let SessionDecision::SetPresence(request) =
            self.reconciler.on_session_status_changed(status)
        else {
            return;
        };

        if self.dry_run {
            info!("[DRY RUN] Would request presence {}", request);
            return;
        }

        // Best effort: the reconciler never waits for or retries the write.
        if let Err(e) = self.presence.set_all_requested_presences(&request).await {
            warn!("Failed to request presence {}: {}", request, e);
        }
    }

    /// Unsubscribe from both sources. Safe to call more than once.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        debug!("disabling");

        self.presence.unsubscribe();
        self.session.unsubscribe();
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn reconciler(&self) -> &PresenceReconciler {
        &self.reconciler
    }
}

impl<S: SessionMonitor, P: PresenceProvider> Drop for PresenceUpdater<S, P> {
    fn drop(&mut self) {
        self.disable();
    }
}
