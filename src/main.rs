//! im-presence-updates - Systemd user daemon syncing IM presence with session idle state.
//!
//! Watches gnome-session's presence status and sets the Telepathy presence of
//! every account to extended away while the session is idle.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use im_presence_updates::config::Config;
use im_presence_updates::presence::TelepathyAccountManager;
use im_presence_updates::session::GnomeSessionMonitor;
use im_presence_updates::updater::PresenceUpdater;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use zbus::Connection;

/// IM presence updater for GNOME sessions.
///
/// Sets IM accounts to extended away while the session is idle and restores
/// the previous presence when the session becomes available again.
#[derive(Parser, Debug)]
#[command(name = "im-presence-updates")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (don't actually change presence).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print normalized session and presence events to stdout.
    #[arg(long)]
    print_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config first: the debug toggle decides the log level.
    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_env();

    if args.dry_run {
        config.dry_run = true;
    }

    let level = if config.debug {
        "debug"
    } else {
        args.log_level.as_str()
    };
    init_logging(level)?;

    info!("im-presence-updates v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded (idle_presence={}, dry_run={})",
        config.idle_presence, config.dry_run
    );

    run_daemon(config, args.print_events).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("im_presence_updates={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Run daemon event loop.
async fn run_daemon(config: Config, print_events: bool) -> Result<()> {
    if env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none() {
        warn!("DBUS_SESSION_BUS_ADDRESS not set, falling back to the default session bus");
        warn!("If running as a systemd user service, see: dbus-update-activation-environment --systemd");
    }

    let conn = Connection::session()
        .await
        .context("Failed to connect to session DBus")?;

    let session = GnomeSessionMonitor::subscribe(&conn)
        .await
        .context("Failed to subscribe to gnome-session presence")?;
    let presence = TelepathyAccountManager::connect(&conn)
        .await
        .context("Failed to connect to Telepathy account manager")?;

    let mut updater = PresenceUpdater::enable(session, presence, &config)
        .await
        .with_print_events(print_events);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let result = updater.run(shutdown).await;
    updater.disable();

    result.context("Presence updater stopped")?;
    info!("Stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => debug!("Received SIGTERM"),
            _ = sigint.recv() => debug!("Received SIGINT"),
        }
        shutdown.cancel();
    });

    Ok(())
}
