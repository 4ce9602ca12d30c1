//! Configuration loading and defaults for im-presence-updates.

use std::env;
use std::ffi::OsStr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::PresenceValue;

/// Environment variable that turns on debug logging.
pub const DEBUG_ENV_VAR: &str = "IM_PRESENCE_UPDATES_DEBUG";

/// Main configuration for im-presence-updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Presence requested when the session goes idle (default: `extended_away`).
    pub idle_presence: PresenceValue,

    /// Seed the saved presence from the accounts at startup (default: true).
    pub seed_initial_presence: bool,

    /// Dry run mode: log presence requests instead of sending them.
    pub dry_run: bool,

    /// Log every decision at debug level.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_presence: PresenceValue::ExtendedAway,
            seed_initial_presence: true,
            dry_run: false,
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        // Try default config path
        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("im-presence-updates").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    /// Reject settings the reconciler cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.idle_presence == PresenceValue::Unknown {
            anyhow::bail!("idle_presence must name a concrete presence, not \"unknown\"");
        }
        Ok(())
    }

    /// Merge the debug toggle from the environment.
    pub fn apply_env(&mut self) {
        self.apply_debug_value(env::var_os(DEBUG_ENV_VAR).as_deref());
    }

    /// Any non-empty value of `IM_PRESENCE_UPDATES_DEBUG` enables debug logging.
    pub fn apply_debug_value(&mut self, value: Option<&OsStr>) {
        if value.is_some_and(|v| !v.is_empty()) {
            self.debug = true;
        }
    }
}
