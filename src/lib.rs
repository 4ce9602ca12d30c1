//! im-presence-updates - keep IM presence in step with desktop session idle state.
//!
//! When the session goes idle the IM presence is set to extended away; when it
//! becomes available again the previously held presence is restored.

pub mod config;
pub mod domain;
pub mod presence;
pub mod reconciler;
pub mod session;
pub mod updater;
