//! Telepathy account manager presence backend.
//!
//! Tracks the current presence of every valid account over `DBus` and reports
//! the most available one, mirroring telepathy-glib's
//! `most-available-presence-changed` signal.
//!
//! Account signals are consumed by a background task that owns the account
//! cache updates, so waiting for a change can be cancelled at any point
//! without losing signals.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, StructureBuilder, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use super::{PresenceError, PresenceProvider};
use crate::domain::PresenceUpdate;

/// `DBus` service, path and interfaces for the Telepathy account manager.
const AM_SERVICE: &str = "org.freedesktop.Telepathy.AccountManager";
const AM_PATH: &str = "/org/freedesktop/Telepathy/AccountManager";
const AM_INTERFACE: &str = "org.freedesktop.Telepathy.AccountManager";
const ACCOUNT_INTERFACE: &str = "org.freedesktop.Telepathy.Account";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Namespace covering the account manager and every account object.
const TELEPATHY_NAMESPACE: &str = "/org/freedesktop/Telepathy";

/// Cached state of one valid account.
#[derive(Debug, Clone)]
struct AccountState {
    path: OwnedObjectPath,
    enabled: bool,
    current: PresenceUpdate,
}

/// Presence provider backed by the Telepathy account manager.
pub struct TelepathyAccountManager {
    conn: Connection,
    accounts: Arc<RwLock<Vec<AccountState>>>,
    changes: Option<mpsc::UnboundedReceiver<PresenceUpdate>>,
    pump: Option<JoinHandle<()>>,
}

impl TelepathyAccountManager {
    /// Subscribe to account signals, load the valid accounts and start
    /// following changes.
    pub async fn connect(conn: &Connection) -> Result<Self, PresenceError> {
        // One rule for manager and account signals keeps them in bus order.
        // Subscribe before loading so no change slips in between.
        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .path_namespace(TELEPATHY_NAMESPACE)
            .map_err(|e| PresenceError::ConnectionFailed(e.to_string()))?
            .build();
        let stream = MessageStream::for_match_rule(rule, conn, None)
            .await
            .map_err(|e| PresenceError::ConnectionFailed(e.to_string()))?;

        let paths = Vec::<OwnedObjectPath>::try_from(
            get_property(conn, AM_PATH, AM_INTERFACE, "ValidAccounts").await?,
        )
        .map_err(|e| PresenceError::Malformed(e.to_string()))?;

        let mut accounts = Vec::with_capacity(paths.len());
        for path in paths {
            match load_account(conn, path.clone()).await {
                Ok(account) => accounts.push(account),
                Err(e) => warn!("Skipping account {}: {}", path.as_str(), e),
            }
        }

        info!(
            "Connected to Telepathy account manager ({} valid accounts)",
            accounts.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = SignalPump {
            conn: conn.clone(),
            last_reported: most_available(&accounts),
            accounts: Arc::new(RwLock::new(accounts)),
            tx,
        };
        let accounts = pump.accounts.clone();
        let handle = tokio::spawn(pump.run(stream));

        Ok(Self {
            conn: conn.clone(),
            accounts,
            changes: Some(rx),
            pump: Some(handle),
        })
    }
}

#[async_trait]
impl PresenceProvider for TelepathyAccountManager {
    async fn most_available_presence(&mut self) -> Result<PresenceUpdate, PresenceError> {
        Ok(most_available(&self.accounts.read().await))
    }

    async fn next_change(&mut self) -> Result<PresenceUpdate, PresenceError> {
        let changes = self.changes.as_mut().ok_or(PresenceError::Unsubscribed)?;
        changes.recv().await.ok_or(PresenceError::Disconnected)
    }

    async fn set_all_requested_presences(
        &mut self,
        request: &PresenceUpdate,
    ) -> Result<(), PresenceError> {
        let paths: Vec<OwnedObjectPath> = self
            .accounts
            .read()
            .await
            .iter()
            .map(|a| a.path.clone())
            .collect();

        for path in paths {
            let value = StructureBuilder::new()
                .add_field(request.presence.code())
                .add_field(request.status.as_str())
                .add_field(request.message.as_str())
                .build()
                .map_err(|e| PresenceError::Malformed(e.to_string()))?;

            let proxy =
                zbus::Proxy::new(&self.conn, AM_SERVICE, path.as_str(), PROPERTIES_INTERFACE)
                    .await
                    .map_err(|e| PresenceError::CallFailed(e.to_string()))?;

            let result: zbus::Result<()> = proxy
                .call(
                    "Set",
                    &(ACCOUNT_INTERFACE, "RequestedPresence", Value::from(value)),
                )
                .await;

            match result {
                Ok(()) => trace!("Requested {} on {}", request, path.as_str()),
                // Keep going: one broken account must not block the others
                Err(e) => warn!("Failed to request presence on {}: {}", path.as_str(), e),
            }
        }

        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.changes.take().is_some() {
            debug!("Unsubscribed from account presence changes");
        }
    }
}

impl Drop for TelepathyAccountManager {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Background task applying account signals to the shared cache.
struct SignalPump {
    conn: Connection,
    accounts: Arc<RwLock<Vec<AccountState>>>,
    last_reported: PresenceUpdate,
    tx: mpsc::UnboundedSender<PresenceUpdate>,
}

impl SignalPump {
    async fn run(mut self, mut stream: MessageStream) {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Error on account signal stream: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.handle_signal(&msg).await {
                warn!("Ignoring account signal: {}", e);
                continue;
            }

            let presence = most_available(&self.accounts.read().await);
            if presence != self.last_reported {
                self.last_reported = presence.clone();
                if self.tx.send(presence).is_err() {
                    debug!("Presence change receiver dropped, stopping");
                    return;
                }
            }
        }

        warn!("Account signal stream ended");
    }

    /// Apply a signal to the account cache.
    ///
    /// All `DBus` round-trips happen before the cache is locked.
    async fn handle_signal(&mut self, msg: &Message) -> Result<(), PresenceError> {
        let (interface, member, path) = {
            let header = msg.header();
            let (Some(interface), Some(member)) = (header.interface(), header.member()) else {
                return Ok(());
            };
            (
                interface.to_string(),
                member.to_string(),
                header.path().map(ToString::to_string),
            )
        };

        match (interface.as_str(), member.as_str()) {
            (ACCOUNT_INTERFACE, "AccountPropertyChanged") => {
                let Some(path) = path else {
                    return Ok(());
                };
                let changed: HashMap<String, OwnedValue> = msg
                    .body()
                    .deserialize()
                    .map_err(|e| PresenceError::Malformed(e.to_string()))?;

                let mut accounts = self.accounts.write().await;
                let Some(account) = accounts.iter_mut().find(|a| a.path.as_str() == path) else {
                    trace!("Ignoring property change on unknown account {}", path);
                    return Ok(());
                };
                apply_properties(account, changed)?;
            }
            (AM_INTERFACE, "AccountValidityChanged") => {
                let (path, valid): (OwnedObjectPath, bool) = msg
                    .body()
                    .deserialize()
                    .map_err(|e| PresenceError::Malformed(e.to_string()))?;

                let loaded = if valid {
                    debug!("Account became valid: {}", path.as_str());
                    Some(load_account(&self.conn, path.clone()).await?)
                } else {
                    None
                };
                replace_account(&mut *self.accounts.write().await, &path, loaded);
            }
            (AM_INTERFACE, "AccountRemoved") => {
                let (path,): (OwnedObjectPath,) = msg
                    .body()
                    .deserialize()
                    .map_err(|e| PresenceError::Malformed(e.to_string()))?;
                replace_account(&mut *self.accounts.write().await, &path, None);
            }
            (interface, member) => trace!("Ignoring signal {}.{}", interface, member),
        }

        Ok(())
    }
}

/// Drop the cached state for `path`, then add `account` if given.
fn replace_account(
    accounts: &mut Vec<AccountState>,
    path: &OwnedObjectPath,
    account: Option<AccountState>,
) {
    let before = accounts.len();
    accounts.retain(|a| a.path != *path);
    if accounts.len() != before && account.is_none() {
        debug!("Account no longer valid: {}", path.as_str());
    }
    accounts.extend(account);
}

/// Pick the most available current presence among enabled accounts.
///
/// The first account wins ties. With no enabled account the result is offline.
fn most_available(accounts: &[AccountState]) -> PresenceUpdate {
    let mut best: Option<&PresenceUpdate> = None;
    for account in accounts.iter().filter(|a| a.enabled) {
        if best.is_none_or(|b| account.current.presence.availability() > b.presence.availability())
        {
            best = Some(&account.current);
        }
    }
    best.cloned().unwrap_or_else(PresenceUpdate::offline)
}

/// Update cached account state from an `AccountPropertyChanged` payload.
fn apply_properties(
    account: &mut AccountState,
    mut changed: HashMap<String, OwnedValue>,
) -> Result<(), PresenceError> {
    if let Some(value) = changed.remove("Enabled") {
        account.enabled =
            bool::try_from(value).map_err(|e| PresenceError::Malformed(e.to_string()))?;
    }
    if let Some(value) = changed.remove("CurrentPresence") {
        account.current = presence_from_value(value)?;
    }
    Ok(())
}

/// Read the state of one account.
async fn load_account(
    conn: &Connection,
    path: OwnedObjectPath,
) -> Result<AccountState, PresenceError> {
    let enabled =
        bool::try_from(get_property(conn, path.as_str(), ACCOUNT_INTERFACE, "Enabled").await?)
            .map_err(|e| PresenceError::Malformed(e.to_string()))?;
    let current = presence_from_value(
        get_property(conn, path.as_str(), ACCOUNT_INTERFACE, "CurrentPresence").await?,
    )?;

    debug!(
        "Account {}: enabled={}, presence={}",
        path.as_str(),
        enabled,
        current
    );

    Ok(AccountState {
        path,
        enabled,
        current,
    })
}

/// Decode a `(uss)` presence structure.
fn presence_from_value(value: OwnedValue) -> Result<PresenceUpdate, PresenceError> {
    let triple = <(u32, String, String)>::try_from(value)
        .map_err(|e| PresenceError::Malformed(e.to_string()))?;
    Ok(PresenceUpdate::from_wire(triple))
}

/// Get a property via `org.freedesktop.DBus.Properties`.
async fn get_property(
    conn: &Connection,
    path: &str,
    interface: &str,
    name: &str,
) -> Result<OwnedValue, PresenceError> {
    let proxy = zbus::Proxy::new(conn, AM_SERVICE, path, PROPERTIES_INTERFACE)
        .await
        .map_err(|e| PresenceError::CallFailed(e.to_string()))?;

    proxy
        .call("Get", &(interface, name))
        .await
        .map_err(|e| PresenceError::CallFailed(format!("Get {interface}.{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PresenceValue;

    fn account(path: &str, enabled: bool, presence: PresenceValue, message: &str) -> AccountState {
        AccountState {
            path: OwnedObjectPath::try_from(path).unwrap(),
            enabled,
            current: PresenceUpdate::new(presence, message),
        }
    }

    #[test]
    fn test_most_available_no_accounts_is_offline() {
        assert_eq!(most_available(&[]), PresenceUpdate::offline());
    }

    #[test]
    fn test_most_available_picks_highest() {
        let accounts = vec![
            account("/a/jabber", true, PresenceValue::Away, "lunch"),
            account("/a/irc", true, PresenceValue::Busy, "hacking"),
            account("/a/sip", true, PresenceValue::Offline, ""),
        ];
        assert_eq!(
            most_available(&accounts),
            PresenceUpdate::new(PresenceValue::Busy, "hacking")
        );
    }

    #[test]
    fn test_most_available_skips_disabled() {
        let accounts = vec![
            account("/a/jabber", false, PresenceValue::Available, ""),
            account("/a/irc", true, PresenceValue::Hidden, ""),
        ];
        assert_eq!(most_available(&accounts).presence, PresenceValue::Hidden);

        let accounts = vec![account("/a/jabber", false, PresenceValue::Available, "")];
        assert_eq!(most_available(&accounts), PresenceUpdate::offline());
    }

    #[test]
    fn test_most_available_first_wins_ties() {
        let accounts = vec![
            account("/a/jabber", true, PresenceValue::Away, "first"),
            account("/a/irc", true, PresenceValue::Away, "second"),
        ];
        assert_eq!(most_available(&accounts).message, "first");
    }

    #[test]
    fn test_replace_account() {
        let mut accounts = vec![
            account("/a/jabber", true, PresenceValue::Away, ""),
            account("/a/irc", true, PresenceValue::Busy, ""),
        ];

        let path = OwnedObjectPath::try_from("/a/jabber").unwrap();
        replace_account(&mut accounts, &path, None);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].path.as_str(), "/a/irc");

        let revived = account("/a/jabber", true, PresenceValue::Available, "");
        replace_account(&mut accounts, &path, Some(revived.clone()));
        replace_account(&mut accounts, &path, Some(revived));
        assert_eq!(accounts.len(), 2);
        assert_eq!(most_available(&accounts).presence, PresenceValue::Available);
    }

    #[test]
    fn test_apply_properties_updates_enabled() {
        let mut state = account("/a/jabber", true, PresenceValue::Available, "");
        let mut changed = HashMap::new();
        changed.insert("Enabled".to_string(), Value::from(false).try_to_owned().unwrap());

        apply_properties(&mut state, changed).unwrap();
        assert!(!state.enabled);
        assert_eq!(state.current.presence, PresenceValue::Available);
    }

    #[test]
    fn test_apply_properties_rejects_malformed_enabled() {
        let mut state = account("/a/jabber", true, PresenceValue::Available, "");
        let mut changed = HashMap::new();
        changed.insert("Enabled".to_string(), Value::from(7u32).try_to_owned().unwrap());

        assert!(matches!(
            apply_properties(&mut state, changed),
            Err(PresenceError::Malformed(_))
        ));
    }
}
