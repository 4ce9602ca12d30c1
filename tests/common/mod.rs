//! Private session bus with fake gnome-session and Telepathy services.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbus_launch::{Daemon, Launcher};
use zbus::zvariant::{DynamicType, ObjectPath, OwnedObjectPath, Value};
use zbus::{Connection, connection, interface};

pub const AM_SERVICE: &str = "org.freedesktop.Telepathy.AccountManager";
pub const AM_PATH: &str = "/org/freedesktop/Telepathy/AccountManager";
pub const AM_INTERFACE: &str = "org.freedesktop.Telepathy.AccountManager";
pub const ACCOUNT_INTERFACE: &str = "org.freedesktop.Telepathy.Account";

pub const SESSION_SERVICE: &str = "org.gnome.SessionManager";
pub const PRESENCE_PATH: &str = "/org/gnome/SessionManager/Presence";
pub const PRESENCE_INTERFACE: &str = "org.gnome.SessionManager.Presence";

/// Upper bound for anything that is expected to arrive.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Wire form of a Telepathy presence: (type, status, message).
pub type Presence = (u32, String, String);

pub fn presence(code: u32, status: &str, message: &str) -> Presence {
    (code, status.to_string(), message.to_string())
}

pub fn account_path(name: &str) -> String {
    format!("/org/freedesktop/Telepathy/Account/gabble/jabber/{name}")
}

/// A dbus-daemon that lives as long as this value.
pub struct PrivateBus {
    daemon: Daemon,
}

impl PrivateBus {
    pub fn launch() -> Self {
        let daemon = Launcher::daemon()
            .launch()
            .expect("failed to launch dbus-daemon");
        Self { daemon }
    }

    pub async fn connect(&self) -> Connection {
        connection::Builder::address(self.daemon.address())
            .unwrap()
            .build()
            .await
            .unwrap()
    }

    pub async fn connect_as(&self, name: &'static str) -> Connection {
        connection::Builder::address(self.daemon.address())
            .unwrap()
            .name(name)
            .unwrap()
            .build()
            .await
            .unwrap()
    }
}

/// Emit a signal from `conn` without going through an interface.
pub async fn emit<B>(conn: &Connection, path: &str, interface: &str, member: &str, body: &B)
where
    B: serde::Serialize + DynamicType,
{
    conn.emit_signal(None::<&str>, path, interface, member, body)
        .await
        .unwrap();
}

struct FakeAccountManager {
    valid: Vec<OwnedObjectPath>,
}

#[interface(name = "org.freedesktop.Telepathy.AccountManager")]
impl FakeAccountManager {
    #[zbus(property)]
    fn valid_accounts(&self) -> Vec<OwnedObjectPath> {
        self.valid.clone()
    }
}

struct FakeAccount {
    name: String,
    enabled: bool,
    enabled_delay: Duration,
    current: Presence,
    requested: Arc<Mutex<Vec<(String, Presence)>>>,
}

#[interface(name = "org.freedesktop.Telepathy.Account")]
impl FakeAccount {
    #[zbus(property)]
    async fn enabled(&self) -> bool {
        if !self.enabled_delay.is_zero() {
            tokio::time::sleep(self.enabled_delay).await;
        }
        self.enabled
    }

    #[zbus(property)]
    fn current_presence(&self) -> Presence {
        self.current.clone()
    }

    #[zbus(property)]
    fn requested_presence(&self) -> Presence {
        self.current.clone()
    }

    #[zbus(property)]
    fn set_requested_presence(&mut self, value: Presence) {
        self.requested
            .lock()
            .unwrap()
            .push((self.name.clone(), value));
    }
}

/// One account object served by [`FakeTelepathy`].
pub struct AccountSpec {
    pub name: &'static str,
    pub enabled: bool,
    pub valid: bool,
    pub enabled_delay: Duration,
    pub current: Presence,
}

impl AccountSpec {
    pub fn new(name: &'static str, current: Presence) -> Self {
        Self {
            name,
            enabled: true,
            valid: true,
            enabled_delay: Duration::ZERO,
            current,
        }
    }

    #[must_use]
    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    #[must_use]
    pub fn slow_enabled(mut self, delay: Duration) -> Self {
        self.enabled_delay = delay;
        self
    }
}

/// Account manager and account objects owning the Telepathy bus name.
pub struct FakeTelepathy {
    pub conn: Connection,
    requested: Arc<Mutex<Vec<(String, Presence)>>>,
}

impl FakeTelepathy {
    pub async fn serve(bus: &PrivateBus, accounts: Vec<AccountSpec>) -> Self {
        let requested = Arc::new(Mutex::new(Vec::new()));
        let conn = bus.connect_as(AM_SERVICE).await;
        let server = conn.object_server();

        let valid: Vec<OwnedObjectPath> = accounts
            .iter()
            .filter(|a| a.valid)
            .map(|a| OwnedObjectPath::try_from(account_path(a.name)).unwrap())
            .collect();
        server.at(AM_PATH, FakeAccountManager { valid }).await.unwrap();

        for spec in accounts {
            let account = FakeAccount {
                name: spec.name.to_string(),
                enabled: spec.enabled,
                enabled_delay: spec.enabled_delay,
                current: spec.current,
                requested: requested.clone(),
            };
            server
                .at(account_path(spec.name).as_str(), account)
                .await
                .unwrap();
        }

        Self { conn, requested }
    }

    /// Writes received so far, as (account name, presence).
    pub fn requested(&self) -> Vec<(String, Presence)> {
        self.requested.lock().unwrap().clone()
    }

    /// Take an account object off the bus so calls on it fail.
    pub async fn unpublish(&self, name: &str) {
        self.conn
            .object_server()
            .remove::<FakeAccount, _>(account_path(name).as_str())
            .await
            .unwrap();
    }

    pub async fn property_changed(&self, name: &str, property: &str, value: Value<'_>) {
        let changed = HashMap::from([(property, value)]);
        emit(
            &self.conn,
            &account_path(name),
            ACCOUNT_INTERFACE,
            "AccountPropertyChanged",
            &changed,
        )
        .await;
    }

    pub async fn validity_changed(&self, name: &str, valid: bool) {
        let path = ObjectPath::try_from(account_path(name)).unwrap();
        emit(
            &self.conn,
            AM_PATH,
            AM_INTERFACE,
            "AccountValidityChanged",
            &(path, valid),
        )
        .await;
    }

    pub async fn removed(&self, name: &str) {
        let path = ObjectPath::try_from(account_path(name)).unwrap();
        emit(&self.conn, AM_PATH, AM_INTERFACE, "AccountRemoved", &(path,)).await;
    }
}
