//! The connection broker.
//!
//! `Broker` is the composition root: every external collaborator is passed
//! in at construction, all state mutation funnels through the main
//! serialized queue, and the reconciliation pass keeps the set of connected
//! abilities aligned with the enabled set after every event. There is no
//! global instance; tests build one broker per scenario with fakes.

use crate::account::{AccountRegistry, AccountSession, StateFlags};
use crate::channel::Channel;
use crate::connection::{AbilityConnection, ConnectionState};
use crate::dump;
use crate::peers::PeerId;
use crate::platform::{
    AbilityClient, AbilityHost, ConnectionToken, ElementOperator, InputDispatcher,
    PackageRegistry, WindowProvider,
};
use crate::queue::SerialQueue;
use reach_config::{Config, SettingsStore};
use reach_protocol::{
    AbilityDescriptor, AccessibilityEvent, AccountId, BrokerResult, CapabilitySet, ConnectionKind,
    ElementId, ErrorKind, TreeId, WindowId,
};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

const UI_TEST_BUNDLE_NAME: &str = "uitest";
const UI_TEST_ABILITY_NAME: &str = "Driver";

/// Factory producing the settings store of one account.
pub type SettingsFactory = Box<dyn Fn(AccountId) -> Arc<dyn SettingsStore> + Send + Sync>;

/// Observer of derived accessibility-state changes.
pub type StateObserver = Box<dyn Fn(AccountId, StateFlags) + Send + Sync>;

/// External collaborators injected into the broker.
pub struct PlatformDeps {
    pub host: Arc<dyn AbilityHost>,
    pub packages: Arc<dyn PackageRegistry>,
    pub windows: Arc<dyn WindowProvider>,
    pub input: Arc<dyn InputDispatcher>,
    pub settings: SettingsFactory,
}

/// The session/connection broker.
pub struct Broker {
    weak_self: Weak<Broker>,
    config: Config,
    host: Arc<dyn AbilityHost>,
    packages: Arc<dyn PackageRegistry>,
    windows: Arc<dyn WindowProvider>,
    input: Arc<dyn InputDispatcher>,
    settings_factory: SettingsFactory,
    accounts: AccountRegistry,
    main_queue: SerialQueue,
    event_queue: SerialQueue,
    connection_counter: AtomicI32,
    state_observers: Mutex<Vec<StateObserver>>,
}

impl Broker {
    /// Builds the broker and activates the configured initial account.
    pub async fn start(config: Config, deps: PlatformDeps) -> Arc<Self> {
        let broker = Arc::new_cyclic(|weak_self| Broker {
            weak_self: weak_self.clone(),
            host: deps.host,
            packages: deps.packages,
            windows: deps.windows,
            input: deps.input,
            settings_factory: deps.settings,
            accounts: AccountRegistry::new(),
            main_queue: SerialQueue::new("main"),
            event_queue: SerialQueue::new("event"),
            connection_counter: AtomicI32::new(0),
            state_observers: Mutex::new(Vec::new()),
            config,
        });
        let initial = broker.config.broker.initial_account;
        broker.switched_user(initial).await;
        broker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    /// Registers an observer of derived state-flag changes.
    pub fn observe_state(&self, observer: StateObserver) {
        self.state_observers.lock().unwrap_or_else(|e| e.into_inner()).push(observer);
    }

    // ---- account lifecycle ----------------------------------------------

    /// Handles an account switch: drains the outgoing account's connections
    /// and brings the incoming account's enabled abilities up.
    pub async fn switched_user(&self, account_id: AccountId) {
        let descriptors = self.packages.installed_descriptors(account_id).await;
        let broker = self.strong();
        let _ = self
            .main_queue
            .call("switched_user", move || {
                broker.switch_user_sync(account_id, descriptors);
            })
            .await;
    }

    /// Creates the session for a newly added account without switching.
    pub async fn added_user(&self, account_id: AccountId) {
        let broker = self.strong();
        let _ = self
            .main_queue
            .call("added_user", move || {
                broker.session_for(account_id);
            })
            .await;
    }

    /// Tears down a removed account.
    pub async fn removed_user(&self, account_id: AccountId) {
        let broker = self.strong();
        let _ = self
            .main_queue
            .call("removed_user", move || {
                if let Some(session) = broker.accounts.get(account_id) {
                    broker.drain_session(&session);
                }
                broker.accounts.remove(account_id);
            })
            .await;
    }

    // ---- package lifecycle ----------------------------------------------

    /// Re-reads the installed descriptor list after a package was added or
    /// updated, then reconciles.
    pub async fn package_changed(&self) {
        let Some(account_id) = self.accounts.current_id() else { return };
        let descriptors = self.packages.installed_descriptors(account_id).await;
        let broker = self.strong();
        let _ = self
            .main_queue
            .call("package_changed", move || {
                broker.apply_installed(account_id, descriptors);
            })
            .await;
    }

    /// Handles a package uninstall: orphaned uris are disabled and their
    /// connections drained.
    pub async fn package_removed(&self, bundle_name: String) {
        let broker = self.strong();
        let _ = self
            .main_queue
            .call("package_removed", move || {
                let Some(session) = broker.accounts.current() else { return };
                let removed = session.abilities().remove_installed_bundle(&bundle_name);
                for uri in &removed {
                    let _ = session.abilities().remove_enabled(uri);
                }
                if !removed.is_empty() {
                    session.persist_enabled();
                }
                broker.prune_orphan_connections(&session);
                broker.reconcile(&session);
            })
            .await;
    }

    // ---- enable / disable ------------------------------------------------

    /// Enables an installed ability with the requested capability set.
    pub async fn enable_ability(
        &self,
        uri: String,
        requested: CapabilitySet,
    ) -> BrokerResult<()> {
        if uri.is_empty() {
            return Err(ErrorKind::InvalidParam);
        }
        let broker = self.strong();
        self.main_queue
            .call("enable_ability", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                let descriptor =
                    session.abilities().descriptor(&uri).ok_or(ErrorKind::NotInstalled)?;
                if (descriptor.static_capabilities & requested).is_empty() {
                    return Err(ErrorKind::NoCapability);
                }
                session.abilities().add_enabled(&uri, requested)?;
                session.persist_enabled();
                info!(account = session.account_id(), uri, requested = %requested, "ability enabled");
                broker.reconcile(&session);
                Ok(())
            })
            .await?
    }

    /// Disables an ability. A connected instance is moved to the waiting-
    /// disconnect set; a connecting instance is torn down when its connect
    /// completes.
    pub async fn disable_ability(&self, uri: String) -> BrokerResult<()> {
        let broker = self.strong();
        self.main_queue
            .call("disable_ability", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                session.abilities().remove_enabled(&uri)?;
                session.persist_enabled();
                info!(account = session.account_id(), uri, "ability disabled");
                broker.reconcile(&session);
                Ok(())
            })
            .await?
    }

    /// Connects the UI-test driver outside the installed-package flow.
    pub async fn enable_ui_test(&self, requested: CapabilitySet) -> BrokerResult<()> {
        let broker = self.strong();
        self.main_queue
            .call("enable_ui_test", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                let descriptor = AbilityDescriptor::new(UI_TEST_BUNDLE_NAME, UI_TEST_ABILITY_NAME)
                    .with_capabilities(requested);
                let uri = descriptor.uri();
                if !session.abilities().has_no_live_connection(&uri) {
                    return Err(ErrorKind::ConnectionExists);
                }
                let connection = AbilityConnection::new(
                    broker.next_connection_id(),
                    ConnectionKind::UiTest,
                    descriptor,
                    requested,
                    session.account_id(),
                )?;
                connection.set_state(ConnectionState::Connecting);
                session.abilities().add_connecting(connection.clone());
                broker.spawn_connect(&session, &connection);
                Ok(())
            })
            .await?
    }

    /// Disconnects the UI-test driver.
    pub async fn disable_ui_test(&self) -> BrokerResult<()> {
        let broker = self.strong();
        self.main_queue
            .call("disable_ui_test", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                let uri = format!("{UI_TEST_BUNDLE_NAME}/{UI_TEST_ABILITY_NAME}");
                let connection =
                    session.abilities().connected_connection(&uri).ok_or(ErrorKind::NoConnection)?;
                broker.begin_disconnect(&session, &connection);
                Ok(())
            })
            .await?
    }

    /// Runs one reconciliation pass for the current account.
    pub async fn update_abilities(&self) {
        let broker = self.strong();
        let _ = self
            .main_queue
            .call("update_abilities", move || {
                if let Some(session) = broker.accounts.current() {
                    broker.reconcile(&session);
                }
            })
            .await;
    }

    // ---- element operators -----------------------------------------------

    /// Registers the root element operator for a window.
    pub async fn register_element_operator(
        &self,
        window_id: WindowId,
        token: u32,
        operator: Arc<dyn ElementOperator>,
    ) -> BrokerResult<()> {
        let broker = self.strong();
        self.main_queue
            .call("register_element_operator", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                session.elements().register_root(window_id, token, operator)
            })
            .await?
    }

    /// Registers an operator for a child tree, returning the allocated
    /// tree id.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_child_tree(
        &self,
        parent_window_id: WindowId,
        parent_tree_id: TreeId,
        window_id: WindowId,
        operator: Arc<dyn ElementOperator>,
        node_id: ElementId,
        token: u32,
    ) -> BrokerResult<TreeId> {
        let broker = self.strong();
        self.main_queue
            .call("register_child_tree", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                session.elements().register_child(
                    parent_window_id,
                    parent_tree_id,
                    window_id,
                    operator,
                    node_id,
                    token,
                )
            })
            .await?
    }

    /// Deregisters one tree, or the whole window when `tree_id` is `None`.
    pub async fn deregister_element_operator(
        &self,
        window_id: WindowId,
        tree_id: Option<TreeId>,
    ) -> BrokerResult<()> {
        let broker = self.strong();
        self.main_queue
            .call("deregister_element_operator", move || {
                let session = broker.accounts.current().ok_or(ErrorKind::Unavailable)?;
                session.elements().deregister(window_id, tree_id)
            })
            .await?
    }

    // ---- events ----------------------------------------------------------

    /// Fans an application event out to every connected ability whose
    /// interest mask matches. Delivery happens on the event queue.
    pub fn submit_event(&self, event: AccessibilityEvent) {
        let broker = self.strong();
        self.event_queue.post("deliver_event", move || {
            let Some(session) = broker.accounts.current() else { return };
            for connection in session.abilities().connected_connections() {
                if connection.wants_event(&event) {
                    if let Some(client) = connection.client() {
                        client.on_event(&event);
                    }
                }
            }
        });
    }

    /// Transport glue entry point: a remote peer's process died.
    pub fn peer_died(&self, peer: PeerId) {
        let broker = self.strong();
        self.main_queue.post("peer_died", move || {
            for session in broker.accounts.all() {
                session.abilities().watcher().notify_died(peer);
                session.elements().watcher().notify_died(peer);
            }
        });
    }

    // ---- dump ------------------------------------------------------------

    /// Read-only text dump of every session's registries.
    pub async fn dump_text(&self) -> String {
        let broker = self.strong();
        self.main_queue
            .call("dump", move || {
                dump::render(&broker.accounts.all(), broker.accounts.current_id())
            })
            .await
            .unwrap_or_default()
    }

    // ---- internals (main-queue context) ----------------------------------

    /// Owned handle to self. Never fails while a method is executing: the
    /// caller's reference keeps the broker alive.
    fn strong(&self) -> Arc<Broker> {
        self.weak_self.upgrade().expect("broker dropped while in use")
    }

    fn next_connection_id(&self) -> i32 {
        self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn session_for(&self, account_id: AccountId) -> Arc<AccountSession> {
        let (session, _created) = self.accounts.get_or_create(account_id, || {
            let settings = (self.settings_factory)(account_id);
            AccountSession::new(account_id, settings, self.config.broker.tree_id_capacity)
        });
        session
    }

    fn switch_user_sync(
        &self,
        account_id: AccountId,
        descriptors: Vec<AbilityDescriptor>,
    ) {
        if let Some(previous) = self.accounts.current() {
            if previous.account_id() != account_id {
                info!(from = previous.account_id(), to = account_id, "switching account");
                self.drain_session(&previous);
            }
        }
        self.accounts.set_current(account_id);
        let session = self.session_for(account_id);
        session.abilities().set_installed(descriptors);
        session.load_enabled_from_settings();
        self.reconcile(&session);
    }

    fn apply_installed(
        &self,
        account_id: AccountId,
        descriptors: Vec<AbilityDescriptor>,
    ) {
        let Some(session) = self.accounts.get(account_id) else { return };
        session.abilities().set_installed(descriptors);
        self.prune_orphan_connections(&session);
        self.reconcile(&session);
    }

    /// Disables and drains connections whose descriptor disappeared.
    fn prune_orphan_connections(&self, session: &Arc<AccountSession>) {
        let mut pruned = false;
        for uri in session.abilities().enabled_uris() {
            if session.abilities().descriptor(&uri).is_none() {
                let _ = session.abilities().remove_enabled(&uri);
                pruned = true;
            }
        }
        if pruned {
            session.persist_enabled();
        }
        for connection in session.abilities().connected_connections() {
            let traits = connection.kind().traits_of();
            if traits.managed_by_reconciler
                && session.abilities().descriptor(&connection.uri()).is_none()
            {
                self.begin_disconnect(session, &connection);
            }
        }
    }

    /// Disconnects everything connected; used on account switch/removal.
    fn drain_session(&self, session: &Arc<AccountSession>) {
        for connection in session.abilities().connected_connections() {
            self.begin_disconnect(session, &connection);
        }
        session.refresh_state_flags();
    }

    /// The control loop: aligns observed connections with the enabled set.
    ///
    /// Idempotent over current registry state and callable from any event
    /// handler. A uri that is mid-connect is skipped; its enabled state is
    /// re-examined when the connect completes.
    fn reconcile(&self, session: &Arc<AccountSession>) {
        for descriptor in session.abilities().installed() {
            let uri = descriptor.uri();
            if session.abilities().is_connecting(&uri) {
                continue;
            }
            match session.abilities().requested_for(&uri) {
                Some(requested) => {
                    if session.abilities().is_connected(&uri) {
                        continue;
                    }
                    if let Some(connection) = session.abilities().unpark_to_connected(&uri) {
                        debug!(uri, "re-enable cancelled pending disconnect");
                        connection.set_state(ConnectionState::Connected);
                        continue;
                    }
                    match AbilityConnection::new(
                        self.next_connection_id(),
                        ConnectionKind::Extension,
                        descriptor,
                        requested,
                        session.account_id(),
                    ) {
                        Ok(connection) => {
                            connection.set_state(ConnectionState::Connecting);
                            session.abilities().add_connecting(connection.clone());
                            self.spawn_connect(session, &connection);
                        }
                        Err(kind) => {
                            warn!(uri, error = %kind, "cannot connect ability, disabling");
                            let _ = session.abilities().remove_enabled(&uri);
                            session.persist_enabled();
                        }
                    }
                }
                None => {
                    if let Some(connection) = session.abilities().connected_connection(&uri) {
                        self.begin_disconnect(session, &connection);
                    }
                }
            }
        }
        self.refresh_state(session);
    }

    fn spawn_connect(&self, session: &Arc<AccountSession>, connection: &Arc<AbilityConnection>) {
        let broker = self.strong();
        let session = session.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            let result = broker
                .host
                .request_connect(connection.descriptor(), connection.account_id(), connection.token())
                .await;
            let queue = broker.main_queue.clone();
            queue.post("finish_connect", move || {
                broker.finish_connect(&session, &connection, result);
            });
        });
    }

    fn finish_connect(
        &self,
        session: &Arc<AccountSession>,
        connection: &Arc<AbilityConnection>,
        result: Result<Arc<dyn AbilityClient>, ErrorKind>,
    ) {
        let uri = connection.uri();
        if connection.state() != ConnectionState::Connecting {
            // A crash or teardown beat the completion here.
            session.abilities().remove_connecting(&uri);
            return;
        }
        match result {
            Ok(client) => {
                let traits = connection.kind().traits_of();
                if traits.managed_by_reconciler && !session.abilities().is_enabled(&uri) {
                    // Disabled while the connect was in flight: let it
                    // finish, then immediately take it back down.
                    info!(uri, "connect completed for disabled ability, tearing down");
                    session.abilities().remove_connecting(&uri);
                    connection.set_state(ConnectionState::Disconnected);
                    self.spawn_host_disconnect(connection.token());
                    self.reconcile(session);
                    return;
                }

                let channel = Arc::new(Channel::new(
                    connection,
                    session,
                    self.windows.clone(),
                    self.input.clone(),
                    self.config.channel_timeout(),
                ));
                connection.attach(client.clone(), channel.clone());
                connection.set_state(ConnectionState::Connected);
                session.abilities().promote_connecting(&uri);

                let peer = client.peer().id();
                let broker = self.weak_self.clone();
                let weak_session = Arc::downgrade(session);
                let crashed = connection.clone();
                session.abilities().watcher().watch(peer, move || {
                    if let (Some(broker), Some(session)) = (broker.upgrade(), weak_session.upgrade())
                    {
                        broker.on_ability_crashed(&session, &crashed);
                    }
                });

                client.init(channel, connection.id());
                info!(uri, granted = %connection.granted(), "ability connected");
                self.refresh_state(session);
            }
            Err(kind) => {
                warn!(uri, error = %kind, "connect failed, rolling back");
                session.abilities().remove_connecting(&uri);
                if connection.kind().traits_of().managed_by_reconciler {
                    let _ = session.abilities().remove_enabled(&uri);
                    session.persist_enabled();
                }
                connection.set_state(ConnectionState::Disconnected);
                self.reconcile(session);
            }
        }
    }

    fn begin_disconnect(&self, session: &Arc<AccountSession>, connection: &Arc<AbilityConnection>) {
        if connection.state() != ConnectionState::Connected {
            return;
        }
        let uri = connection.uri();
        connection.set_state(ConnectionState::WaitingDisconnect);
        session.abilities().park_for_disconnect(&uri);
        if let Some(client) = connection.client() {
            client.disconnect(connection.id());
        }
        debug!(uri, "disconnect requested");

        let broker = self.strong();
        let session = session.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            let result = broker.host.request_disconnect(connection.token()).await;
            let queue = broker.main_queue.clone();
            queue.post("finish_disconnect", move || {
                broker.finish_disconnect(&session, &connection, result);
            });
        });
    }

    fn finish_disconnect(
        &self,
        session: &Arc<AccountSession>,
        connection: &Arc<AbilityConnection>,
        result: Result<(), ErrorKind>,
    ) {
        if let Err(kind) = result {
            warn!(uri = %connection.uri(), error = %kind, "disconnect completion reported failure");
        }
        if connection.state() != ConnectionState::WaitingDisconnect {
            // Cancelled by a re-enable (or already torn down by a crash).
            return;
        }
        let uri = connection.uri();
        if let Some(client) = connection.detach() {
            session.abilities().watcher().unwatch(client.peer().id());
        }
        session.abilities().remove_wait_disconnect(&uri);
        connection.set_state(ConnectionState::Disconnected);
        info!(uri, "ability disconnected");
        self.refresh_state(session);
    }

    /// Crash cleanup for an ability command proxy. Idempotent against a
    /// concurrent explicit disconnect: whichever runs second finds the
    /// connection already disconnected.
    fn on_ability_crashed(&self, session: &Arc<AccountSession>, connection: &Arc<AbilityConnection>) {
        if connection.state() == ConnectionState::Disconnected {
            return;
        }
        let uri = connection.uri();
        warn!(uri, "ability peer died");
        connection.detach();
        session.abilities().remove_everywhere(&uri, connection);
        connection.set_state(ConnectionState::Disconnected);
        self.refresh_state(session);
        // If the uri is still enabled, the next pass reconnects it.
        self.reconcile(session);
    }

    fn spawn_host_disconnect(&self, token: ConnectionToken) {
        let broker = self.strong();
        tokio::spawn(async move {
            if let Err(kind) = broker.host.request_disconnect(token).await {
                warn!(error = %kind, "host disconnect for abandoned connect failed");
            }
        });
    }

    fn refresh_state(&self, session: &Arc<AccountSession>) {
        if let Some(flags) = session.refresh_state_flags() {
            let observers = self.state_observers.lock().unwrap_or_else(|e| e.into_inner());
            for observer in observers.iter() {
                observer(session.account_id(), flags);
            }
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("current_account", &self.accounts.current_id())
            .finish()
    }
}
