// ── Thing factory ──
//
// Owns the active account session. Sequences authenticate → load
// directory → connect bus, hands out bound Consumed Things, routes
// inbound bus messages, and re-authenticates when the bus drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use hubsync_api::directory::DEFAULT_MAX_PAGES;
use hubsync_api::topics::{self, TOPIC_TYPE_EVENT, TOPIC_TYPE_TD};
use hubsync_api::{
    AuthClient, BusConnectParams, BusListener, BusMessage, DirectoryClient, MessageBus,
    PropertyValue, QoS, SessionTokens, ThingDescription, TransportConfig,
};
use secrecy::SecretString;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::binding::MqttBinding;
use crate::config::Account;
use crate::error::CoreError;
use crate::status::{ConnectionStatus, FactoryState};
use crate::store::ThingStore;
use crate::thing::{ConsumedThing, PropertyReader};

/// Called when a token refresh fails and a password login is needed.
pub type AuthFailedHandler = Arc<dyn Fn(&Account, &CoreError) + Send + Sync>;

/// Called whenever the bus connects (`true`) or drops (`false`).
pub type ConnectionHandler = Arc<dyn Fn(&Account, bool) + Send + Sync>;

// ── Options ─────────────────────────────────────────────────────────

/// Tuning shared by every session the factory opens.
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    /// Token cache shared with other factories in the process.
    pub session_tokens: SessionTokens,
    /// Page ceiling for one directory listing.
    pub max_pages: usize,
    /// HTTP transport for auth and directory. `None` derives it from the
    /// account.
    pub transport: Option<TransportConfig>,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            session_tokens: SessionTokens::new(),
            max_pages: DEFAULT_MAX_PAGES,
            transport: None,
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Clients bound to one `connect` call.
struct Session {
    generation: u64,
    account: Account,
    auth: AuthClient,
    directory: DirectoryClient,
}

// ── ThingFactory ────────────────────────────────────────────────────

/// Entry point for consumers. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct ThingFactory {
    inner: Arc<FactoryInner>,
}

struct FactoryInner {
    bus: Arc<dyn MessageBus>,
    options: FactoryOptions,
    listener: Arc<dyn BusListener>,
    /// Bumped by every connect/disconnect; results tagged with an older
    /// value are discarded.
    generation: AtomicU64,
    session: ArcSwapOption<Session>,
    store: ArcSwap<ThingStore>,
    things: DashMap<String, Arc<ConsumedThing>>,
    bindings: DashMap<String, Arc<MqttBinding>>,
    status: watch::Sender<ConnectionStatus>,
    on_auth_failed: RwLock<Option<AuthFailedHandler>>,
    on_connection_change: RwLock<Option<ConnectionHandler>>,
}

impl ThingFactory {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_options(bus, FactoryOptions::default())
    }

    pub fn with_options(bus: Arc<dyn MessageBus>, options: FactoryOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let inner = Arc::new_cyclic(|weak: &Weak<FactoryInner>| FactoryInner {
            bus,
            options,
            listener: Arc::new(FactoryListener {
                inner: weak.clone(),
            }),
            generation: AtomicU64::new(0),
            session: ArcSwapOption::empty(),
            store: ArcSwap::from_pointee(ThingStore::new()),
            things: DashMap::new(),
            bindings: DashMap::new(),
            status,
            on_auth_failed: RwLock::new(None),
            on_connection_change: RwLock::new(None),
        });
        Self { inner }
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Connect to an account, replacing any current session.
    ///
    /// Runs authenticate → load directory → connect bus in sequence. A
    /// failed directory load is recorded in the status and the bus is
    /// connected anyway; authentication and bus failures fail the call.
    pub async fn connect(
        &self,
        account: Account,
        password: Option<&SecretString>,
    ) -> Result<(), CoreError> {
        self.disconnect();
        info!(account_id = %account.id, address = %account.address, "connecting account");

        let session = self.open_session(account)?;
        let generation = session.generation;
        self.inner.store.store(Arc::new(ThingStore::new()));
        self.inner.session.store(Some(Arc::clone(&session)));
        self.update_status(|s| {
            *s = ConnectionStatus {
                state: FactoryState::Authenticating,
                account_id: Some(session.account.id.clone()),
                status_message: String::new(),
                ..ConnectionStatus::default()
            };
        });

        self.authenticate(password).await?;

        self.set_state(generation, FactoryState::DirectoryLoading)?;
        let directory_message = self.load_directory(&session).await?;

        self.set_state(generation, FactoryState::BusConnecting)?;
        let account = &session.account;
        self.inner.bus.subscribe(
            &topics::td_topic(account.topic_prefix.as_deref(), "+"),
            QoS::AtLeastOnce,
            None,
        );
        let access_token = session
            .auth
            .access_token()
            .ok_or_else(|| CoreError::Unauthorized {
                status: 401,
                message: "no access token".into(),
            })?;
        let params = BusConnectParams {
            account_id: account.id.clone(),
            address: account.address.clone(),
            port: account.bus_port,
            login_id: account.login_name.clone(),
            access_token,
            transport: account.bus_transport,
        };

        let result = self
            .inner
            .bus
            .connect(params, Arc::downgrade(&self.inner.listener))
            .await;
        if !self.is_current(generation) {
            debug!(generation, "discarding stale bus connect result");
            return Err(CoreError::SessionSuperseded);
        }

        match result {
            Ok(()) => {
                self.update_status(|s| {
                    s.connected = true;
                    s.state = FactoryState::Connected;
                    s.status_message = format!("{directory_message} and connected to the message bus.");
                });
                info!(account_id = %account.id, "connected");
                Ok(())
            }
            Err(e) => {
                self.update_status(|s| {
                    s.connected = false;
                    s.state = FactoryState::Disconnected;
                    s.status_message =
                        format!("{directory_message} Failed connecting to the message bus: {e}");
                });
                warn!(account_id = %account.id, error = %e, "message bus connection failed");
                Err(e.into())
            }
        }
    }

    /// Log in with `password`, or refresh the held token when `None`.
    ///
    /// A failed refresh invokes the auth-failed handler so the caller can
    /// ask for a password. Requires a prior [`connect`](Self::connect).
    pub async fn authenticate(&self, password: Option<&SecretString>) -> Result<(), CoreError> {
        let session = self.session().ok_or(CoreError::NoAccount)?;
        let generation = session.generation;
        self.update_status(|s| {
            s.state = FactoryState::Authenticating;
            s.auth_status_message = "Authenticating...".into();
        });

        let result = match password {
            Some(password) => {
                session
                    .auth
                    .login(
                        &session.account.login_name,
                        password,
                        session.account.remember_me,
                    )
                    .await
            }
            None => session.auth.refresh().await,
        };
        if !self.is_current(generation) {
            debug!(generation, "discarding stale authentication result");
            return Err(CoreError::SessionSuperseded);
        }

        match result {
            Ok(_) => {
                self.update_status(|s| {
                    s.authenticated = true;
                    s.auth_status_message = "Authenticated".into();
                    s.state = if s.connected {
                        FactoryState::Connected
                    } else {
                        FactoryState::Disconnected
                    };
                });
                info!(account_id = %session.account.id, "authenticated");
                Ok(())
            }
            Err(e) => {
                let err = CoreError::from(e);
                let message = if password.is_some() {
                    format!("Login failed: {err}")
                } else {
                    format!("Auth refresh failed: {err}")
                };
                warn!(account_id = %session.account.id, error = %err, "authentication failed");
                self.update_status(|s| {
                    s.authenticated = false;
                    s.auth_status_message = message;
                    s.state = FactoryState::AuthFailed;
                });
                if password.is_none() {
                    if let Some(handler) = self.auth_failed_handler() {
                        handler(&session.account, &err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Tear down the bus session and drop every Consumed Thing and
    /// binding. The Thing store stays readable until the next connect.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.bus.disconnect();

        let previous = self.inner.session.swap(None);
        let prefix = previous
            .as_ref()
            .and_then(|s| s.account.topic_prefix.clone());
        for binding in self.inner.bindings.iter() {
            self.inner
                .bus
                .unsubscribe(&topics::event_topic(prefix.as_deref(), binding.key()));
        }
        if previous.is_some() {
            self.inner
                .bus
                .unsubscribe(&topics::td_topic(prefix.as_deref(), "+"));
            debug!("disconnected account");
        }
        self.inner.bindings.clear();
        self.inner.things.clear();

        self.update_status(|s| {
            s.connected = false;
            if s.state != FactoryState::Idle {
                s.state = FactoryState::Disconnected;
            }
        });
    }

    // ── Consumed Things ─────────────────────────────────────────────

    /// Get the Consumed Thing for a TD, creating and binding it on first
    /// use.
    ///
    /// A new Thing starts a background property read that re-authenticates
    /// and retries once on failure. An existing Thing whose properties
    /// never loaded gets another read.
    pub fn consume(&self, td: Arc<ThingDescription>) -> Arc<ConsumedThing> {
        let thing = match self.inner.things.entry(td.id.clone()) {
            Entry::Occupied(existing) => {
                let thing = Arc::clone(existing.get());
                drop(existing);
                if !thing.has_properties() {
                    self.spawn_property_read(&thing, false);
                }
                return thing;
            }
            Entry::Vacant(slot) => Arc::clone(slot.insert(Arc::new(ConsumedThing::new(td))).value()),
        };

        thing.set_property_reader(Arc::new(DirectoryReader {
            inner: Arc::downgrade(&self.inner),
        }));
        let prefix = self.session().and_then(|s| s.account.topic_prefix.clone());
        let binding = MqttBinding::new(&thing, Arc::clone(&self.inner.bus), prefix);
        binding.bind();
        self.inner
            .bindings
            .insert(thing.id().to_owned(), binding);
        debug!(thing_id = %thing.id(), "consumed thing");

        self.spawn_property_read(&thing, true);
        thing
    }

    /// [`consume`](Self::consume) by id. `None` if the store has no TD.
    pub fn consume_with_id(&self, thing_id: &str) -> Option<Arc<ConsumedThing>> {
        let td = self.thing_store().get(thing_id)?;
        Some(self.consume(td))
    }

    /// An already consumed Thing, without creating one.
    pub fn consumed(&self, thing_id: &str) -> Option<Arc<ConsumedThing>> {
        self.inner.things.get(thing_id).map(|t| Arc::clone(t.value()))
    }

    // ── Inbound messages ────────────────────────────────────────────

    /// Route one bus message by topic: `td` updates go to the store,
    /// `event` messages to the Thing's binding. Messages for Things that
    /// were never consumed are dropped.
    pub fn handle_bus_message(&self, msg: &BusMessage) {
        let (thing_id, topic_type, _) = topics::split_topic(&msg.topic);
        match topic_type.as_str() {
            TOPIC_TYPE_TD => self.handle_td_message(&thing_id, msg),
            TOPIC_TYPE_EVENT => {
                let binding = self.inner.bindings.get(&thing_id).map(|b| Arc::clone(b.value()));
                match binding {
                    Some(binding) => {
                        if let Err(e) = binding.handle_message(msg) {
                            warn!(thing_id = %thing_id, topic = %msg.topic, error = %e, "event message rejected");
                        }
                    }
                    None => debug!(thing_id = %thing_id, topic = %msg.topic, "no consumed thing, message dropped"),
                }
            }
            other => warn!(topic = %msg.topic, topic_type = other, "unexpected topic type"),
        }
    }

    fn handle_td_message(&self, thing_id: &str, msg: &BusMessage) {
        let mut td: ThingDescription = match serde_json::from_slice(&msg.payload) {
            Ok(td) => td,
            Err(e) => {
                warn!(thing_id, error = %e, "invalid TD message");
                return;
            }
        };
        if td.id.is_empty() {
            thing_id.clone_into(&mut td.id);
        }
        td.apply_id_parts();

        let stored = self.thing_store().update(td);
        debug!(thing_id = %stored.id, "thing description updated");
        if let Some(thing) = self.consumed(&stored.id) {
            thing.update_description(stored);
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn thing_store(&self) -> Arc<ThingStore> {
        self.inner.store.load_full()
    }

    /// Snapshot of the connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// The active account, if connected or connecting.
    pub fn account(&self) -> Option<Account> {
        self.session().map(|s| s.account.clone())
    }

    /// Token the bus uses on its next reconnect.
    pub fn current_token(&self) -> Option<SecretString> {
        self.session().and_then(|s| s.auth.access_token())
    }

    /// Seconds until the held token expires; 0 without a session.
    pub fn token_validity_secs(&self) -> u64 {
        self.session()
            .map_or(0, |s| s.auth.remaining_validity_secs())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.bus.is_connected()
    }

    /// Broker diagnostics from `$SYS/` topics.
    pub fn bus_diagnostics(&self) -> HashMap<String, String> {
        self.inner.bus.sys_values()
    }

    pub fn set_auth_failed_handler(
        &self,
        handler: impl Fn(&Account, &CoreError) + Send + Sync + 'static,
    ) {
        *self
            .inner
            .on_auth_failed
            .write()
            .expect("handler lock poisoned") = Some(Arc::new(handler));
    }

    pub fn set_connection_handler(&self, handler: impl Fn(&Account, bool) + Send + Sync + 'static) {
        *self
            .inner
            .on_connection_change
            .write()
            .expect("handler lock poisoned") = Some(Arc::new(handler));
    }

    // ── Bus callbacks ───────────────────────────────────────────────

    fn handle_bus_connected(&self, account_id: &str) {
        let Some(session) = self.session_for(account_id) else {
            return;
        };
        self.update_status(|s| {
            s.connected = true;
            // The initial connect writes its own message.
            if s.state != FactoryState::BusConnecting {
                s.state = FactoryState::Connected;
                s.status_message = "Reconnected to message bus".into();
            }
        });
        info!(account_id, "message bus connected");
        if let Some(handler) = self.connection_handler() {
            handler(&session.account, true);
        }
    }

    fn handle_bus_disconnected(&self, account_id: &str, error: Option<&hubsync_api::Error>) {
        let Some(session) = self.session_for(account_id) else {
            return;
        };
        self.update_status(|s| {
            s.connected = false;
            s.state = FactoryState::Disconnected;
            s.status_message = "Lost connection to message bus".into();
            if let Some(e) = error {
                s.authenticated = false;
                s.auth_status_message = e.to_string();
            }
        });
        warn!(account_id, error = ?error.map(ToString::to_string), "message bus disconnected");
        if let Some(handler) = self.connection_handler() {
            handler(&session.account, false);
        }

        // The broker refused the token. Refresh it so the bus picks up
        // the new one on its next attempt.
        if error.is_some() {
            let Ok(runtime) = Handle::try_current() else {
                warn!("no async runtime, cannot re-authenticate");
                return;
            };
            let factory = self.clone();
            runtime.spawn(async move {
                if let Err(e) = factory.authenticate(None).await {
                    warn!(error = %e, "re-authentication after disconnect failed");
                }
            });
        }
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn open_session(&self, account: Account) -> Result<Arc<Session>, CoreError> {
        let transport = self
            .inner
            .options
            .transport
            .clone()
            .unwrap_or_else(|| account.transport());
        let auth = AuthClient::new(
            account.id.clone(),
            account.auth_url()?,
            &transport,
            self.inner.options.session_tokens.clone(),
        )?;
        let directory = DirectoryClient::new(account.directory_url()?, &transport)?
            .with_max_pages(self.inner.options.max_pages);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Arc::new(Session {
            generation,
            account,
            auth,
            directory,
        }))
    }

    /// Load every TD into the store. Returns the status message; fails
    /// only when the session was superseded meanwhile.
    async fn load_directory(&self, session: &Session) -> Result<String, CoreError> {
        let result = match session.auth.access_token() {
            Some(token) => session
                .directory
                .list_descriptions(&token)
                .await
                .map_err(CoreError::from),
            None => Err(CoreError::Unauthorized {
                status: 401,
                message: "no access token".into(),
            }),
        };
        if !self.is_current(session.generation) {
            debug!(generation = session.generation, "discarding stale directory listing");
            return Err(CoreError::SessionSuperseded);
        }

        match result {
            Ok(listing) => {
                let store = self.thing_store();
                let count = listing.descriptions.len();
                for td in listing.descriptions {
                    store.update(td);
                }
                let mut message = "loaded directory".to_owned();
                if listing.truncated {
                    warn!(count, "directory listing truncated");
                    message.push_str(" (truncated)");
                }
                info!(count, "loaded directory");
                self.update_status(|s| {
                    s.directory = true;
                    s.directory_truncated = listing.truncated;
                    s.status_message.clone_from(&message);
                });
                Ok(message)
            }
            Err(e) => {
                warn!(error = %e, "unable to load directory");
                let message = format!("unable to load directory: {e}");
                self.update_status(|s| {
                    s.directory = false;
                    s.directory_truncated = false;
                    s.status_message.clone_from(&message);
                });
                Ok(message)
            }
        }
    }

    fn spawn_property_read(&self, thing: &Arc<ConsumedThing>, reauthenticate: bool) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(thing_id = %thing.id(), "no async runtime, property read skipped");
            return;
        };
        let factory = self.clone();
        let thing = Arc::clone(thing);
        runtime.spawn(async move {
            let Err(e) = thing.try_read_all_properties().await else {
                return;
            };
            if !reauthenticate || matches!(e, CoreError::SessionSuperseded | CoreError::NoAccount) {
                debug!(thing_id = %thing.id(), error = %e, "property read failed");
                return;
            }
            debug!(thing_id = %thing.id(), error = %e, "property read failed, re-authenticating");
            if factory.authenticate(None).await.is_ok() {
                thing.read_all_properties().await;
            }
        });
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.inner.session.load_full()
    }

    fn session_for(&self, account_id: &str) -> Option<Arc<Session>> {
        let session = self.session()?;
        if session.account.id == account_id {
            Some(session)
        } else {
            debug!(account_id, "event for inactive account ignored");
            None
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: FactoryState) -> Result<(), CoreError> {
        if !self.is_current(generation) {
            return Err(CoreError::SessionSuperseded);
        }
        self.update_status(|s| s.state = state);
        Ok(())
    }

    fn update_status(&self, modify: impl FnOnce(&mut ConnectionStatus)) {
        self.inner.status.send_modify(modify);
    }

    fn auth_failed_handler(&self) -> Option<AuthFailedHandler> {
        self.inner
            .on_auth_failed
            .read()
            .expect("handler lock poisoned")
            .clone()
    }

    fn connection_handler(&self) -> Option<ConnectionHandler> {
        self.inner
            .on_connection_change
            .read()
            .expect("handler lock poisoned")
            .clone()
    }
}

// ── Bus listener ────────────────────────────────────────────────────

/// Receives bus session callbacks on behalf of the factory.
struct FactoryListener {
    inner: Weak<FactoryInner>,
}

impl FactoryListener {
    fn factory(&self) -> Option<ThingFactory> {
        self.inner.upgrade().map(|inner| ThingFactory { inner })
    }
}

impl BusListener for FactoryListener {
    fn connected(&self, account_id: &str) {
        if let Some(factory) = self.factory() {
            factory.handle_bus_connected(account_id);
        }
    }

    fn disconnected(&self, account_id: &str, error: Option<&hubsync_api::Error>) {
        if let Some(factory) = self.factory() {
            factory.handle_bus_disconnected(account_id, error);
        }
    }

    fn message_received(&self, _account_id: &str, message: &BusMessage) {
        if let Some(factory) = self.factory() {
            factory.handle_bus_message(message);
        }
    }

    fn access_token(&self, account_id: &str) -> Option<SecretString> {
        let factory = self.factory()?;
        debug!(account_id, "bus requested access token");
        factory.session_for(account_id)?.auth.access_token()
    }
}

// ── Directory property reader ───────────────────────────────────────

/// Reads property values from the directory with the session's token.
struct DirectoryReader {
    inner: Weak<FactoryInner>,
}

impl PropertyReader for DirectoryReader {
    fn read_properties<'a>(
        &'a self,
        thing_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, PropertyValue>, CoreError>> {
        Box::pin(async move {
            let session = self
                .inner
                .upgrade()
                .and_then(|inner| inner.session.load_full())
                .ok_or(CoreError::NoAccount)?;
            let token = session
                .auth
                .access_token()
                .ok_or_else(|| CoreError::Unauthorized {
                    status: 401,
                    message: "no access token".into(),
                })?;
            let values = session
                .directory
                .read_property_values(thing_id, &token)
                .await?;
            if session.generation != self.current_generation() {
                return Err(CoreError::SessionSuperseded);
            }
            debug!(thing_id, count = values.len(), "read property values");
            Ok(values)
        })
    }
}

impl DirectoryReader {
    fn current_generation(&self) -> u64 {
        self.inner
            .upgrade()
            .map_or(0, |inner| inner.generation.load(Ordering::SeqCst))
    }
}
