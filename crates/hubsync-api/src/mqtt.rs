//! MQTT message bus session with auto-reconnect.
//!
//! Wraps a `rumqttc` event loop in a background task. The loop owns the
//! connection: it reconnects on its own schedule and asks the listener for
//! the current access token right before every attempt, so token refresh
//! and connection retry stay decoupled.
//!
//! Inbound publications are handed to a single dispatcher task through an
//! unbounded channel: reception never waits on handlers, and messages are
//! still handled in arrival order.
//!
//! # Example
//!
//! ```rust,ignore
//! use hubsync_api::mqtt::{MqttConfig, MqttSession};
//! use hubsync_api::transport::TlsMode;
//!
//! let session = MqttSession::new(MqttConfig::default(), TlsMode::System);
//! session.connect(params, Arc::downgrade(&listener)).await?;
//! session.subscribe("things/+/td", QoS::AtLeastOnce, None);
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use rumqttc::tokio_rustls::rustls;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    SubscribeFilter, TlsConfiguration, Transport,
};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{
    BusConnectParams, BusListener, BusMessage, BusTransport, MessageBus, MessageHandler, QoS,
};
use crate::error::Error;
use crate::topics::{is_sys_topic, topic_matches};
use crate::transport::TlsMode;

// ── MqttConfig ───────────────────────────────────────────────────────

/// Session tuning.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Pause between a dropped connection and the next attempt. Default: 5s.
    pub reconnect_delay: Duration,

    /// How long `connect` waits for the broker's first ConnAck. Default: 30s.
    pub connect_timeout: Duration,

    /// MQTT keep-alive interval. Default: 30s.
    pub keep_alive: Duration,

    /// Capacity of the request channel between client and event loop.
    pub request_capacity: usize,

    /// Maximum packet size in both directions. TDs can be large.
    pub max_packet_size: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(30),
            request_capacity: 64,
            max_packet_size: 1024 * 1024,
        }
    }
}

// ── MqttSession ──────────────────────────────────────────────────────

struct Subscription {
    qos: QoS,
    handler: Option<MessageHandler>,
}

struct ActiveSession {
    client: AsyncClient,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
}

struct SessionInner {
    config: MqttConfig,
    tls: TlsMode,
    subscriptions: DashMap<String, Subscription>,
    sys_values: DashMap<String, String>,
    active: Mutex<Option<ActiveSession>>,
}

/// MQTT implementation of [`MessageBus`].
///
/// Cheaply cloneable; clones share the same session.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl MqttSession {
    pub fn new(config: MqttConfig, tls: TlsMode) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                tls,
                subscriptions: DashMap::new(),
                sys_values: DashMap::new(),
                active: Mutex::new(None),
            }),
        }
    }

    fn client(&self) -> Option<AsyncClient> {
        self.inner
            .active
            .lock()
            .expect("session lock poisoned")
            .as_ref()
            .map(|a| a.client.clone())
    }

    fn build_options(&self, params: &BusConnectParams) -> Result<MqttOptions, Error> {
        let client_id = format!(
            "{}-{}",
            params.login_id,
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        );
        let (broker, transport) = match params.transport {
            BusTransport::Wss => (
                format!("wss://{}:{}/mqtt", params.address, params.port),
                Transport::wss_with_config(self.tls_configuration()?),
            ),
            BusTransport::Ws => (
                format!("ws://{}:{}/mqtt", params.address, params.port),
                Transport::Ws,
            ),
            BusTransport::Tls => (
                params.address.clone(),
                Transport::tls_with_config(self.tls_configuration()?),
            ),
            BusTransport::Tcp => (params.address.clone(), Transport::Tcp),
        };

        let mut options = MqttOptions::new(client_id, broker, params.port);
        options
            .set_transport(transport)
            .set_keep_alive(self.inner.config.keep_alive)
            .set_credentials(params.login_id.clone(), params.access_token.expose_secret())
            .set_max_packet_size(
                self.inner.config.max_packet_size,
                self.inner.config.max_packet_size,
            );
        Ok(options)
    }

    fn tls_configuration(&self) -> Result<TlsConfiguration, Error> {
        match &self.inner.tls {
            TlsMode::System => Ok(TlsConfiguration::default()),
            TlsMode::CustomCa(_) => {
                let ca = self.inner.tls.ca_pem()?.unwrap_or_default();
                Ok(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                })
            }
            TlsMode::DangerAcceptInvalid => {
                warn!("message bus certificate verification disabled");
                let config = rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                    .with_no_client_auth();
                Ok(TlsConfiguration::Rustls(Arc::new(config)))
            }
        }
    }
}

// ── Insecure TLS ─────────────────────────────────────────────────────

/// Accepts whatever certificate the broker presents.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

impl MessageBus for MqttSession {
    fn connect(
        &self,
        params: BusConnectParams,
        listener: Weak<dyn BusListener>,
    ) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.disconnect();

            let options = self.build_options(&params)?;
            info!(
                address = %params.address,
                port = params.port,
                login_id = %params.login_id,
                "connecting to message bus"
            );

            let (client, eventloop) =
                AsyncClient::new(options, self.inner.config.request_capacity);
            let cancel = CancellationToken::new();
            let connected = Arc::new(AtomicBool::new(false));
            let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
            let (first_tx, first_rx) = oneshot::channel();

            *self.inner.active.lock().expect("session lock poisoned") = Some(ActiveSession {
                client: client.clone(),
                cancel: cancel.clone(),
                connected: Arc::clone(&connected),
            });

            tokio::spawn(dispatch_loop(
                Arc::clone(&self.inner),
                params.account_id.clone(),
                listener.clone(),
                dispatch_rx,
            ));

            let ctx = LoopContext {
                inner: Arc::clone(&self.inner),
                client,
                account_id: params.account_id,
                login_id: params.login_id,
                listener,
                cancel: cancel.clone(),
                connected,
                dispatch_tx,
            };
            tokio::spawn(session_loop(ctx, eventloop, first_tx));

            let outcome =
                match tokio::time::timeout(self.inner.config.connect_timeout, first_rx).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(Error::BusConnect("session ended before connecting".into())),
                    Err(_) => Err(Error::BusConnect(format!(
                        "no response from broker within {}s",
                        self.inner.config.connect_timeout.as_secs()
                    ))),
                };

            if outcome.is_err() {
                cancel.cancel();
                self.inner.active.lock().expect("session lock poisoned").take();
            }
            outcome
        })
    }

    fn disconnect(&self) {
        let previous = self.inner.active.lock().expect("session lock poisoned").take();
        if let Some(session) = previous {
            debug!("disconnecting from message bus");
            if let Err(e) = session.client.try_disconnect() {
                debug!(error = %e, "disconnect request not queued");
            }
            session.connected.store(false, Ordering::SeqCst);
            session.cancel.cancel();
        }
    }

    fn is_connected(&self) -> bool {
        self.inner
            .active
            .lock()
            .expect("session lock poisoned")
            .as_ref()
            .is_some_and(|a| a.connected.load(Ordering::SeqCst))
    }

    fn subscribe(&self, topic: &str, qos: QoS, handler: Option<MessageHandler>) {
        self.inner
            .subscriptions
            .insert(topic.to_owned(), Subscription { qos, handler });

        // While disconnected the ConnAck handler subscribes everything.
        if self.is_connected() {
            if let Some(client) = self.client() {
                if let Err(e) = client.try_subscribe(topic, to_mqtt_qos(qos)) {
                    warn!(topic, error = %e, "subscribe request failed");
                }
            }
        }
        debug!(topic, "subscribed");
    }

    fn unsubscribe(&self, topic: &str) {
        self.inner.subscriptions.remove(topic);
        if let Some(client) = self.client() {
            if let Err(e) = client.try_unsubscribe(topic) {
                warn!(topic, error = %e, "unsubscribe request failed");
            }
        }
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let Some(client) = self.client() else {
            warn!(topic, "publish dropped, not connected");
            return;
        };
        if let Err(e) = client.try_publish(topic, rumqttc::QoS::AtLeastOnce, false, payload) {
            error!(topic, error = %e, "publish failed");
        }
    }

    fn publish_async(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), Error>> {
        let topic = topic.to_owned();
        Box::pin(async move {
            let client = self.client().ok_or(Error::NotConnected)?;
            client
                .publish(topic, rumqttc::QoS::AtLeastOnce, false, payload)
                .await
                .map_err(|e| Error::Bus(e.to_string()))
        })
    }

    fn sys_values(&self) -> HashMap<String, String> {
        self.inner
            .sys_values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

// ── Background session loop ──────────────────────────────────────────

struct LoopContext {
    inner: Arc<SessionInner>,
    client: AsyncClient,
    account_id: String,
    login_id: String,
    listener: Weak<dyn BusListener>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    dispatch_tx: mpsc::UnboundedSender<BusMessage>,
}

/// Main loop: poll → on ConnAck resubscribe → on error, wait, refresh
/// credentials, poll again (which reconnects).
///
/// The first connection outcome is reported through `first`; a failure
/// before the first ConnAck ends the loop.
async fn session_loop(
    ctx: LoopContext,
    mut eventloop: EventLoop,
    first: oneshot::Sender<Result<(), Error>>,
) {
    let mut first = Some(first);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    ctx.connected.store(true, Ordering::SeqCst);
                    resubscribe_all(&ctx);
                    info!(account_id = %ctx.account_id, "message bus connected");
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }
                    match ctx.listener.upgrade() {
                        Some(listener) => listener.connected(&ctx.account_id),
                        None => break,
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(publish.topic.as_ref()).into_owned();
                    if is_sys_topic(&topic) {
                        let value = String::from_utf8_lossy(&publish.payload).into_owned();
                        ctx.inner.sys_values.insert(topic, value);
                        continue;
                    }
                    let message = BusMessage {
                        topic,
                        payload: publish.payload,
                        retained: publish.retain,
                    };
                    if ctx.dispatch_tx.send(message).is_err() {
                        debug!("dispatcher gone, ending session loop");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let err = Error::Bus(e.to_string());
                    if let Some(tx) = first.take() {
                        warn!(error = %e, "initial message bus connection failed");
                        let _ = tx.send(Err(Error::BusConnect(e.to_string())));
                        break;
                    }

                    let was_connected = ctx.connected.swap(false, Ordering::SeqCst);
                    let rejected = credentials_rejected(&e);
                    warn!(error = %e, was_connected, rejected, "message bus connection lost");
                    // The listener sees an error only for refused credentials.
                    let cause = rejected.then_some(&err);
                    match ctx.listener.upgrade() {
                        Some(listener) => listener.disconnected(&ctx.account_id, cause),
                        None => break,
                    }

                    let delay = ctx.inner.config.reconnect_delay;
                    debug!(delay_ms = delay.as_millis(), "waiting before reconnect");
                    tokio::select! {
                        biased;
                        () = ctx.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }

                    // Always reconnect with the owner's current token.
                    if let Some(token) = ctx
                        .listener
                        .upgrade()
                        .and_then(|l| l.access_token(&ctx.account_id))
                    {
                        eventloop
                            .mqtt_options
                            .set_credentials(ctx.login_id.clone(), token.expose_secret());
                    }
                }
            }
        }
    }

    ctx.connected.store(false, Ordering::SeqCst);
    debug!(account_id = %ctx.account_id, "message bus loop exiting");
}

/// Re-send every stored filter as a single SUBSCRIBE. The event loop is not
/// polled while this runs, so one request per filter would overflow the
/// bounded request channel.
fn resubscribe_all(ctx: &LoopContext) {
    let filters: Vec<SubscribeFilter> = ctx
        .inner
        .subscriptions
        .iter()
        .map(|entry| SubscribeFilter::new(entry.key().clone(), to_mqtt_qos(entry.value().qos)))
        .collect();
    if filters.is_empty() {
        return;
    }
    let count = filters.len();
    match ctx.client.try_subscribe_many(filters) {
        Ok(()) => debug!(count, "resubscribed"),
        Err(e) => warn!(count, error = %e, "resubscribe failed"),
    }
}

/// The broker refused the connection because of the credentials.
fn credentials_rejected(error: &ConnectionError) -> bool {
    matches!(
        error,
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword
        )
    )
}

// ── Dispatch ─────────────────────────────────────────────────────────

async fn dispatch_loop(
    inner: Arc<SessionInner>,
    account_id: String,
    listener: Weak<dyn BusListener>,
    mut rx: mpsc::UnboundedReceiver<BusMessage>,
) {
    while let Some(message) = rx.recv().await {
        dispatch(&inner, &account_id, &listener, &message);
    }
}

/// Deliver one message to the handler of the first matching filter, or to
/// the listener when no filter claims it. Handler failures and panics are
/// logged and never reach the session loop.
fn dispatch(
    inner: &SessionInner,
    account_id: &str,
    listener: &Weak<dyn BusListener>,
    message: &BusMessage,
) {
    let handler = find_handler(&inner.subscriptions, &message.topic);

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match &handler {
        Some(h) => h(message),
        None => {
            if let Some(l) = listener.upgrade() {
                l.message_received(account_id, message);
            }
            Ok(())
        }
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(topic = %message.topic, error = %e, "message handler failed"),
        Err(_) => error!(topic = %message.topic, "message handler panicked"),
    }
}

/// Exact filter first, then the first wildcard filter that matches. The
/// handler is cloned out so no map lock is held while it runs.
fn find_handler(
    subscriptions: &DashMap<String, Subscription>,
    topic: &str,
) -> Option<MessageHandler> {
    if let Some(sub) = subscriptions.get(topic) {
        if let Some(h) = &sub.handler {
            return Some(Arc::clone(h));
        }
    }
    subscriptions.iter().find_map(|entry| {
        entry
            .value()
            .handler
            .as_ref()
            .filter(|_| topic_matches(entry.key(), topic))
            .map(Arc::clone)
    })
}

// ── Tests ────────────────────────────────────────────────────────────
