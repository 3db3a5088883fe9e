// ── Message bus abstraction ──
//
// Transport-agnostic contract between the hub's publish/subscribe session
// and its owner. `MqttSession` is the production implementation; tests
// drive the factory through in-memory doubles of the same trait.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default port of the hub's websocket MQTT listener.
pub const DEFAULT_BUS_PORT: u16 = 8885;

// ── Message ─────────────────────────────────────────────────────────

/// One inbound publication.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retained: bool,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }
}

/// Result returned by topic handlers. Errors are logged by the session.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Handler for messages on one subscribed topic filter.
pub type MessageHandler = Arc<dyn Fn(&BusMessage) -> HandlerResult + Send + Sync>;

// ── Connection parameters ───────────────────────────────────────────

/// Delivery guarantee requested for a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// How the session reaches the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusTransport {
    /// MQTT over secure websocket at `wss://{address}:{port}/mqtt`.
    #[default]
    Wss,
    /// MQTT over plain websocket at `ws://{address}:{port}/mqtt`.
    Ws,
    /// MQTT over TLS.
    Tls,
    /// Plain MQTT over TCP.
    Tcp,
}

/// Everything needed to open one session for one account.
#[derive(Debug, Clone)]
pub struct BusConnectParams {
    pub account_id: String,
    pub address: String,
    pub port: u16,
    pub login_id: String,
    pub access_token: SecretString,
    pub transport: BusTransport,
}

// ── Listener ────────────────────────────────────────────────────────

/// Callbacks from a bus session to its owner.
///
/// `connected` and `disconnected` can recur any number of times over a
/// session's life. `access_token` is consulted right before every
/// reconnection attempt and must return the owner's current token.
pub trait BusListener: Send + Sync {
    fn connected(&self, account_id: &str);

    /// The connection dropped. `error` is set when the broker refused the
    /// credentials, so the owner knows its token needs refreshing.
    fn disconnected(&self, account_id: &str, error: Option<&Error>);

    /// A message that no topic handler claimed.
    fn message_received(&self, account_id: &str, message: &BusMessage);

    fn access_token(&self, account_id: &str) -> Option<SecretString>;
}

// ── Session contract ────────────────────────────────────────────────

/// A persistent, auto-reconnecting publish/subscribe session.
pub trait MessageBus: Send + Sync {
    /// Open a session, tearing down any existing one first.
    ///
    /// Resolves once the broker accepted the first connection; failures
    /// after that are reported through `listener.disconnected` and retried
    /// by the session.
    fn connect(
        &self,
        params: BusConnectParams,
        listener: Weak<dyn BusListener>,
    ) -> BoxFuture<'_, Result<(), Error>>;

    /// Close the session. No reconnection is attempted afterwards.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Subscribe to a topic filter (`+` and `#` wildcards allowed).
    ///
    /// At most one handler per filter; subscribing again replaces it.
    /// Subscriptions survive reconnects.
    fn subscribe(&self, topic: &str, qos: QoS, handler: Option<MessageHandler>);

    fn unsubscribe(&self, topic: &str);

    /// Fire-and-forget publish. Failures are logged, not returned.
    fn publish(&self, topic: &str, payload: Vec<u8>);

    /// Publish and resolve once the session accepted the message.
    fn publish_async(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), Error>>;

    /// Latest broker diagnostics received on `$SYS/` topics.
    fn sys_values(&self) -> HashMap<String, String>;
}
