//! Consumed-Thing runtime between `hubsync-api` and its consumers (CLI,
//! dashboards, automation).
//!
//! - **[`ThingFactory`]**: owns one account session.
//!   [`connect()`](ThingFactory::connect) authenticates, loads the Thing
//!   directory into the [`ThingStore`], then connects the message bus.
//!   [`consume()`](ThingFactory::consume) hands out bound Consumed Things.
//!
//! - **[`ConsumedThing`]**: live cache of one remote Thing's property and
//!   event values plus the interaction API (invoke action, write property,
//!   observe, bulk read). Outbound traffic goes through the
//!   [`ThingTransport`] and [`PropertyReader`] capabilities.
//!
//! - **[`MqttBinding`]**: maps a Consumed Thing onto bus topics.
//!
//! - **[`ConnectionStatus`]**: the single status record, observable through
//!   [`ThingFactory::subscribe_status`].

pub mod binding;
pub mod config;
pub mod error;
pub mod factory;
pub mod interaction;
pub mod status;
pub mod store;
pub mod thing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use binding::MqttBinding;
pub use config::Account;
pub use error::CoreError;
pub use factory::{AuthFailedHandler, ConnectionHandler, FactoryOptions, ThingFactory};
pub use interaction::{InteractionOutput, UNSET_VALUE};
pub use status::{ConnectionStatus, FactoryState};
pub use store::ThingStore;
pub use thing::{ChangeListener, ConsumedThing, PropertyReader, ThingTransport};

// Wire types consumers handle directly.
pub use hubsync_api::{BusTransport, MqttConfig, MqttSession, ThingDescription, TlsMode};
