// hubsync-api: Async transport clients for an IoT hub (auth, directory, message bus)

pub mod auth;
pub mod bus;
pub mod directory;
pub mod error;
pub mod mqtt;
pub mod td;
pub mod topics;
pub mod transport;

pub use auth::{AuthClient, SessionTokens};
pub use bus::{
    BusConnectParams, BusListener, BusMessage, BusTransport, HandlerResult, MessageBus,
    MessageHandler, QoS,
};
pub use directory::{DirectoryClient, DirectoryListing, PropertyValue};
pub use error::Error;
pub use mqtt::{MqttConfig, MqttSession};
pub use td::{
    ActionAffordance, DataSchema, EventAffordance, PropertyAffordance, ThingDescription,
    ThingIdParts,
};
pub use transport::{TlsMode, TransportConfig};
