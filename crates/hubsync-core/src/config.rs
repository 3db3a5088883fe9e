// ── Runtime account configuration ──
//
// These types describe *how* to reach one hub account. They carry
// addressing and tuning but never touch disk; the CLI (through
// hubsync-config) builds an `Account` and hands it to the factory.

use std::time::Duration;

use hubsync_api::auth::DEFAULT_AUTH_PORT;
use hubsync_api::bus::DEFAULT_BUS_PORT;
use hubsync_api::directory::DEFAULT_DIRECTORY_PORT;
use hubsync_api::{BusTransport, TlsMode, TransportConfig};
use url::Url;

use crate::error::CoreError;

/// One hub account: where its services live and who logs in.
#[derive(Debug, Clone)]
pub struct Account {
    /// Stable account id, used for token caching and callbacks.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login id for the auth service and the message bus.
    pub login_name: String,
    /// Hub host name or IP address.
    pub address: String,
    /// URL scheme of the request/response services. Default: `https`.
    pub scheme: String,
    pub auth_port: u16,
    pub directory_port: u16,
    pub bus_port: u16,
    pub bus_transport: BusTransport,
    /// Ask the auth service for a refresh cookie on login.
    pub remember_me: bool,
    /// Prefix in front of `things/...` topics, if the hub uses one.
    pub topic_prefix: Option<String>,
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Account {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        login_name: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            login_name: login_name.into(),
            address: address.into(),
            scheme: "https".into(),
            auth_port: DEFAULT_AUTH_PORT,
            directory_port: DEFAULT_DIRECTORY_PORT,
            bus_port: DEFAULT_BUS_PORT,
            bus_transport: BusTransport::default(),
            remember_me: true,
            topic_prefix: None,
            tls: TlsMode::default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn auth_url(&self) -> Result<Url, CoreError> {
        self.service_url(self.auth_port)
    }

    pub fn directory_url(&self) -> Result<Url, CoreError> {
        self.service_url(self.directory_port)
    }

    /// HTTP transport settings shared by the auth and directory clients.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.timeout,
            cookie_jar: None,
        }
    }

    fn service_url(&self, port: u16) -> Result<Url, CoreError> {
        let raw = format!("{}://{}:{port}/", self.scheme, self.address);
        Url::parse(&raw).map_err(|e| CoreError::Config {
            message: format!("invalid service URL '{raw}': {e}"),
        })
    }
}
