// ── Connection status ──
//
// The single record the factory shares with the outside world. Written
// only by the factory; observed through a `watch` channel.

use serde::Serialize;
use strum::{AsRefStr, Display};

/// Where the factory is in its connect sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum FactoryState {
    #[default]
    Idle,
    Authenticating,
    DirectoryLoading,
    BusConnecting,
    Connected,
    Disconnected,
    AuthFailed,
}

/// Human-readable connection state plus the flags a UI keys off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: FactoryState,
    pub account_id: Option<String>,
    pub authenticated: bool,
    pub auth_status_message: String,
    /// The last directory load succeeded.
    pub directory: bool,
    /// The last directory load hit the page ceiling.
    pub directory_truncated: bool,
    /// The message bus session is up.
    pub connected: bool,
    pub status_message: String,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: FactoryState::Idle,
            account_id: None,
            authenticated: false,
            auth_status_message: String::new(),
            directory: false,
            directory_truncated: false,
            connected: false,
            status_message: "not connected".into(),
        }
    }
}

impl ConnectionStatus {
    /// Fully authenticated, directory loaded and bus connected.
    pub fn is_ready(&self) -> bool {
        self.authenticated && self.directory && self.connected
    }
}
