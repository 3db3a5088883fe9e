// ── Core error types ──
//
// Domain errors from hubsync-core. The `From<hubsync_api::Error>` impl
// translates transport-layer failures; consumers never match on reqwest
// or MQTT errors directly.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Credential errors ────────────────────────────────────────────
    /// Credential invalid or expired. Always worth one re-authenticate.
    #[error("Unauthorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("No active account -- connect first")]
    NoAccount,

    // ── Connection errors ────────────────────────────────────────────
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// A newer `connect` replaced the session this result belonged to.
    #[error("Session superseded by a newer connection")]
    SessionSuperseded,

    // ── Response errors ──────────────────────────────────────────────
    #[error("Unexpected response: {message}")]
    Response { message: String },

    // ── Usage errors ─────────────────────────────────────────────────
    /// Missing transport capability, or a name the TD does not declare.
    #[error("Not supported: {operation}")]
    NotSupported { operation: String },

    /// A property observer or event subscriber is already registered.
    #[error("'{name}' already has a listener")]
    AlreadyObserved { name: String },

    #[error("Not implemented: {operation}")]
    NotImplemented { operation: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` when re-authenticating could resolve the failure.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hubsync_api::Error> for CoreError {
    fn from(err: hubsync_api::Error) -> Self {
        match err {
            hubsync_api::Error::Unauthorized { status, message } => {
                CoreError::Unauthorized { status, message }
            }
            hubsync_api::Error::Response { message } => CoreError::Response { message },
            hubsync_api::Error::Deserialization { message, body: _ } => CoreError::Response {
                message: format!("Deserialization error: {message}"),
            },
            hubsync_api::Error::Transport(ref e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            hubsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            hubsync_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            hubsync_api::Error::BusConnect(reason) | hubsync_api::Error::Bus(reason) => {
                CoreError::ConnectionFailed {
                    reason: format!("message bus: {reason}"),
                }
            }
            hubsync_api::Error::NotConnected => CoreError::ConnectionFailed {
                reason: "not connected to the message bus".into(),
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("JSON encoding failed: {err}"))
    }
}
