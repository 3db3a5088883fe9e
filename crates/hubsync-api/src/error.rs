use thiserror::Error;

/// Top-level error type for the `hubsync-api` crate.
///
/// Covers every failure mode across the hub's service surfaces:
/// authentication, directory, message bus and the shared HTTP transport.
/// `hubsync-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication / authorization ──────────────────────────────
    /// The service rejected the request (HTTP status >= 400).
    ///
    /// The auth service returns 401 for bad credentials; the directory
    /// reports every failing status this way so callers can re-authenticate
    /// and retry.
    #[error("Unauthorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    // ── Response ────────────────────────────────────────────────────
    /// Missing, empty or otherwise unusable response body.
    #[error("Unexpected response: {message}")]
    Response { message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Message bus ─────────────────────────────────────────────────
    /// The initial bus connection could not be established.
    #[error("Message bus connection failed: {0}")]
    BusConnect(String),

    /// Bus session error after connect (dropped connection, rejected request).
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Operation needs an active bus session.
    #[error("Not connected to the message bus")]
    NotConnected,
}

impl Error {
    /// Returns `true` if this error indicates the credential is invalid or
    /// expired and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Bus(_) | Self::BusConnect(_) => true,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_auth_expired() {
        let err = Error::Unauthorized {
            status: 401,
            message: "Authentication Error".into(),
        };
        assert!(err.is_auth_expired());
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_transient());
    }

    #[test]
    fn response_errors_are_not_retried() {
        let err = Error::Response {
            message: "empty body".into(),
        };
        assert!(!err.is_auth_expired());
        assert!(!err.is_transient());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn bus_errors_are_transient() {
        assert!(Error::Bus("connection reset".into()).is_transient());
        assert!(Error::BusConnect("refused".into()).is_transient());
    }
}
