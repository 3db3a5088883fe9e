//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hubsync_config::ConfigError;
use hubsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to hub: {reason}")]
    #[diagnostic(
        code(hubsync::connection_failed),
        help(
            "Check that the hub is running and reachable, and that the ports in \
             your profile match the hub's services.\n\
             Try: hubsync status --insecure"
        )
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(hubsync::auth_failed),
        help("Verify the login id and password.\nRun: hubsync config set-password")
    )]
    AuthFailed { message: String },

    #[error("No password configured for account '{account}'")]
    #[diagnostic(
        code(hubsync::no_credentials),
        help(
            "Store one with: hubsync config set-password --name {account}\n\
             Or set the HUBSYNC_PASSWORD environment variable."
        )
    )]
    NoCredentials { account: String },

    // ── Things ───────────────────────────────────────────────────────
    #[error("Thing '{id}' not found in the directory")]
    #[diagnostic(
        code(hubsync::not_found),
        help("Run: hubsync things list to see available Things")
    )]
    ThingNotFound { id: String },

    #[error("Not supported: {operation}")]
    #[diagnostic(
        code(hubsync::unsupported),
        help("Run: hubsync things show <id> to see the Thing's actions and properties")
    )]
    Unsupported { operation: String },

    #[error("Unexpected response from hub: {message}")]
    #[diagnostic(code(hubsync::response))]
    Response { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hubsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Account '{name}' not found in configuration")]
    #[diagnostic(
        code(hubsync::account_not_found),
        help("Available accounts: {available}\nCreate one with: hubsync config init")
    )]
    AccountNotFound { name: String, available: String },

    #[error("No account configured")]
    #[diagnostic(
        code(hubsync::no_config),
        help(
            "Create one with: hubsync config init --hub <address> --user <login>\n\
             Or pass --address and --login.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(hubsync::config))]
    Config(ConfigError),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(hubsync::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(hubsync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::ThingNotFound { .. } | Self::AccountNotFound { .. } => exit_code::NOT_FOUND,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthorized { status: _, message } => CliError::AuthFailed { message },
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },
            CoreError::NoAccount | CoreError::SessionSuperseded => CliError::ConnectionFailed {
                reason: err.to_string(),
            },
            CoreError::Response { message } => CliError::Response { message },
            CoreError::NotSupported { operation } | CoreError::NotImplemented { operation } => {
                CliError::Unsupported { operation }
            }
            CoreError::AlreadyObserved { name } => {
                CliError::Internal(format!("'{name}' already has a listener"))
            }
            CoreError::Config { message } => CliError::Validation {
                field: "account".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { account } => CliError::NoCredentials { account },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
