//! Shared configuration for hubsync tools.
//!
//! TOML account profiles, password resolution (env + keyring + plaintext),
//! and translation to `hubsync_core::Account`. The CLI adds flag-aware
//! wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hubsync_core::{Account, BusTransport, TlsMode};

/// Keyring service name for stored passwords.
pub const KEYRING_SERVICE: &str = "hubsync";

/// Environment variable consulted for a password after `password_env`.
pub const PASSWORD_ENV: &str = "HUBSYNC_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no account named '{name}' in config")]
    UnknownAccount { name: String },

    #[error("no password configured for account '{account}'")]
    NoCredentials { account: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Account used when none is named on the command line.
    pub default_account: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named hub accounts.
    #[serde(default)]
    pub accounts: HashMap<String, AccountProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_account: Some("default".into()),
            defaults: Defaults::default(),
            accounts: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up an account by name, falling back to `default_account`.
    pub fn account(&self, name: Option<&str>) -> Result<(String, &AccountProfile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_account.clone())
            .unwrap_or_else(|| "default".into());
        self.accounts
            .get(&name)
            .map(|profile| (name.clone(), profile))
            .ok_or(ConfigError::UnknownAccount { name })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// One hub account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountProfile {
    /// Display name; defaults to the profile key.
    pub name: Option<String>,

    /// Hub host name or IP address.
    pub address: String,

    /// Login id for the auth service and message bus.
    pub login: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_auth_port")]
    pub auth_port: u16,

    #[serde(default = "default_directory_port")]
    pub directory_port: u16,

    #[serde(default = "default_bus_port")]
    pub bus_port: u16,

    /// `wss`, `ws`, `tls` or `tcp`.
    #[serde(default)]
    pub bus_transport: BusTransport,

    #[serde(default = "default_true")]
    pub remember_me: bool,

    /// Prefix in front of `things/...` topics.
    pub topic_prefix: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout in seconds.
    pub timeout: Option<u64>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Password (plaintext, prefer keyring).
    pub password: Option<String>,
}

impl AccountProfile {
    pub fn new(address: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
            login: login.into(),
            scheme: default_scheme(),
            auth_port: default_auth_port(),
            directory_port: default_directory_port(),
            bus_port: default_bus_port(),
            bus_transport: BusTransport::default(),
            remember_me: true,
            topic_prefix: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            password_env: None,
            password: None,
        }
    }
}

fn default_scheme() -> String {
    "https".into()
}
fn default_auth_port() -> u16 {
    8881
}
fn default_directory_port() -> u16 {
    8886
}
fn default_bus_port() -> u16 {
    8885
}
fn default_true() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "hubsync", "hubsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hubsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` layered over defaults, then `HUBSYNC_*`
/// environment variables (`__` separates nested keys).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HUBSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Password resolution (without CLI flags) ─────────────────────────

fn keyring_entry(account_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{account_name}/password"))
}

/// Resolve an account password from the credential chain.
pub fn resolve_password(
    profile: &AccountProfile,
    account_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Shared env var
    if let Ok(val) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring_entry(account_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        account: account_name.into(),
    })
}

/// Store an account password in the system keyring.
pub fn store_password(account_name: &str, password: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(account_name)?.set_password(password.expose_secret())?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a core `Account` from a profile.
pub fn profile_to_account(
    profile: &AccountProfile,
    account_name: &str,
    defaults: &Defaults,
) -> Result<Account, ConfigError> {
    if profile.address.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "address".into(),
            reason: "must not be empty".into(),
        });
    }
    if profile.login.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "login".into(),
            reason: "must not be empty".into(),
        });
    }
    if !matches!(profile.scheme.as_str(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "scheme".into(),
            reason: format!("expected 'http' or 'https', got '{}'", profile.scheme),
        });
    }
    for (field, port) in [
        ("auth_port", profile.auth_port),
        ("directory_port", profile.directory_port),
        ("bus_port", profile.bus_port),
    ] {
        if port == 0 {
            return Err(ConfigError::Validation {
                field: field.into(),
                reason: "must not be 0".into(),
            });
        }
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let mut account = Account::new(account_name, profile.address.trim(), profile.login.trim());
    if let Some(ref name) = profile.name {
        account.name.clone_from(name);
    }
    account.scheme.clone_from(&profile.scheme);
    account.auth_port = profile.auth_port;
    account.directory_port = profile.directory_port;
    account.bus_port = profile.bus_port;
    account.bus_transport = profile.bus_transport;
    account.remember_me = profile.remember_me;
    account.topic_prefix.clone_from(&profile.topic_prefix);
    account.tls = tls;
    account.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    Ok(account)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
default_account = "home"

[defaults]
timeout = 10

[accounts.home]
address = "hub.local"
login = "alice"
bus_transport = "ws"
password = "plain"
password_env = "HUBSYNC_TEST_SURELY_UNSET"

[accounts.lab]
name = "Lab hub"
address = "10.0.0.5"
login = "bob"
auth_port = 9001
insecure = true
"#;

    fn load_sample() -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn loads_profiles_with_defaults() {
        let config = load_sample();
        assert_eq!(config.default_account.as_deref(), Some("home"));
        assert_eq!(config.defaults.timeout, 10);

        let (name, home) = config.account(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.scheme, "https");
        assert_eq!(home.auth_port, 8881);
        assert_eq!(home.bus_port, 8885);
        assert_eq!(home.bus_transport, BusTransport::Ws);
        assert!(home.remember_me);
    }

    #[test]
    fn unknown_account_is_reported() {
        let config = load_sample();
        let err = config.account(Some("garage")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAccount { name } if name == "garage"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.defaults.output, "table");
    }

    #[test]
    fn profile_translates_to_account() {
        let config = load_sample();
        let (name, lab) = config.account(Some("lab")).unwrap();
        let account = profile_to_account(lab, &name, &config.defaults).unwrap();

        assert_eq!(account.id, "lab");
        assert_eq!(account.name, "Lab hub");
        assert_eq!(account.login_name, "bob");
        assert_eq!(account.auth_url().unwrap().as_str(), "https://10.0.0.5:9001/");
        assert!(matches!(account.tls, TlsMode::DangerAcceptInvalid));
        assert_eq!(account.timeout, Duration::from_secs(10));
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let mut profile = AccountProfile::new("hub.local", "");
        let err = profile_to_account(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "login"));

        profile.login = "alice".into();
        profile.scheme = "ftp".into();
        let err = profile_to_account(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "scheme"));
    }

    #[test]
    fn plaintext_password_is_last_resort() {
        let config = load_sample();
        let (name, home) = config.account(Some("home")).unwrap();
        if std::env::var(PASSWORD_ENV).is_err() {
            let password = resolve_password(home, &name).unwrap();
            assert_eq!(password.expose_secret(), "plain");
        }
    }

    #[test]
    fn save_round_trips_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config
            .accounts
            .insert("default".into(), AccountProfile::new("hub.local", "alice"));
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.account(None).unwrap();
        assert_eq!(profile.address, "hub.local");
        assert_eq!(profile.bus_transport, BusTransport::Wss);
    }
}
