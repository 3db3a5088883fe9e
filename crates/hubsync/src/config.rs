//! CLI-aware account resolution.
//!
//! Thin wrappers around `hubsync_config` that layer global flags on top of
//! the loaded profile before it crosses into `hubsync_core::Account`.

use std::time::Duration;

use secrecy::SecretString;

use hubsync_config::{AccountProfile, Config};
use hubsync_core::{Account, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use hubsync_config::{config_path, load_config_or_default, save_config};

/// An account ready to hand to the factory.
pub struct ResolvedAccount {
    pub account: Account,
    pub password: SecretString,
}

/// Resolve the active account name from CLI flags and config.
pub fn active_account_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .account
        .clone()
        .or_else(|| config.default_account.clone())
        .unwrap_or_else(|| "default".into())
}

/// Names of all configured accounts, for error help text.
pub fn available_accounts(config: &Config) -> String {
    let mut names: Vec<_> = config.accounts.keys().cloned().collect();
    names.sort();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

/// Build the account and password from config, profile, and CLI overrides.
pub fn resolve_account(global: &GlobalOpts, config: &Config) -> Result<ResolvedAccount, CliError> {
    let name = active_account_name(global, config);

    let mut profile = match config.accounts.get(&name) {
        Some(profile) => profile.clone(),
        None => profile_from_flags(global, config, &name)?,
    };

    // Flags > env > profile
    if let Some(ref address) = global.address {
        profile.address.clone_from(address);
    }
    if let Some(ref login) = global.login {
        profile.login.clone_from(login);
    }

    let mut account = hubsync_config::profile_to_account(&profile, &name, &config.defaults)?;
    if global.insecure {
        account.tls = TlsMode::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        account.timeout = Duration::from_secs(secs);
    }

    let password = match global.password {
        Some(ref pw) => SecretString::from(pw.clone()),
        None => hubsync_config::resolve_password(&profile, &name)?,
    };

    Ok(ResolvedAccount { account, password })
}

/// No profile under `name`: fall back to `--address`/`--login` alone.
fn profile_from_flags(
    global: &GlobalOpts,
    config: &Config,
    name: &str,
) -> Result<AccountProfile, CliError> {
    let Some(ref address) = global.address else {
        return Err(if config.accounts.is_empty() {
            CliError::NoConfig {
                path: config_path().display().to_string(),
            }
        } else {
            CliError::AccountNotFound {
                name: name.into(),
                available: available_accounts(config),
            }
        });
    };
    let login = global.login.clone().ok_or_else(|| CliError::Validation {
        field: "login".into(),
        reason: "--login is required when no account profile is configured".into(),
    })?;
    Ok(AccountProfile::new(address.clone(), login))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use secrecy::ExposeSecret;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["hubsync"];
        argv.extend_from_slice(args);
        argv.push("status");
        Cli::parse_from(argv).global
    }

    fn config_with_home() -> Config {
        let mut config = Config::default();
        let mut profile = AccountProfile::new("hub.local", "alice");
        profile.password = Some("from-config".into());
        config.accounts.insert("default".into(), profile);
        config
    }

    #[test]
    fn flags_override_profile() {
        let config = config_with_home();
        let resolved = resolve_account(
            &global(&["--address", "10.1.1.1", "--password", "flag-pw", "-k"]),
            &config,
        )
        .unwrap();
        assert_eq!(resolved.account.address, "10.1.1.1");
        assert_eq!(resolved.account.login_name, "alice");
        assert_eq!(resolved.password.expose_secret(), "flag-pw");
        assert!(matches!(resolved.account.tls, TlsMode::DangerAcceptInvalid));
    }

    #[test]
    fn flags_alone_build_an_account() {
        let resolved = resolve_account(
            &global(&["--address", "hub.lan", "--login", "bob", "--password", "pw"]),
            &Config::default(),
        )
        .unwrap();
        assert_eq!(resolved.account.id, "default");
        assert_eq!(resolved.account.address, "hub.lan");
    }

    #[test]
    fn unknown_account_lists_alternatives() {
        let config = config_with_home();
        let err = resolve_account(&global(&["--account", "lab"]), &config)
            .err()
            .unwrap();
        assert!(
            matches!(err, CliError::AccountNotFound { ref available, .. } if available == "default")
        );
    }

    #[test]
    fn empty_config_without_flags_is_no_config() {
        let err = resolve_account(&global(&[]), &Config::default()).err().unwrap();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }
}
