//! Config subcommand handlers.

use secrecy::SecretString;

use hubsync_config::AccountProfile;
use hubsync_core::BusTransport;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

/// Map an interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn prompt_password(account: &str) -> Result<SecretString, CliError> {
    let secret = rpassword::prompt_password(format!("Password for '{account}': "))
        .map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "value cannot be empty".into(),
        });
    }
    Ok(SecretString::from(secret))
}

fn parse_bus_transport(raw: &str) -> Result<BusTransport, CliError> {
    match raw {
        "wss" => Ok(BusTransport::Wss),
        "ws" => Ok(BusTransport::Ws),
        "tls" => Ok(BusTransport::Tls),
        "tcp" => Ok(BusTransport::Tcp),
        other => Err(CliError::Validation {
            field: "bus_transport".into(),
            reason: format!("expected wss, ws, tls or tcp, got '{other}'"),
        }),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init {
            hub,
            user,
            name,
            bus_transport,
            store_password,
        } => {
            let mut profile = AccountProfile::new(hub, user);
            if let Some(ref raw) = bus_transport {
                profile.bus_transport = parse_bus_transport(raw)?;
            }
            // Validate before anything is written
            let mut cfg = config::load_config_or_default();
            hubsync_config::profile_to_account(&profile, &name, &cfg.defaults)?;

            if store_password {
                let password = prompt_password(&name)?;
                hubsync_config::store_password(&name, &password)?;
                eprintln!("✓ Password stored in system keyring");
            }

            cfg.accounts.insert(name.clone(), profile);
            if cfg.default_account.is_none() || cfg.accounts.len() == 1 {
                cfg.default_account = Some(name.clone());
            }
            let path = config::save_config(&cfg)?;

            eprintln!("✓ Configuration written to {}", path.display());
            eprintln!("  Account: {name}");
            eprintln!("  Test it: hubsync status");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| format!("{c:#?}"),
                |_| "config".into(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword { name } => {
            let cfg = config::load_config_or_default();
            let name = name.unwrap_or_else(|| config::active_account_name(global, &cfg));
            if !cfg.accounts.contains_key(&name) {
                return Err(CliError::AccountNotFound {
                    available: config::available_accounts(&cfg),
                    name,
                });
            }

            let password = prompt_password(&name)?;
            hubsync_config::store_password(&name, &password)?;
            eprintln!("✓ Password stored in system keyring for account '{name}'");
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_transport_names() {
        assert!(matches!(parse_bus_transport("ws"), Ok(BusTransport::Ws)));
        assert!(matches!(
            parse_bus_transport("quic"),
            Err(CliError::Validation { .. })
        ));
    }
}
