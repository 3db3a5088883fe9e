//! Command dispatch: connects a factory, runs the handler, tears down.

pub mod config_cmd;
pub mod interact;
pub mod status;
pub mod things;
pub mod util;
pub mod watch;

use std::sync::Arc;

use tracing::warn;

use hubsync_core::{MqttConfig, MqttSession, ThingFactory};

use crate::cli::{Command, GlobalOpts};
use crate::config::ResolvedAccount;
use crate::error::CliError;

/// Connect to the account and dispatch a hub-bound command.
pub async fn dispatch(
    cmd: Command,
    resolved: ResolvedAccount,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let ResolvedAccount { account, password } = resolved;

    let bus = MqttSession::new(MqttConfig::default(), account.tls.clone());
    let factory = ThingFactory::new(Arc::new(bus));
    factory.set_auth_failed_handler(|account, err| {
        warn!(account_id = %account.id, error = %err, "token refresh failed");
    });

    factory.connect(account, Some(&password)).await?;

    let result = match cmd {
        Command::Things(args) => things::handle(&factory, args, global).await,
        Command::Watch(args) => watch::handle(&factory, args, global).await,
        Command::Invoke(args) => interact::invoke(&factory, args, global).await,
        Command::Write(args) => interact::write(&factory, args, global).await,
        Command::Status(args) => status::handle(&factory, &args, global),
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    };

    factory.disconnect();
    result
}
