//! Action and property-write command handlers.

use serde_json::Value;

use hubsync_core::ThingFactory;

use crate::cli::{GlobalOpts, InvokeArgs, WriteArgs};
use crate::error::CliError;

use super::util;

pub async fn invoke(
    factory: &ThingFactory,
    args: InvokeArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let thing = util::consume(factory, &args.id)?;
    let input = args.input.as_deref().map_or(Value::Null, util::parse_value);

    thing.invoke_action(&args.action, input).await?;
    if !global.quiet {
        eprintln!("Action '{}' requested on {}", args.action, thing.id());
    }
    Ok(())
}

pub async fn write(
    factory: &ThingFactory,
    args: WriteArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let thing = util::consume(factory, &args.id)?;
    let value = util::parse_value(&args.value);

    thing.write_property(&args.property, value).await?;
    if !global.quiet {
        eprintln!("Property '{}' change requested on {}", args.property, thing.id());
    }
    Ok(())
}
