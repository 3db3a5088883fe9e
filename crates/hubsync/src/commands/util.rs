//! Shared helpers for command handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use hubsync_core::{ConsumedThing, ThingFactory};

use crate::error::CliError;

/// Consume a Thing from the loaded directory.
pub fn consume(factory: &ThingFactory, id: &str) -> Result<Arc<ConsumedThing>, CliError> {
    factory
        .consume_with_id(id)
        .ok_or_else(|| CliError::ThingNotFound { id: id.into() })
}

/// Parse a command-line value as JSON; anything that isn't JSON is sent as
/// a string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Wait until the first bulk property read lands, or `limit` passes.
///
/// Returns `false` on timeout; the caller shows whatever is cached.
pub async fn wait_for_properties(thing: &ConsumedThing, limit: Duration) -> bool {
    let mut changes = thing.subscribe_changes();
    let wait = async {
        while !thing.has_properties() {
            if changes.changed().await.is_err() {
                break;
            }
        }
    };
    tokio::time::timeout(limit, wait).await.is_ok() && thing.has_properties()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_are_parsed() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(r#"{"level":3}"#), json!({"level": 3}));
    }

    #[test]
    fn bare_words_become_strings() {
        assert_eq!(parse_value("on"), json!("on"));
        assert_eq!(parse_value("{broken"), json!("{broken"));
    }
}
