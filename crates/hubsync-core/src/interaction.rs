// ── Interaction output ──
//
// Cached value + timestamp for one property or event of a consumed Thing.

use chrono::{DateTime, Local, Utc};
use hubsync_api::DataSchema;
use serde::Serialize;
use serde_json::Value;

/// Value held by an entry that has never received an update.
pub const UNSET_VALUE: &str = "n/a";

/// Latest value of one property or event.
///
/// Starts `unset` (sentinel value, no timestamp) and becomes `set` on the
/// first update; from then on only value and timestamp change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionOutput {
    value: Value,
    updated: Option<DateTime<Utc>>,
    schema: Option<DataSchema>,
}

impl InteractionOutput {
    /// An unset entry for an affordance declared in the TD.
    pub fn unset(schema: Option<DataSchema>) -> Self {
        Self {
            value: Value::String(UNSET_VALUE.into()),
            updated: None,
            schema,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn schema(&self) -> Option<&DataSchema> {
        self.schema.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.updated.is_some()
    }

    /// Replace the value. A missing timestamp means "now".
    pub fn update_value(&mut self, value: Value, updated: Option<DateTime<Utc>>) {
        self.value = value;
        self.updated = Some(updated.unwrap_or_else(Utc::now));
    }

    // ── Display helpers ─────────────────────────────────────────────

    /// Value as text followed by the schema's unit, if any.
    pub fn value_text(&self) -> String {
        let value = match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !self.is_set() {
            return value;
        }
        match self.schema.as_ref().and_then(|s| s.unit.as_deref()) {
            Some(unit) if !unit.is_empty() => format!("{value} {unit}"),
            _ => value,
        }
    }

    /// Local update time as `Fri 1 Mar 10:00`. Empty when unset.
    pub fn updated_short_text(&self) -> String {
        self.updated
            .map(|t| t.with_timezone(&Local).format("%a %-d %b %H:%M").to_string())
            .unwrap_or_default()
    }

    /// Human age of the update relative to `now`.
    pub fn age_text(&self, now: DateTime<Utc>) -> String {
        self.updated.map(|t| age_text(t, now)).unwrap_or_default()
    }
}

/// "N days ago", "1 hour ago", "5 minutes ago", or `n/a` past a year.
pub fn age_text(updated: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now - updated;
    let days = delta.num_days();
    let hours = delta.num_hours() % 24;
    let minutes = delta.num_minutes() % 60;

    match (days, hours, minutes) {
        (d, _, _) if d > 365 => UNSET_VALUE.to_owned(),
        (d, _, _) if d > 1 => format!("{d} days ago"),
        (1, _, _) => "1 day ago".to_owned(),
        (_, h, _) if h > 1 => format!("{h} hours ago"),
        (_, 1, _) => "1 hour ago".to_owned(),
        (_, _, 1) => "1 minute ago".to_owned(),
        (_, _, m) => format!("{m} minutes ago"),
    }
}
