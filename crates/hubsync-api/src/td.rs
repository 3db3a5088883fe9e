// ── Thing Description wire types ──
//
// Serde models for the TD documents served by the directory and carried on
// `td` bus topics. Only the fields the runtime reads are typed; everything
// else round-trips through the flattened `extra` maps.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── ThingIdParts ────────────────────────────────────────────────────

/// Decomposition of a thing id of the form `urn:zone:publisher:device:type`.
///
/// Shorter ids drop fields from the front:
///
/// | parts | layout                             |
/// |-------|------------------------------------|
/// | 5     | `urn:zone:publisher:device:type`   |
/// | 4     | `urn:zone:device:type`             |
/// | 3     | `urn:device:type`                  |
/// | 2     | `urn:device`                       |
///
/// Anything else (including a missing `urn` prefix) yields all-empty parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThingIdParts {
    pub zone: String,
    pub publisher: String,
    pub device_id: String,
    pub device_type: String,
}

impl ThingIdParts {
    pub fn parse(thing_id: &str) -> Self {
        let parts: Vec<&str> = thing_id.split(':').collect();
        let is_urn = parts
            .first()
            .is_some_and(|p| p.eq_ignore_ascii_case("urn"));
        if !is_urn {
            return Self::default();
        }

        let owned = |s: &&str| (*s).to_owned();
        match parts.as_slice() {
            [_, zone, publisher, device, device_type] => Self {
                zone: owned(zone),
                publisher: owned(publisher),
                device_id: owned(device),
                device_type: owned(device_type),
            },
            [_, zone, device, device_type] => Self {
                zone: owned(zone),
                device_id: owned(device),
                device_type: owned(device_type),
                ..Self::default()
            },
            [_, device, device_type] => Self {
                device_id: owned(device),
                device_type: owned(device_type),
                ..Self::default()
            },
            [_, device] => Self {
                device_id: owned(device),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

// ── Data schema ─────────────────────────────────────────────────────

/// Shape and semantics of a property value or event payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<Value>>,

    /// Unit of measure, appended to displayed values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(rename = "readOnly", default)]
    pub read_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

// ── Affordances ─────────────────────────────────────────────────────

/// A property affordance: a data schema plus the name it is stored under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyAffordance {
    /// Affordance name, normalized to its map key on store insertion.
    #[serde(default)]
    pub id: String,

    #[serde(flatten)]
    pub schema: DataSchema,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An event affordance with the schema of its payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventAffordance {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSchema>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An action affordance with its input schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAffordance {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<DataSchema>,

    #[serde(default)]
    pub idempotent: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── ThingDescription ────────────────────────────────────────────────

/// A Thing Description document.
///
/// Collections are `Option` so a partial update can be told apart from one
/// that explicitly carries an empty collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingDescription {
    pub id: String,

    // Derived from the id by `apply_id_parts`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub publisher: String,
    #[serde(rename = "deviceID", default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(rename = "deviceType", default, skip_serializing_if = "String::is_empty")]
    pub device_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub at_type: Option<String>,

    /// ISO-8601 creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// ISO-8601 modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, PropertyAffordance>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<IndexMap<String, ActionAffordance>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<IndexMap<String, EventAffordance>>,

    /// Any top-level fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThingDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub fn property(&self, name: &str) -> Option<&PropertyAffordance> {
        self.properties.as_ref().and_then(|p| p.get(name))
    }

    pub fn action(&self, name: &str) -> Option<&ActionAffordance> {
        self.actions.as_ref().and_then(|a| a.get(name))
    }

    pub fn event(&self, name: &str) -> Option<&EventAffordance> {
        self.events.as_ref().and_then(|e| e.get(name))
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().flat_map(|p| p.keys().map(String::as_str))
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().flat_map(|a| a.keys().map(String::as_str))
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().flat_map(|e| e.keys().map(String::as_str))
    }

    /// Names of read-only properties (device attributes).
    pub fn attribute_names(&self) -> Vec<&str> {
        self.properties
            .iter()
            .flatten()
            .filter(|(_, p)| p.schema.read_only)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Write the zone/publisher/device/type parts decoded from the id.
    pub fn apply_id_parts(&mut self) {
        let parts = ThingIdParts::parse(&self.id);
        self.zone = parts.zone;
        self.publisher = parts.publisher;
        self.device_id = parts.device_id;
        self.device_type = parts.device_type;
    }

    /// Shallow merge: every field present in `other` overwrites the
    /// corresponding field here; absent fields are left untouched.
    /// Collections are replaced as a whole, not merged per entry.
    pub fn extend(&mut self, other: Self) {
        fn take<T>(dst: &mut Option<T>, src: Option<T>) {
            if src.is_some() {
                *dst = src;
            }
        }
        fn take_str(dst: &mut String, src: String) {
            if !src.is_empty() {
                *dst = src;
            }
        }

        take_str(&mut self.id, other.id);
        take_str(&mut self.zone, other.zone);
        take_str(&mut self.publisher, other.publisher);
        take_str(&mut self.device_id, other.device_id);
        take_str(&mut self.device_type, other.device_type);
        take(&mut self.title, other.title);
        take(&mut self.description, other.description);
        take(&mut self.at_type, other.at_type);
        take(&mut self.created, other.created);
        take(&mut self.modified, other.modified);
        take(&mut self.properties, other.properties);
        take(&mut self.actions, other.actions);
        take(&mut self.events, other.events);
        self.extra.extend(other.extra);
    }

    /// Set every affordance's `id` to the key it is stored under.
    pub fn normalize_names(&mut self) {
        for (name, prop) in self.properties.iter_mut().flatten() {
            prop.id.clone_from(name);
        }
        for (name, action) in self.actions.iter_mut().flatten() {
            action.id.clone_from(name);
        }
        for (name, event) in self.events.iter_mut().flatten() {
            event.id.clone_from(name);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn id_parts_full_urn() {
        let parts = ThingIdParts::parse("urn:zoneA:pub1:dev1:sensor");
        assert_eq!(
            parts,
            ThingIdParts {
                zone: "zoneA".into(),
                publisher: "pub1".into(),
                device_id: "dev1".into(),
                device_type: "sensor".into(),
            }
        );
    }

    #[test]
    fn id_parts_four_parts_has_no_publisher() {
        let parts = ThingIdParts::parse("urn:zoneA:dev1:sensor");
        assert_eq!(parts.zone, "zoneA");
        assert_eq!(parts.publisher, "");
        assert_eq!(parts.device_id, "dev1");
        assert_eq!(parts.device_type, "sensor");
    }

    #[test]
    fn id_parts_three_parts() {
        let parts = ThingIdParts::parse("urn:dev1:sensor");
        assert_eq!(
            parts,
            ThingIdParts {
                device_id: "dev1".into(),
                device_type: "sensor".into(),
                ..ThingIdParts::default()
            }
        );
    }

    #[test]
    fn id_parts_bare_device() {
        let parts = ThingIdParts::parse("URN:dev1");
        assert_eq!(parts.device_id, "dev1");
        assert_eq!(parts.device_type, "");
    }

    #[test]
    fn id_parts_unconventional_ids_are_empty() {
        assert_eq!(ThingIdParts::parse("dev1:sensor"), ThingIdParts::default());
        assert_eq!(ThingIdParts::parse("urn"), ThingIdParts::default());
        assert_eq!(
            ThingIdParts::parse("urn:a:b:c:d:e"),
            ThingIdParts::default()
        );
    }

    #[test]
    fn deserialize_keeps_unknown_fields() {
        let td: ThingDescription = serde_json::from_value(json!({
            "id": "urn:dev1:sensor",
            "@type": "sensor",
            "title": "Temp sensor",
            "support": "https://example.org",
            "properties": {
                "temperature": {
                    "type": "number",
                    "unit": "C",
                    "readOnly": true,
                    "forms": []
                }
            }
        }))
        .unwrap();

        assert_eq!(td.at_type.as_deref(), Some("sensor"));
        assert_eq!(td.extra.get("support"), Some(&json!("https://example.org")));
        let prop = td.property("temperature").unwrap();
        assert_eq!(prop.schema.unit.as_deref(), Some("C"));
        assert!(prop.schema.read_only);
        assert!(prop.extra.contains_key("forms"));
        assert!(!prop.extra.contains_key("unit"));
        assert_eq!(td.attribute_names(), vec!["temperature"]);
    }

    #[test]
    fn extend_overwrites_present_fields_only() {
        let mut base = ThingDescription {
            title: Some("old".into()),
            description: Some("kept".into()),
            ..ThingDescription::new("urn:dev1")
        };
        let update = ThingDescription {
            title: Some("new".into()),
            ..ThingDescription::new("urn:dev1")
        };

        base.extend(update);
        assert_eq!(base.title.as_deref(), Some("new"));
        assert_eq!(base.description.as_deref(), Some("kept"));
    }

    #[test]
    fn normalize_names_matches_keys() {
        let mut td: ThingDescription = serde_json::from_value(json!({
            "id": "urn:dev1",
            "properties": { "p1": { "id": "wrong" } },
            "actions": { "a1": {} },
            "events": { "e1": {} }
        }))
        .unwrap();

        td.normalize_names();
        assert_eq!(td.property("p1").unwrap().id, "p1");
        assert_eq!(td.action("a1").unwrap().id, "a1");
        assert_eq!(td.event("e1").unwrap().id, "e1");
    }
}
