// ── Message bus topic grammar ──
//
// Topics look like `[{prefix}/]things/{thingID}/{topicType}[/{subject}]`
// where topicType is one of `td`, `event` or `action`.

/// Topic type for Thing Description updates.
pub const TOPIC_TYPE_TD: &str = "td";
/// Topic type for events, including batched property changes.
pub const TOPIC_TYPE_EVENT: &str = "event";
/// Topic type for action requests (also used for property writes).
pub const TOPIC_TYPE_ACTION: &str = "action";
/// Event subject carrying a map of property name to value.
pub const SUBJECT_PROPERTIES: &str = "properties";

const THINGS_SEGMENT: &str = "things";
const SYS_PREFIX: &str = "$SYS/";

/// Break a topic into `(thing_id, topic_type, subject)`.
///
/// The thing id is the segment following `things`. Topics without a
/// `things` segment are read positionally (`{x}/{id}/{type}/{subject}`).
/// Topics with fewer than two segments yield three empty strings.
pub fn split_topic(topic: &str) -> (String, String, String) {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 2 {
        return (String::new(), String::new(), String::new());
    }

    let id_index = parts
        .iter()
        .position(|p| *p == THINGS_SEGMENT)
        .map_or(1, |i| i + 1);

    let segment = |i: usize| parts.get(i).map(|s| (*s).to_owned()).unwrap_or_default();
    (
        segment(id_index),
        segment(id_index + 1),
        segment(id_index + 2),
    )
}

fn with_prefix(prefix: Option<&str>, rest: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}/{rest}", p.trim_end_matches('/')),
        _ => rest.to_owned(),
    }
}

/// Wildcard subscription covering every event of a Thing.
pub fn event_topic(prefix: Option<&str>, thing_id: &str) -> String {
    with_prefix(prefix, &format!("{THINGS_SEGMENT}/{thing_id}/{TOPIC_TYPE_EVENT}/#"))
}

/// Publish target for an action or property write.
pub fn action_topic(prefix: Option<&str>, thing_id: &str, name: &str) -> String {
    with_prefix(
        prefix,
        &format!("{THINGS_SEGMENT}/{thing_id}/{TOPIC_TYPE_ACTION}/{name}"),
    )
}

/// Topic carrying TD updates. Use `+` as the thing id to cover all Things.
pub fn td_topic(prefix: Option<&str>, thing_id: &str) -> String {
    with_prefix(prefix, &format!("{THINGS_SEGMENT}/{thing_id}/{TOPIC_TYPE_TD}"))
}

/// Broker diagnostics live under the reserved `$SYS/` prefix.
pub fn is_sys_topic(topic: &str) -> bool {
    topic.starts_with(SYS_PREFIX)
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Filters starting with a wildcard never match `$` topics.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(topic: &str) -> (String, String, String) {
        split_topic(topic)
    }

    #[test]
    fn split_prefixed_properties_topic() {
        assert_eq!(
            split("prefix/things/abc123/event/properties"),
            ("abc123".into(), "event".into(), "properties".into())
        );
    }

    #[test]
    fn split_unprefixed_td_topic() {
        assert_eq!(
            split("things/urn:dev1/td"),
            ("urn:dev1".into(), "td".into(), String::new())
        );
    }

    #[test]
    fn split_too_short() {
        assert_eq!(split("x"), (String::new(), String::new(), String::new()));
        assert_eq!(split(""), (String::new(), String::new(), String::new()));
    }

    #[test]
    fn split_without_things_segment_is_positional() {
        assert_eq!(
            split("acct/dev1/event/alarm"),
            ("dev1".into(), "event".into(), "alarm".into())
        );
    }

    #[test]
    fn builders_apply_prefix() {
        assert_eq!(event_topic(None, "dev1"), "things/dev1/event/#");
        assert_eq!(
            action_topic(Some("acct/"), "dev1", "switch"),
            "acct/things/dev1/action/switch"
        );
        assert_eq!(td_topic(Some(""), "+"), "things/+/td");
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("things/dev1/event/#", "things/dev1/event/properties"));
        assert!(topic_matches("things/dev1/event/#", "things/dev1/event"));
        assert!(topic_matches("things/+/td", "things/dev9/td"));
        assert!(!topic_matches("things/+/td", "things/dev9/event"));
        assert!(!topic_matches("things/dev1/event", "things/dev1/event/x"));
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
    }

    #[test]
    fn sys_topics() {
        assert!(is_sys_topic("$SYS/broker/clients/connected"));
        assert!(!is_sys_topic("things/$SYS/td"));
    }
}
