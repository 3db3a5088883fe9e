// ── Consumed Thing ──
//
// Local proxy for one remote Thing: a live cache of property and event
// values plus the interaction API (invoke, write, observe, read-all).
// Outbound traffic goes through pluggable capabilities installed by the
// factory; without them the Thing is inert but still usable as a cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use hubsync_api::{PropertyValue, ThingDescription};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::interaction::{InteractionOutput, UNSET_VALUE};

// ── Capabilities ────────────────────────────────────────────────────

/// Outbound interaction capability, installed by a protocol binding.
pub trait ThingTransport: Send + Sync {
    /// Submit an action request. Resolves once the transport accepted it.
    fn invoke_action<'a>(
        &'a self,
        thing: &'a ConsumedThing,
        name: &'a str,
        params: Value,
    ) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Submit property write requests. There is no domain-level feedback;
    /// a successful write shows up later as a property change.
    fn write_properties<'a>(
        &'a self,
        thing: &'a ConsumedThing,
        values: HashMap<String, Value>,
    ) -> BoxFuture<'a, Result<(), CoreError>>;
}

/// Bulk property read capability, backed by the directory service.
pub trait PropertyReader: Send + Sync {
    fn read_properties<'a>(
        &'a self,
        thing_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, PropertyValue>, CoreError>>;
}

/// Callback for property changes and events: `(name, new output)`.
pub type ChangeListener = Arc<dyn Fn(&str, &InteractionOutput) + Send + Sync>;

// ── ConsumedThing ───────────────────────────────────────────────────

pub struct ConsumedThing {
    id: String,
    td: ArcSwap<ThingDescription>,
    properties: DashMap<String, InteractionOutput>,
    events: DashMap<String, InteractionOutput>,
    observers: DashMap<String, ChangeListener>,
    subscribers: DashMap<String, ChangeListener>,
    transport: RwLock<Option<Arc<dyn ThingTransport>>>,
    reader: RwLock<Option<Arc<dyn PropertyReader>>>,
    has_properties: AtomicBool,
    reading: AtomicBool,
    version: watch::Sender<u64>,
}

impl std::fmt::Debug for ConsumedThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumedThing")
            .field("id", &self.id)
            .field("properties", &self.properties.len())
            .field("events", &self.events.len())
            .field("has_properties", &self.has_properties())
            .finish_non_exhaustive()
    }
}

impl ConsumedThing {
    /// Create the proxy with an unset cache entry for every declared
    /// property and event.
    pub fn new(td: Arc<ThingDescription>) -> Self {
        let (version, _) = watch::channel(0u64);
        let thing = Self {
            id: td.id.clone(),
            td: ArcSwap::new(Arc::clone(&td)),
            properties: DashMap::new(),
            events: DashMap::new(),
            observers: DashMap::new(),
            subscribers: DashMap::new(),
            transport: RwLock::new(None),
            reader: RwLock::new(None),
            has_properties: AtomicBool::new(false),
            reading: AtomicBool::new(false),
            version,
        };
        thing.add_unset_entries(&td);
        thing
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current Thing Description.
    pub fn description(&self) -> Arc<ThingDescription> {
        self.td.load_full()
    }

    /// Swap in a newer TD. Cached values survive; newly declared names get
    /// unset entries.
    pub fn update_description(&self, td: Arc<ThingDescription>) {
        self.add_unset_entries(&td);
        self.td.store(td);
        self.bump_version();
    }

    // ── Cache access ────────────────────────────────────────────────

    pub fn property(&self, name: &str) -> Option<InteractionOutput> {
        self.properties.get(name).map(|r| r.value().clone())
    }

    pub fn event(&self, name: &str) -> Option<InteractionOutput> {
        self.events.get(name).map(|r| r.value().clone())
    }

    pub fn properties(&self) -> HashMap<String, InteractionOutput> {
        self.properties
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn events(&self) -> HashMap<String, InteractionOutput> {
        self.events
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Property value with unit, or `n/a` when the name is unknown.
    pub fn property_value_text(&self, name: &str) -> String {
        self.properties
            .get(name)
            .map_or_else(|| UNSET_VALUE.to_owned(), |io| io.value_text())
    }

    /// `true` once a bulk property read has succeeded.
    pub fn has_properties(&self) -> bool {
        self.has_properties.load(Ordering::Acquire)
    }

    /// Version counter, bumped on every cache or TD change.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Inbound updates ─────────────────────────────────────────────

    /// Apply a property value received from a binding and notify the
    /// property's observer.
    pub fn handle_property_change(&self, name: &str, value: Value, updated: Option<DateTime<Utc>>) {
        let output = {
            let mut entry = self.properties.entry(name.to_owned()).or_insert_with(|| {
                let schema = self.td.load().property(name).map(|p| p.schema.clone());
                InteractionOutput::unset(schema)
            });
            entry.update_value(value, updated);
            entry.value().clone()
        };
        self.bump_version();

        let observer = self.observers.get(name).map(|r| Arc::clone(r.value()));
        if let Some(observer) = observer {
            observer(name, &output);
        }
    }

    /// Apply an event received from a binding and notify its subscriber.
    pub fn handle_event(&self, name: &str, value: Value, updated: Option<DateTime<Utc>>) {
        let output = {
            let mut entry = self.events.entry(name.to_owned()).or_insert_with(|| {
                let schema = self.td.load().event(name).and_then(|e| e.data.clone());
                InteractionOutput::unset(schema)
            });
            entry.update_value(value, updated);
            entry.value().clone()
        };
        self.bump_version();

        let subscriber = self.subscribers.get(name).map(|r| Arc::clone(r.value()));
        if let Some(subscriber) = subscriber {
            subscriber(name, &output);
        }
    }

    // ── Observers ───────────────────────────────────────────────────

    /// Register the single observer of a property.
    ///
    /// Fails without replacing the existing observer if one is registered.
    pub fn observe_property(&self, name: &str, listener: ChangeListener) -> Result<(), CoreError> {
        Self::register(&self.observers, name, listener)
    }

    /// Returns `true` if an observer was removed.
    pub fn unobserve_property(&self, name: &str) -> bool {
        self.observers.remove(name).is_some()
    }

    /// Register the single subscriber of an event.
    pub fn subscribe_event(&self, name: &str, listener: ChangeListener) -> Result<(), CoreError> {
        Self::register(&self.subscribers, name, listener)
    }

    pub fn unsubscribe_event(&self, name: &str) -> bool {
        self.subscribers.remove(name).is_some()
    }

    // ── Outbound interaction ────────────────────────────────────────

    /// Request an action. Resolves once the transport accepted the
    /// request, not when the device finished it.
    pub async fn invoke_action(&self, name: &str, params: Value) -> Result<(), CoreError> {
        if self.td.load().action(name).is_none() {
            warn!(thing_id = %self.id, action = name, "action not defined in TD");
            return Err(CoreError::NotSupported {
                operation: format!("action '{name}' is not defined in TD '{}'", self.id),
            });
        }
        let transport = self.transport().ok_or_else(|| CoreError::NotSupported {
            operation: format!("actions on thing '{}'", self.id),
        })?;
        transport.invoke_action(self, name, params).await
    }

    /// Request a property change. Completes once submitted.
    pub async fn write_property(&self, name: &str, value: Value) -> Result<(), CoreError> {
        self.write_multiple_properties(HashMap::from([(name.to_owned(), value)]))
            .await
    }

    pub async fn write_multiple_properties(
        &self,
        values: HashMap<String, Value>,
    ) -> Result<(), CoreError> {
        {
            let td = self.td.load();
            if let Some(name) = values.keys().find(|n| td.property(n).is_none()) {
                return Err(CoreError::NotSupported {
                    operation: format!("property '{name}' is not defined in TD '{}'", self.id),
                });
            }
        }
        let transport = self.transport().ok_or_else(|| CoreError::NotSupported {
            operation: format!("writing properties on thing '{}'", self.id),
        })?;
        transport.write_properties(self, values).await
    }

    /// Read every property in one request, swallowing failures.
    ///
    /// See [`Self::try_read_all_properties`].
    pub async fn read_all_properties(&self) {
        if let Err(e) = self.try_read_all_properties().await {
            debug!(thing_id = %self.id, error = %e, "property read failed");
        }
    }

    /// Read every property in one request and apply the results.
    ///
    /// A call made while another read is outstanding returns `Ok` at once;
    /// the outstanding read is authoritative. Values whose name is also an
    /// event are applied to the event cache too.
    pub async fn try_read_all_properties(&self) -> Result<(), CoreError> {
        let Some(_guard) = ReadGuard::acquire(&self.reading) else {
            debug!(thing_id = %self.id, "property read already in progress");
            return Ok(());
        };
        let reader = self.reader().ok_or_else(|| CoreError::NotSupported {
            operation: format!("reading properties of thing '{}'", self.id),
        })?;

        let values = reader.read_properties(&self.id).await?;
        self.has_properties.store(true, Ordering::Release);
        debug!(thing_id = %self.id, count = values.len(), "properties loaded");

        for (name, pv) in values {
            if self.events.contains_key(&name) {
                self.handle_event(&name, pv.value.clone(), pv.updated);
            }
            self.handle_property_change(&name, pv.value, pv.updated);
        }
        Ok(())
    }

    // ── Capability hooks ────────────────────────────────────────────

    pub fn set_transport(&self, transport: Arc<dyn ThingTransport>) {
        *self.transport.write().expect("transport lock poisoned") = Some(transport);
    }

    pub fn set_property_reader(&self, reader: Arc<dyn PropertyReader>) {
        *self.reader.write().expect("reader lock poisoned") = Some(reader);
    }

    fn transport(&self) -> Option<Arc<dyn ThingTransport>> {
        self.transport
            .read()
            .expect("transport lock poisoned")
            .clone()
    }

    fn reader(&self) -> Option<Arc<dyn PropertyReader>> {
        self.reader.read().expect("reader lock poisoned").clone()
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn add_unset_entries(&self, td: &ThingDescription) {
        for (name, prop) in td.properties.iter().flatten() {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| InteractionOutput::unset(Some(prop.schema.clone())));
        }
        for (name, event) in td.events.iter().flatten() {
            self.events
                .entry(name.clone())
                .or_insert_with(|| InteractionOutput::unset(event.data.clone()));
        }
    }

    fn register(
        map: &DashMap<String, ChangeListener>,
        name: &str,
        listener: ChangeListener,
    ) -> Result<(), CoreError> {
        match map.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(CoreError::AlreadyObserved {
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(listener);
                Ok(())
            }
        }
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

/// Clears the in-progress flag on drop, including when the read future
/// is dropped mid-flight.
struct ReadGuard<'a>(&'a AtomicBool);

impl<'a> ReadGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::Notify;
    use tokio_test::task;

    fn sensor_td() -> Arc<ThingDescription> {
        let mut td: ThingDescription = serde_json::from_value(json!({
            "id": "urn:dev1:sensor",
            "properties": {
                "temperature": { "type": "number", "unit": "°C", "readOnly": true },
                "name": { "type": "string" },
                "alarm": { "type": "boolean" }
            },
            "events": {
                "alarm": { "data": { "type": "boolean" } },
                "motion": {}
            },
            "actions": { "reset": {} }
        }))
        .unwrap();
        td.normalize_names();
        Arc::new(td)
    }

    // ── Test doubles ────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingTransport {
        actions: Mutex<Vec<(String, Value)>>,
        writes: Mutex<Vec<HashMap<String, Value>>>,
    }

    impl ThingTransport for RecordingTransport {
        fn invoke_action<'a>(
            &'a self,
            _thing: &'a ConsumedThing,
            name: &'a str,
            params: Value,
        ) -> BoxFuture<'a, Result<(), CoreError>> {
            self.actions.lock().unwrap().push((name.to_owned(), params));
            Box::pin(async { Ok(()) })
        }

        fn write_properties<'a>(
            &'a self,
            _thing: &'a ConsumedThing,
            values: HashMap<String, Value>,
        ) -> BoxFuture<'a, Result<(), CoreError>> {
            self.writes.lock().unwrap().push(values);
            Box::pin(async { Ok(()) })
        }
    }

    /// Counts calls and blocks until released.
    #[derive(Default)]
    struct BlockingReader {
        calls: AtomicUsize,
        release: Notify,
    }

    impl PropertyReader for BlockingReader {
        fn read_properties<'a>(
            &'a self,
            _thing_id: &'a str,
        ) -> BoxFuture<'a, Result<HashMap<String, PropertyValue>, CoreError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                self.release.notified().await;
                Ok(HashMap::from([(
                    "temperature".to_owned(),
                    PropertyValue {
                        value: json!(21.5),
                        updated: None,
                    },
                )]))
            })
        }
    }

    struct FailingReader;

    impl PropertyReader for FailingReader {
        fn read_properties<'a>(
            &'a self,
            _thing_id: &'a str,
        ) -> BoxFuture<'a, Result<HashMap<String, PropertyValue>, CoreError>> {
            Box::pin(async {
                Err(CoreError::Unauthorized {
                    status: 401,
                    message: "expired".into(),
                })
            })
        }
    }

    // ── Construction ────────────────────────────────────────────────

    #[test]
    fn declared_names_start_unset() {
        let thing = ConsumedThing::new(sensor_td());
        let props = thing.properties();
        assert_eq!(props.len(), 3);
        for io in props.values() {
            assert_eq!(io.value(), &json!("n/a"));
            assert!(!io.is_set());
        }
        assert_eq!(thing.events().len(), 2);
        assert!(!thing.event("motion").unwrap().is_set());
        assert!(!thing.has_properties());
    }

    #[test]
    fn property_change_sets_value_and_notifies() {
        let thing = ConsumedThing::new(sensor_td());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        thing
            .observe_property(
                "temperature",
                Arc::new(move |name: &str, io: &InteractionOutput| {
                    sink.lock().unwrap().push((name.to_owned(), io.value().clone()));
                }),
            )
            .unwrap();

        let changes = thing.subscribe_changes();
        thing.handle_property_change("temperature", json!(22), None);

        assert!(thing.property("temperature").unwrap().is_set());
        assert_eq!(thing.property_value_text("temperature"), "22 °C");
        assert_eq!(*seen.lock().unwrap(), vec![("temperature".to_owned(), json!(22))]);
        assert!(changes.has_changed().unwrap());
    }

    #[test]
    fn undeclared_property_gets_entry() {
        let thing = ConsumedThing::new(sensor_td());
        thing.handle_property_change("battery", json!(80), None);
        assert_eq!(thing.property_value_text("battery"), "80");
        assert_eq!(thing.property_value_text("missing"), "n/a");
    }

    #[test]
    fn second_observer_is_rejected() {
        let thing = ConsumedThing::new(sensor_td());
        let first = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first);
        thing
            .observe_property(
                "name",
                Arc::new(move |_: &str, _: &InteractionOutput| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let err = thing
            .observe_property("name", Arc::new(|_: &str, _: &InteractionOutput| {}))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyObserved { .. }));

        // The first observer is still the active one.
        thing.handle_property_change("name", json!("kitchen"), None);
        assert_eq!(first.load(Ordering::SeqCst), 1);

        assert!(thing.unobserve_property("name"));
        assert!(!thing.unobserve_property("name"));
    }

    #[test]
    fn event_subscriber_receives_event() {
        let thing = ConsumedThing::new(sensor_td());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thing
            .subscribe_event(
                "motion",
                Arc::new(move |_: &str, _: &InteractionOutput| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        thing.handle_event("motion", json!(true), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(thing.event("motion").unwrap().value(), &json!(true));
        assert!(thing.unsubscribe_event("motion"));
    }

    // ── Outbound ────────────────────────────────────────────────────

    #[tokio::test]
    async fn undeclared_action_is_not_supported() {
        let thing = ConsumedThing::new(sensor_td());
        let transport = Arc::new(RecordingTransport::default());
        thing.set_transport(transport.clone());

        let err = thing.invoke_action("launch", json!(null)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotSupported { .. }));
        assert!(transport.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbound_thing_rejects_interaction() {
        let thing = ConsumedThing::new(sensor_td());
        let err = thing.invoke_action("reset", json!(null)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotSupported { .. }));
        let err = thing.write_property("name", json!("x")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotSupported { .. }));
    }

    #[tokio::test]
    async fn action_and_write_reach_transport() {
        let thing = ConsumedThing::new(sensor_td());
        let transport = Arc::new(RecordingTransport::default());
        thing.set_transport(transport.clone());

        thing.invoke_action("reset", json!({ "hard": true })).await.unwrap();
        thing.write_property("name", json!("hall")).await.unwrap();

        assert_eq!(
            *transport.actions.lock().unwrap(),
            vec![("reset".to_owned(), json!({ "hard": true }))]
        );
        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0]["name"], json!("hall"));

        // Writes do not touch the cache; only a later change event does.
        assert!(!thing.property("name").unwrap().is_set());
    }

    #[tokio::test]
    async fn undeclared_write_is_not_supported() {
        let thing = ConsumedThing::new(sensor_td());
        thing.set_transport(Arc::new(RecordingTransport::default()));
        let err = thing.write_property("volume", json!(3)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotSupported { .. }));
    }

    // ── Bulk read ───────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_reads_issue_one_request() {
        let thing = ConsumedThing::new(sensor_td());
        let reader = Arc::new(BlockingReader::default());
        thing.set_property_reader(reader.clone());

        let mut first = task::spawn(thing.read_all_properties());
        tokio_test::assert_pending!(first.poll());

        // Returns at once while the first read is outstanding.
        thing.read_all_properties().await;
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
        assert!(!thing.has_properties());

        reader.release.notify_one();
        tokio_test::assert_ready!(first.poll());
        drop(first);

        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
        assert!(thing.has_properties());
        assert_eq!(thing.property("temperature").unwrap().value(), &json!(21.5));

        // The guard is released afterwards.
        reader.release.notify_one();
        thing.read_all_properties().await;
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_read_leaves_flag_clear() {
        let thing = ConsumedThing::new(sensor_td());
        thing.set_property_reader(Arc::new(FailingReader));

        let err = thing.try_read_all_properties().await.unwrap_err();
        assert!(err.is_auth_expired());
        thing.read_all_properties().await;
        assert!(!thing.has_properties());
    }

    #[tokio::test]
    async fn read_applies_dual_purpose_names_to_events() {
        struct AlarmReader;
        impl PropertyReader for AlarmReader {
            fn read_properties<'a>(
                &'a self,
                _thing_id: &'a str,
            ) -> BoxFuture<'a, Result<HashMap<String, PropertyValue>, CoreError>> {
                Box::pin(async {
                    Ok(HashMap::from([(
                        "alarm".to_owned(),
                        PropertyValue {
                            value: json!(true),
                            updated: None,
                        },
                    )]))
                })
            }
        }

        let thing = ConsumedThing::new(sensor_td());
        thing.set_property_reader(Arc::new(AlarmReader));
        thing.try_read_all_properties().await.unwrap();

        assert_eq!(thing.property("alarm").unwrap().value(), &json!(true));
        assert_eq!(thing.event("alarm").unwrap().value(), &json!(true));
    }

    #[test]
    fn description_update_keeps_values() {
        let thing = ConsumedThing::new(sensor_td());
        thing.handle_property_change("name", json!("porch"), None);

        let mut td = ThingDescription::clone(&sensor_td());
        td.title = Some("Porch sensor".into());
        td.properties
            .get_or_insert_with(Default::default)
            .insert("humidity".into(), hubsync_api::PropertyAffordance::default());
        thing.update_description(Arc::new(td));

        assert_eq!(thing.description().title.as_deref(), Some("Porch sensor"));
        assert_eq!(thing.property("name").unwrap().value(), &json!("porch"));
        assert!(!thing.property("humidity").unwrap().is_set());
    }
}
