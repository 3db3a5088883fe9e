// ── Message-bus protocol binding ──
//
// Connects one Consumed Thing to the message bus: outbound actions and
// property writes become publications, inbound event messages become
// cache updates.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use hubsync_api::topics::{self, SUBJECT_PROPERTIES, TOPIC_TYPE_EVENT};
use hubsync_api::{BusMessage, HandlerResult, MessageBus, MessageHandler, QoS};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::thing::{ConsumedThing, ThingTransport};

/// Bus binding for a single Consumed Thing.
pub struct MqttBinding {
    thing_id: String,
    thing: Weak<ConsumedThing>,
    bus: Arc<dyn MessageBus>,
    topic_prefix: Option<String>,
}

impl MqttBinding {
    pub fn new(
        thing: &Arc<ConsumedThing>,
        bus: Arc<dyn MessageBus>,
        topic_prefix: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            thing_id: thing.id().to_owned(),
            thing: Arc::downgrade(thing),
            bus,
            topic_prefix,
        })
    }

    /// Install this binding as the Thing's transport and subscribe to the
    /// Thing's event topic.
    pub fn bind(self: &Arc<Self>) {
        if let Some(thing) = self.thing.upgrade() {
            thing.set_transport(Arc::clone(self) as Arc<dyn ThingTransport>);
        }

        let weak = Arc::downgrade(self);
        let handler: MessageHandler = Arc::new(move |msg: &BusMessage| -> HandlerResult {
            match weak.upgrade() {
                Some(binding) => binding.handle_message(msg).map_err(Into::into),
                None => Ok(()),
            }
        });

        let topic = topics::event_topic(self.topic_prefix.as_deref(), &self.thing_id);
        debug!(thing_id = %self.thing_id, topic = %topic, "subscribing to thing events");
        self.bus.subscribe(&topic, QoS::AtLeastOnce, Some(handler));
    }

    /// Route an inbound bus message on this Thing's event topic.
    pub fn handle_message(&self, msg: &BusMessage) -> Result<(), CoreError> {
        let (_, topic_type, subject) = topics::split_topic(&msg.topic);
        if topic_type != TOPIC_TYPE_EVENT || subject.is_empty() {
            debug!(topic = %msg.topic, "ignoring non-event message");
            return Ok(());
        }
        self.handle_event(&subject, &msg.payload)
    }

    /// Apply one event payload.
    ///
    /// The `properties` subject carries a map of property name to value
    /// and is fanned out as property changes; anything else is a single
    /// named event. Payloads that are not JSON are kept as text.
    pub fn handle_event(&self, name: &str, payload: &[u8]) -> Result<(), CoreError> {
        let Some(thing) = self.thing.upgrade() else {
            return Ok(());
        };

        let value = serde_json::from_slice::<Value>(payload).unwrap_or_else(|_| {
            debug!(thing_id = %self.thing_id, event = name, "event payload is not JSON");
            Value::String(String::from_utf8_lossy(payload).into_owned())
        });

        if name != SUBJECT_PROPERTIES {
            thing.handle_event(name, value, None);
            return Ok(());
        }

        let Value::Object(props) = value else {
            warn!(thing_id = %self.thing_id, "properties event is not a JSON object");
            return Err(CoreError::Response {
                message: format!("properties event for '{}' is not an object", self.thing_id),
            });
        };
        for (prop, value) in props {
            thing.handle_property_change(&prop, value, None);
        }
        Ok(())
    }

    /// Removing the event subscription is not supported by this binding.
    pub fn unsubscribe(&self) -> Result<(), CoreError> {
        warn!(thing_id = %self.thing_id, "unsubscribe requested");
        Err(CoreError::NotImplemented {
            operation: format!("unsubscribe for thing '{}'", self.thing_id),
        })
    }

    fn publish_action<'a>(
        &'a self,
        name: &str,
        payload: &Value,
    ) -> Result<BoxFuture<'a, Result<(), hubsync_api::Error>>, CoreError> {
        let topic = topics::action_topic(self.topic_prefix.as_deref(), &self.thing_id, name);
        let bytes = serde_json::to_vec(payload)?;
        debug!(thing_id = %self.thing_id, topic = %topic, "publishing action");
        Ok(self.bus.publish_async(&topic, bytes))
    }
}

impl ThingTransport for MqttBinding {
    fn invoke_action<'a>(
        &'a self,
        _thing: &'a ConsumedThing,
        name: &'a str,
        params: Value,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            self.publish_action(name, &params)?.await?;
            Ok(())
        })
    }

    /// One publication per property, on the property's action topic.
    fn write_properties<'a>(
        &'a self,
        _thing: &'a ConsumedThing,
        values: HashMap<String, Value>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            for (name, value) in &values {
                self.publish_action(name, value)?.await?;
            }
            Ok(())
        })
    }
}
