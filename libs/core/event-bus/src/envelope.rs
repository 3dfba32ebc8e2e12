//! Wire envelope for domain events

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::broker::ConsumerRecord;
use crate::error::{BusError, HandlerError};
use crate::kind::EventKind;
use crate::tracing_context::TraceContext;

/// A typed domain event that can be published.
///
/// The aggregate id doubles as the partition key, so every event of one
/// aggregate lands on the same partition and is consumed in order.
pub trait DomainEvent: Serialize + Send + Sync {
    fn kind(&self) -> EventKind;

    fn aggregate_id(&self) -> String;

    /// Target topic; `None` means the event is not routable.
    fn topic(&self) -> Option<&'static str> {
        self.kind().topic()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventKind,
    pub aggregate_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self, BusError> {
        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type: event.kind(),
            aggregate_id: event.aggregate_id(),
            timestamp: event.occurred_at(),
            payload: serde_json::to_value(event)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HandlerError> {
        serde_json::from_slice(bytes).map_err(HandlerError::from)
    }

    /// Decode the payload into a concrete event type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        T::deserialize(&self.payload).map_err(HandlerError::from)
    }
}

/// A decoded record handed to handlers, with the context of the consuming hop
#[derive(Debug, Clone)]
pub struct ConsumedEvent {
    pub envelope: EventEnvelope,
    pub context: TraceContext,
    pub topic: String,
    pub partition: u32,
    pub offset: String,
}

impl ConsumedEvent {
    pub fn new(envelope: EventEnvelope, record: &ConsumerRecord, context: TraceContext) -> Self {
        Self {
            envelope,
            context,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset.clone(),
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.envelope.event_type
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        self.envelope.payload_as()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct EmailChanged {
        customer_id: String,
        new_email: String,
    }

    impl DomainEvent for EmailChanged {
        fn kind(&self) -> EventKind {
            EventKind::CustomerEmailChanged
        }

        fn aggregate_id(&self) -> String {
            self.customer_id.clone()
        }
    }

    #[test]
    fn test_envelope_wraps_event() {
        let event = EmailChanged {
            customer_id: "c-1".into(),
            new_email: "c@d.com".into(),
        };
        let envelope = EventEnvelope::from_event(&event).unwrap();

        assert_eq!(envelope.event_type, EventKind::CustomerEmailChanged);
        assert_eq!(envelope.aggregate_id, "c-1");
        assert_eq!(envelope.payload["newEmail"], "c@d.com");
        assert_eq!(event.topic(), Some("customer.email-changed.event"));

        let decoded = EventEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload_as::<EmailChanged>().unwrap(), event);
    }

    #[test]
    fn test_body_uses_camel_case_fields() {
        let envelope = EventEnvelope {
            event_id: Uuid::now_v7(),
            event_type: EventKind::ProductDeleted,
            aggregate_id: "p-1".into(),
            timestamp: Utc::now(),
            payload: json!({}),
        };
        let body: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(body["eventType"], "ProductDeleted");
        assert_eq!(body["aggregateId"], "p-1");
        assert!(body.get("eventId").is_some());
    }

    #[test]
    fn test_unknown_type_decodes_as_unrecognized() {
        let raw = json!({
            "eventId": Uuid::now_v7(),
            "eventType": "VendorOnboarded",
            "aggregateId": "v-1",
            "timestamp": Utc::now(),
            "payload": {}
        });
        let envelope = EventEnvelope::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.event_type, EventKind::Unrecognized("VendorOnboarded".into()));
    }

    #[test]
    fn test_malformed_body_is_deserialization_error() {
        let err = EventEnvelope::decode(b"{\"eventType\":").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Deserialization);
    }

    #[test]
    fn test_payload_schema_mismatch_is_deserialization_error() {
        let envelope = EventEnvelope {
            event_id: Uuid::now_v7(),
            event_type: EventKind::CustomerEmailChanged,
            aggregate_id: "c-1".into(),
            timestamp: Utc::now(),
            payload: json!({ "customerId": 7 }),
        };
        let err = envelope.payload_as::<EmailChanged>().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Deserialization);
    }
}
