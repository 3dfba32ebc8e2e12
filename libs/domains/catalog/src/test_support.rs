use event_bus::{ConsumedEvent, ConsumerRecord, DomainEvent, EventEnvelope, TraceContext};

/// Wrap `event` as the consumer would hand it to a handler.
pub(crate) fn consumed<E: DomainEvent>(event: &E) -> ConsumedEvent {
    let envelope = EventEnvelope::from_event(event).unwrap();
    let record = ConsumerRecord {
        topic: event.topic().unwrap().to_string(),
        partition: 0,
        offset: "0".into(),
        key: Some(event.aggregate_id()),
        headers: Default::default(),
        value: envelope.encode().unwrap(),
    };
    ConsumedEvent::new(envelope, &record, TraceContext::new_root("product-read", "consume"))
}
