//! Fire-and-forget event publisher
//!
//! `publish` never blocks on the broker: the send runs on its own task and
//! its outcome is only logged and counted. A process crash while a send is in
//! flight loses the event; there is no local buffering.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::broker::{Broker, ProducerRecord};
use crate::envelope::{DomainEvent, EventEnvelope};
use crate::headers;
use crate::metrics;
use crate::tracing_context::{TraceContext, with_context};

#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    service_name: String,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>, service_name: impl Into<String>) -> Self {
        Self {
            broker,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Send `event` to its declared topic, keyed by aggregate id.
    ///
    /// Returns `None` when the event was dropped up front (no topic, encode
    /// failure), otherwise the handle of the background send. Callers may
    /// ignore the handle; tests await it.
    pub fn publish<E: DomainEvent>(&self, event: &E, context: &TraceContext) -> Option<JoinHandle<()>> {
        let kind = event.kind();
        let Some(topic) = event.topic() else {
            warn!(event_type = %kind, "Event declares no topic, dropping it");
            return None;
        };

        let value = match EventEnvelope::from_event(event).and_then(|envelope| envelope.encode()) {
            Ok(value) => value,
            Err(e) => {
                error!(event_type = %kind, topic, error = %e, "Failed to encode event");
                return None;
            }
        };

        let mut record_headers = headers::Headers::new();
        record_headers.insert(headers::EVENT_TYPE.to_string(), kind.to_string());

        let record = ProducerRecord::new(topic, value)
            .with_key(event.aggregate_id())
            .with_headers(record_headers);

        Some(self.publish_record(record, context))
    }

    /// Send a prepared record. Tracing headers already on the record win.
    pub fn publish_record(&self, mut record: ProducerRecord, context: &TraceContext) -> JoinHandle<()> {
        if !context.inject_if_absent(&mut record.headers) {
            debug!(topic = %record.topic, "Record already carries a trace, keeping it");
        }

        let broker = Arc::clone(&self.broker);
        let topic = record.topic.clone();
        let send = async move {
            match broker.send(record).await {
                Ok(metadata) => {
                    metrics::event_published(&topic, true);
                    debug!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = %metadata.offset,
                        "Event published"
                    );
                }
                Err(e) => {
                    metrics::event_published(&topic, false);
                    error!(topic = %topic, error = %e, "Failed to publish event");
                }
            }
        };

        tokio::spawn(with_context(send, context))
    }
}
