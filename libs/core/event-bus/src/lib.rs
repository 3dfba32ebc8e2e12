//! Event distribution and reliability layer
//!
//! Publishes typed domain events onto a partitioned log, consumes them in
//! named groups, dispatches each record to the handlers registered for its
//! event type, retries failures with capped exponential backoff and routes
//! poison records to `<topic>.DLT`. Trace ids travel in record headers and are
//! bound to every handler invocation through `tracing` spans.
//!
//! ## Delivery guarantees
//!
//! - At-least-once: offsets are committed only after dispatch (or the
//!   dead-letter publish) has completed.
//! - Per-aggregate ordering: records are keyed by aggregate id, so one
//!   aggregate always maps to one partition.
//! - Publishing is fire-and-forget; a send that fails is logged and counted,
//!   never retried here.
//!
//! ## Example
//!
//! ```ignore
//! use event_bus::{ConsumerConfig, ConsumerPool, HandlerRegistry, InMemoryBroker, handler_fn};
//!
//! let broker = Arc::new(InMemoryBroker::new(3));
//! let registry = HandlerRegistry::new().on(
//!     EventKind::CustomerRegistered,
//!     handler_fn("welcome-mail", |event| async move { send_welcome(&event).await }),
//! );
//! let pool = ConsumerPool::new(broker, Arc::new(registry), ConsumerConfig::new("mailer"));
//! pool.run(shutdown_rx).await?;
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod kind;
pub mod metrics;
pub mod projection;
pub mod publisher;
pub mod registry;
pub mod reliability;
pub mod tracing_context;

pub use broker::{
    Broker, BrokerConsumer, ConsumerRecord, InMemoryBroker, ProducerRecord, RecordMetadata,
    RedisStreamsBroker, Subscription,
};
pub use config::{BrokerBackend, BrokerConfig, ConsumerConfig};
pub use consumer::{ConsumerPool, ConsumerState, DispatchOutcome, EventConsumer};
pub use envelope::{ConsumedEvent, DomainEvent, EventEnvelope};
pub use error::{BusError, ErrorClass, HandlerError};
pub use headers::Headers;
pub use kind::EventKind;
pub use metrics::{BusMetrics, init_metrics, render_metrics};
pub use projection::{Provenance, stamped};
pub use publisher::EventPublisher;
pub use registry::{EventHandler, HandlerRegistry, handler_fn};
pub use reliability::{
    DeadLetterCallback, DeadLetterRecord, Delivery, ReliabilityLayer, RetryPolicy,
    dead_letter_topic,
};
pub use tracing_context::{TraceContext, with_context};

use std::sync::Arc;
use tracing::info;

/// Build the broker selected by `config`.
pub async fn connect_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>, BusError> {
    match config.backend {
        BrokerBackend::Memory => {
            info!(partitions = config.partitions, "Using in-memory broker");
            Ok(Arc::new(InMemoryBroker::with_limits(
                config.partitions,
                config.max_message_bytes,
            )))
        }
        BrokerBackend::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| BusError::Unavailable("no broker URL configured".to_string()))?;
            let broker = RedisStreamsBroker::connect(url, config.partitions)
                .await?
                .with_max_length(config.max_stream_length)
                .with_max_message_bytes(config.max_message_bytes);
            Ok(Arc::new(broker))
        }
    }
}
