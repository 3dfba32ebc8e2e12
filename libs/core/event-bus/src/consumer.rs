//! Generic consumer and dispatcher
//!
//! ```text
//! STOPPED -> SUBSCRIBED -> POLLING <-> DISPATCHING -> STOPPED
//! ```
//!
//! Each record is decoded, looked up in the [`HandlerRegistry`] and handed to
//! every matching handler in turn, all inside the [`ReliabilityLayer`]. The
//! offset is committed only after that returns: handled, ignored as unknown,
//! or safely dead-lettered. Handlers await their own writes, so a commit
//! always follows the projection update it covers.

use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerConsumer, ConsumerRecord};
use crate::config::ConsumerConfig;
use crate::envelope::{ConsumedEvent, EventEnvelope};
use crate::error::{BusError, HandlerError};
use crate::metrics::BusMetrics;
use crate::registry::HandlerRegistry;
use crate::reliability::{DeadLetterCallback, Delivery, ReliabilityLayer, wait_for_shutdown};
use crate::tracing_context::{TraceContext, with_context};

const MIN_POLL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
    Stopped,
    Subscribed,
    Polling,
    Dispatching,
}

/// Result of one successful dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Number of handlers invoked
    Dispatched(usize),
    /// No handler for this event type; not an error
    Unhandled,
}

pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    reliability: ReliabilityLayer,
    config: ConsumerConfig,
    metrics: BusMetrics,
    state: watch::Sender<ConsumerState>,
    worker_id: usize,
}

impl EventConsumer {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<HandlerRegistry>, config: ConsumerConfig) -> Self {
        let metrics = BusMetrics::new(config.group_id.clone());
        let reliability = ReliabilityLayer::new(Arc::clone(&broker), metrics.clone())
            .with_policy(config.retry.clone())
            .with_non_retryable(config.non_retryable.iter().copied());
        let (state, _) = watch::channel(ConsumerState::Stopped);

        Self {
            broker,
            registry,
            reliability,
            config,
            metrics,
            state,
            worker_id: 0,
        }
    }

    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn with_dead_letter_callback(mut self, callback: DeadLetterCallback) -> Self {
        self.reliability = self.reliability.with_dead_letter_callback(callback);
        self
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(worker = self.worker_id, from = %previous, to = %state, "Consumer state changed");
        }
    }

    /// Consume until `shutdown` flips to `true`.
    ///
    /// The record being dispatched when shutdown arrives is finished (or, if
    /// it is waiting out a backoff, left uncommitted) before the broker
    /// consumer is closed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        let subscription = self.config.subscription()?;
        let mut consumer = self
            .broker
            .subscribe(&self.config.group_id, &subscription)
            .await?;
        self.set_state(ConsumerState::Subscribed);

        info!(
            worker = self.worker_id,
            group = %self.config.group_id,
            pattern = %self.config.topic_pattern,
            handlers = self.registry.len(),
            "Consumer started"
        );

        let mut backoff = MIN_POLL_BACKOFF;
        'poll: while !*shutdown.borrow() {
            self.set_state(ConsumerState::Polling);

            let polled = tokio::select! {
                result = consumer.poll(self.config.batch_size, self.config.poll_timeout) => result,
                _ = wait_for_shutdown(&mut shutdown) => break 'poll,
            };

            let batch = match polled {
                Ok(batch) => {
                    backoff = MIN_POLL_BACKOFF;
                    batch
                }
                Err(e) => {
                    error!(worker = self.worker_id, error = %e, "Poll failed");
                    if self.pause(&mut backoff, &mut shutdown).await {
                        break 'poll;
                    }
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }

            self.set_state(ConsumerState::Dispatching);
            for (index, record) in batch.iter().enumerate() {
                if *shutdown.borrow() {
                    break 'poll;
                }

                match self.process(record, &mut shutdown).await {
                    Ok(true) => {
                        if let Err(e) = consumer.commit(record).await {
                            error!(
                                worker = self.worker_id,
                                topic = %record.topic,
                                partition = record.partition,
                                offset = %record.offset,
                                error = %e,
                                "Commit failed, remaining records will be redelivered"
                            );
                            rewind(consumer.as_mut(), &batch[index + 1..]).await;
                            continue 'poll;
                        }
                    }
                    Ok(false) => break 'poll,
                    Err(e) => {
                        warn!(
                            worker = self.worker_id,
                            topic = %record.topic,
                            offset = %record.offset,
                            error = %e,
                            "Record not settled, rewinding"
                        );
                        rewind(consumer.as_mut(), &batch[index..]).await;
                        if self.pause(&mut backoff, &mut shutdown).await {
                            break 'poll;
                        }
                        continue 'poll;
                    }
                }
            }
        }

        if let Err(e) = consumer.close().await {
            warn!(worker = self.worker_id, error = %e, "Failed to leave consumer group cleanly");
        }
        self.set_state(ConsumerState::Stopped);
        info!(worker = self.worker_id, group = %self.config.group_id, "Consumer stopped");
        Ok(())
    }

    /// Sleep for the current backoff and double it; `true` if shutdown came first.
    async fn pause(&self, backoff: &mut Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = *backoff;
        *backoff = (*backoff * 2).min(MAX_POLL_BACKOFF);
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = wait_for_shutdown(shutdown) => true,
        }
    }

    /// Run one record through the reliability layer.
    ///
    /// `Ok(true)` means commit, `Ok(false)` means stop without committing.
    async fn process(
        &self,
        record: &ConsumerRecord,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, BusError> {
        let started = Instant::now();
        let delivery = self
            .reliability
            .execute(record, shutdown, |attempt| self.dispatch(record, attempt))
            .await?;
        self.metrics.dispatch_duration(&record.topic, started.elapsed());

        let status = match delivery {
            Delivery::Handled {
                value: DispatchOutcome::Dispatched(_),
                ..
            } => "handled",
            Delivery::Handled {
                value: DispatchOutcome::Unhandled,
                ..
            } => "unhandled",
            Delivery::DeadLettered(_) => "dead_lettered",
            Delivery::Interrupted => {
                info!(
                    worker = self.worker_id,
                    topic = %record.topic,
                    offset = %record.offset,
                    "Shutdown during backoff, leaving record uncommitted"
                );
                return Ok(false);
            }
        };
        self.metrics.event_consumed(&record.topic, status);
        Ok(true)
    }

    /// Decode `record` and invoke every handler registered for its type.
    pub async fn dispatch(
        &self,
        record: &ConsumerRecord,
        attempt: u32,
    ) -> Result<DispatchOutcome, HandlerError> {
        let envelope = EventEnvelope::decode(&record.value)?;
        let context = TraceContext::extract(&record.headers)
            .child(format!("consume:{}", envelope.event_type));
        let event = ConsumedEvent::new(envelope, record, context);

        let handlers = self.registry.lookup(event.kind());
        if handlers.is_empty() {
            debug!(
                event_type = %event.kind(),
                topic = %record.topic,
                offset = %record.offset,
                "No handler registered, skipping"
            );
            return Ok(DispatchOutcome::Unhandled);
        }

        let dispatch = async {
            if attempt > 1 {
                debug!(attempt, event_type = %event.kind(), "Redelivering event");
            }
            for handler in handlers {
                handler.handle(&event).await.inspect_err(|e| {
                    warn!(
                        handler = handler.name(),
                        event_type = %event.kind(),
                        aggregate_id = %event.envelope.aggregate_id,
                        error = %e,
                        "Handler failed"
                    );
                })?;
            }
            Ok::<_, HandlerError>(DispatchOutcome::Dispatched(handlers.len()))
        };
        with_context(dispatch, &event.context).await
    }
}

/// Seek each partition in `remaining` back to its first unsettled record.
async fn rewind(consumer: &mut dyn BrokerConsumer, remaining: &[ConsumerRecord]) {
    let mut seen = Vec::new();
    for record in remaining {
        let partition = (record.topic.as_str(), record.partition);
        if seen.contains(&partition) {
            continue;
        }
        seen.push(partition);
        if let Err(e) = consumer.seek(record).await {
            warn!(topic = %record.topic, partition = record.partition, error = %e, "Seek failed");
        }
    }
}

/// `concurrency` consumers in one group, sharing one registry
pub struct ConsumerPool {
    consumers: Vec<Arc<EventConsumer>>,
}

impl ConsumerPool {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<HandlerRegistry>, config: ConsumerConfig) -> Self {
        let consumers = (0..config.concurrency.max(1))
            .map(|worker_id| {
                Arc::new(
                    EventConsumer::new(Arc::clone(&broker), Arc::clone(&registry), config.clone())
                        .with_worker_id(worker_id),
                )
            })
            .collect();
        Self { consumers }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn states(&self) -> Vec<ConsumerState> {
        self.consumers.iter().map(|c| c.state()).collect()
    }

    /// Run every consumer until shutdown; the first failure is returned once
    /// all of them have stopped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        let mut tasks = JoinSet::new();
        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { consumer.run(shutdown).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(BusError::from).and_then(|result| result);
            if let Err(e) = result {
                error!(error = %e, "Consumer exited with error");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, ProducerRecord};
    use crate::error::ErrorClass;
    use crate::headers;
    use crate::kind::EventKind;
    use crate::registry::handler_fn;
    use serde_json::json;
    use std::sync::Mutex;

    fn envelope_bytes(kind: &str, aggregate_id: &str) -> Vec<u8> {
        json!({
            "eventId": uuid::Uuid::now_v7(),
            "eventType": kind,
            "aggregateId": aggregate_id,
            "timestamp": chrono::Utc::now(),
            "payload": { "id": aggregate_id }
        })
        .to_string()
        .into_bytes()
    }

    fn consumer_record(kind: &str) -> ConsumerRecord {
        ConsumerRecord {
            topic: "customer.registered.event".into(),
            partition: 0,
            offset: "0".into(),
            key: Some("c-1".into()),
            headers: headers::Headers::new(),
            value: envelope_bytes(kind, "c-1"),
        }
    }

    fn consumer_with(registry: HandlerRegistry) -> (InMemoryBroker, EventConsumer) {
        let broker = InMemoryBroker::new(1);
        let consumer = EventConsumer::new(
            Arc::new(broker.clone()),
            Arc::new(registry),
            ConsumerConfig::new("test").with_poll_timeout(Duration::from_millis(20)),
        );
        (broker, consumer)
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type_is_unhandled() {
        let (_, consumer) = consumer_with(HandlerRegistry::new());
        let outcome = consumer
            .dispatch(&consumer_record("VendorOnboarded"), 1)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[tokio::test]
    async fn test_dispatch_malformed_payload_is_deserialization_error() {
        let (_, consumer) = consumer_with(HandlerRegistry::new());
        let mut record = consumer_record("CustomerRegistered");
        record.value = b"{oops".to_vec();

        let err = consumer.dispatch(&record, 1).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Deserialization);
    }

    #[tokio::test]
    async fn test_dispatch_creates_child_context() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let registry = HandlerRegistry::new().on(
            EventKind::CustomerRegistered,
            handler_fn("capture", move |event: ConsumedEvent| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = Some(event.context);
                    Ok(())
                }
            }),
        );
        let (_, consumer) = consumer_with(registry);

        let parent = TraceContext::new_root("customer-write", "RegisterCustomer");
        let mut record = consumer_record("CustomerRegistered");
        parent.inject(&mut record.headers);

        let outcome = consumer.dispatch(&record, 1).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched(1));

        let context = seen.lock().unwrap().clone().unwrap();
        assert_eq!(context.trace_id, parent.trace_id);
        assert_ne!(context.span_id, parent.span_id);
        assert_eq!(
            context.source_operation.as_deref(),
            Some("consume:CustomerRegistered")
        );
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_first_failing_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&calls);
        let second = Arc::clone(&calls);
        let registry = HandlerRegistry::new()
            .on(
                EventKind::CustomerRegistered,
                handler_fn("failing", move |_| {
                    let calls = Arc::clone(&first);
                    async move {
                        calls.lock().unwrap().push("failing");
                        Err(HandlerError::business("nope"))
                    }
                }),
            )
            .on(
                EventKind::CustomerRegistered,
                handler_fn("never", move |_| {
                    let calls = Arc::clone(&second);
                    async move {
                        calls.lock().unwrap().push("never");
                        Ok(())
                    }
                }),
            );
        let (_, consumer) = consumer_with(registry);

        let err = consumer
            .dispatch(&consumer_record("CustomerRegistered"), 1)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Business);
        assert_eq!(*calls.lock().unwrap(), vec!["failing"]);
    }

    #[tokio::test]
    async fn test_run_commits_and_stops() {
        let (broker, consumer) = consumer_with(HandlerRegistry::new());
        broker
            .send(
                ProducerRecord::new("customer.registered.event", envelope_bytes("CustomerRegistered", "c-1"))
                    .with_key("c-1"),
            )
            .await
            .unwrap();

        let consumer = Arc::new(consumer);
        let mut states = consumer.watch_state();
        let (tx, rx) = watch::channel(false);
        let running = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.run(rx).await })
        };

        let group = "test-group";
        for _ in 0..100 {
            if broker.committed_offset(group, "customer.registered.event", 0) == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.committed_offset(group, "customer.registered.event", 0), Some(1));

        tx.send(true).unwrap();
        running.await.unwrap().unwrap();
        states.wait_for(|s| *s == ConsumerState::Stopped).await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConsumerState::Subscribed.to_string(), "SUBSCRIBED");
        assert_eq!(ConsumerState::Dispatching.to_string(), "DISPATCHING");
    }

    #[test]
    fn test_pool_size_follows_concurrency() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(4));
        let pool = ConsumerPool::new(
            broker,
            Arc::new(HandlerRegistry::new()),
            ConsumerConfig::new("svc").with_concurrency(3),
        );
        assert_eq!(pool.len(), 3);
        assert!(pool.states().iter().all(|s| *s == ConsumerState::Stopped));
    }
}
