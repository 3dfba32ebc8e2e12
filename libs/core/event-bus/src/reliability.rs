//! Retry with backoff and dead-letter routing
//!
//! A failing record is retried in place, blocking its partition, until it
//! succeeds, its failure class is non-retryable, or `max_attempts` deliveries
//! have been made. It is then republished verbatim to `<topic>.DLT` on the
//! same partition with the same key. The caller must only commit the original
//! offset once [`ReliabilityLayer::execute`] returns `Ok`, so a dead-letter
//! publish failure leads to redelivery instead of loss.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::broker::{Broker, ConsumerRecord, ProducerRecord};
use crate::error::{BusError, ErrorClass, HandlerError};
use crate::headers;
use crate::metrics::BusMetrics;

const DLT_SUFFIX: &str = ".DLT";
const MAX_ERROR_MESSAGE_CHARS: usize = 1024;

/// Backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total deliveries, the first attempt included
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// Defaults:
    /// - max_attempts: 3
    /// - initial_interval: 1s
    /// - multiplier: 2.0
    /// - max_interval: 60s
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at `max_interval`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_interval.as_millis() as f64 * factor;
        let capped = millis.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
        }
    }
}

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DLT_SUFFIX}")
}

/// What was dead-lettered and why
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub original: ConsumerRecord,
    pub dead_letter_topic: String,
    pub reason: String,
    pub error_class: ErrorClass,
    pub attempts: u32,
}

/// Side effect run after a successful dead-letter publish (alerting, audit)
pub type DeadLetterCallback = Arc<dyn Fn(&DeadLetterRecord) + Send + Sync>;

/// Outcome of running a record through the layer
#[derive(Debug)]
pub enum Delivery<T> {
    Handled { value: T, attempts: u32 },
    DeadLettered(DeadLetterRecord),
    /// Shutdown arrived during a backoff; the record was neither handled nor
    /// dead-lettered and must not be committed.
    Interrupted,
}

#[derive(Clone)]
pub struct ReliabilityLayer {
    broker: Arc<dyn Broker>,
    policy: RetryPolicy,
    non_retryable: HashSet<ErrorClass>,
    metrics: BusMetrics,
    on_dead_letter: Option<DeadLetterCallback>,
}

impl fmt::Debug for ReliabilityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliabilityLayer")
            .field("policy", &self.policy)
            .field("non_retryable", &self.non_retryable)
            .field("on_dead_letter", &self.on_dead_letter.is_some())
            .finish_non_exhaustive()
    }
}

impl ReliabilityLayer {
    pub fn new(broker: Arc<dyn Broker>, metrics: BusMetrics) -> Self {
        Self {
            broker,
            policy: RetryPolicy::default(),
            non_retryable: ErrorClass::DEFAULT_NON_RETRYABLE.into_iter().collect(),
            metrics,
            on_dead_letter: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the set of classes that skip retry
    pub fn with_non_retryable(mut self, classes: impl IntoIterator<Item = ErrorClass>) -> Self {
        self.non_retryable = classes.into_iter().collect();
        self
    }

    pub fn with_dead_letter_callback(mut self, callback: DeadLetterCallback) -> Self {
        self.on_dead_letter = Some(callback);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        !self.non_retryable.contains(&class)
    }

    /// Run `attempt` (given the 1-based attempt number) until it succeeds or
    /// the record is dead-lettered.
    ///
    /// `Err` means the dead-letter publish itself failed; the record must be
    /// redelivered.
    pub async fn execute<T, F, Fut>(
        &self,
        record: &ConsumerRecord,
        shutdown: &mut watch::Receiver<bool>,
        mut attempt: F,
    ) -> Result<Delivery<T>, BusError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let mut number = 1;
        loop {
            let error = match attempt(number).await {
                Ok(value) => {
                    if number > 1 {
                        self.metrics.retry_succeeded(&record.topic);
                    }
                    return Ok(Delivery::Handled {
                        value,
                        attempts: number,
                    });
                }
                Err(error) => error,
            };

            let class = error.class();
            if !self.is_retryable(class) || number >= self.policy.max_attempts {
                let dead = self.dead_letter(record, &error, number).await?;
                return Ok(Delivery::DeadLettered(dead));
            }

            let delay = self.policy.delay_for(number);
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = %record.offset,
                attempt = number,
                max_attempts = self.policy.max_attempts,
                error_class = %class,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Dispatch failed, retrying"
            );
            self.metrics.retry(&record.topic);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(shutdown) => return Ok(Delivery::Interrupted),
            }
            number += 1;
        }
    }

    /// Republish `record` to its dead-letter topic and run the hooks.
    pub async fn dead_letter(
        &self,
        record: &ConsumerRecord,
        error: &HandlerError,
        attempts: u32,
    ) -> Result<DeadLetterRecord, BusError> {
        let class = error.class();
        let reason: String = error.to_string().chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
        let topic = dead_letter_topic(&record.topic);

        let mut dlt_headers = record.headers.clone();
        for (key, value) in [
            (headers::DLT_ORIGINAL_TOPIC, record.topic.clone()),
            (headers::DLT_ORIGINAL_PARTITION, record.partition.to_string()),
            (headers::DLT_ORIGINAL_OFFSET, record.offset.clone()),
            (headers::DLT_ERROR_CLASS, class.to_string()),
            (headers::DLT_ERROR_MESSAGE, reason.clone()),
            (headers::DLT_ATTEMPTS, attempts.to_string()),
        ] {
            dlt_headers.insert(key.to_string(), value);
        }

        let outbound = ProducerRecord {
            topic: topic.clone(),
            key: record.key.clone(),
            partition: Some(record.partition),
            headers: dlt_headers,
            value: record.value.clone(),
        };

        if let Err(e) = self.broker.send(outbound).await {
            self.metrics.dead_letter_failed(&record.topic);
            error!(
                topic = %record.topic,
                dead_letter_topic = %topic,
                offset = %record.offset,
                error = %e,
                "Dead-letter publish failed, record will be redelivered"
            );
            return Err(e);
        }

        self.metrics.dead_lettered(&record.topic, class.as_ref());
        error!(
            topic = %record.topic,
            partition = record.partition,
            offset = %record.offset,
            dead_letter_topic = %topic,
            error_class = %class,
            attempts,
            reason = %reason,
            "Record dead-lettered"
        );

        let dead = DeadLetterRecord {
            original: record.clone(),
            dead_letter_topic: topic,
            reason,
            error_class: class,
            attempts,
        };
        if let Some(callback) = &self.on_dead_letter {
            callback(&dead);
        }
        Ok(dead)
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
