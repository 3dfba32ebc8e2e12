//! Partitioned-log broker abstraction
//!
//! A topic is split into partitions; records with the same key always land on
//! the same partition and are delivered in order within it. Consumers join a
//! named group, the broker spreads partitions across the group's members, and
//! progress is only recorded by an explicit [`BrokerConsumer::commit`].

pub mod memory;
pub mod redis_streams;

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

use crate::error::BusError;
use crate::headers::Headers;

pub use self::memory::InMemoryBroker;
pub use self::redis_streams::RedisStreamsBroker;

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Option<String>,
    /// Explicit partition, overrides key hashing
    pub partition: Option<u32>,
    pub headers: Headers,
    pub value: Vec<u8>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            partition: None,
            headers: Headers::new(),
            value,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Where a sent record ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    pub offset: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: u32,
    /// Backend-specific position: a sequence number in memory, a stream
    /// entry id in Redis
    pub offset: String,
    pub key: Option<String>,
    pub headers: Headers,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Subscription {
    Topics(Vec<String>),
    /// Topic names matching the whole regex
    Pattern(Regex),
}

impl Subscription {
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Subscription::Topics(topics.into_iter().map(Into::into).collect())
    }

    /// Compile `pattern` anchored at both ends.
    pub fn pattern(pattern: &str) -> Result<Self, BusError> {
        Ok(Subscription::Pattern(Regex::new(&format!("^(?:{pattern})$"))?))
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Subscription::Topics(topics) => topics.iter().any(|t| t == topic),
            Subscription::Pattern(regex) => regex.is_match(topic),
        }
    }
}

/// Stable partition for `key` (FNV-1a), keyless records go to partition 0.
pub fn partition_for(key: Option<&str>, partitions: u32) -> u32 {
    let Some(key) = key else {
        return 0;
    };
    if partitions <= 1 {
        return 0;
    }

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % u64::from(partitions)) as u32
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BusError>;

    async fn subscribe(
        &self,
        group: &str,
        subscription: &Subscription,
    ) -> Result<Box<dyn BrokerConsumer>, BusError>;
}

/// One group member's view of its assigned partitions
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Wait up to `timeout` for records; returns an empty batch on timeout.
    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<ConsumerRecord>, BusError>;

    /// Mark `record` and everything before it on its partition as processed.
    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BusError>;

    /// Rewind so `record` and its successors on that partition are fetched again.
    async fn seek(&mut self, record: &ConsumerRecord) -> Result<(), BusError>;

    /// Leave the group; uncommitted records go to the remaining members.
    async fn close(&mut self) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_for_is_stable() {
        let first = partition_for(Some("customer-42"), 8);
        for _ in 0..10 {
            assert_eq!(partition_for(Some("customer-42"), 8), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn test_partition_for_without_key_or_partitions() {
        assert_eq!(partition_for(None, 8), 0);
        assert_eq!(partition_for(Some("anything"), 1), 0);
        assert_eq!(partition_for(Some("anything"), 0), 0);
    }

    #[test]
    fn test_partition_for_spreads_keys() {
        let used: std::collections::HashSet<u32> = (0..100)
            .map(|i| partition_for(Some(&format!("aggregate-{i}")), 4))
            .collect();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_pattern_subscription_is_full_match() {
        let subscription = Subscription::pattern(r".*\.event").unwrap();
        assert!(subscription.matches("customer.registered.event"));
        assert!(!subscription.matches("customer.registered.event.DLT"));
        assert!(!subscription.matches("event"));
    }

    #[test]
    fn test_topic_subscription() {
        let subscription = Subscription::topics(["a.event", "b.event"]);
        assert!(subscription.matches("b.event"));
        assert!(!subscription.matches("c.event"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            Subscription::pattern("(unclosed"),
            Err(BusError::InvalidPattern(_))
        ));
    }
}
