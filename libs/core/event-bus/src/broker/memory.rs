//! In-process broker with the same delivery semantics as the Redis backend
//!
//! Used by tests and by single-process deployments (`BROKER_BACKEND=memory`).
//! Records are kept forever; committed offsets are tracked per group, and a
//! member that is dropped without committing leaves its records to be
//! redelivered to whoever takes over the partition.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{
    Broker, BrokerConsumer, ConsumerRecord, ProducerRecord, RecordMetadata, Subscription,
    partition_for,
};
use crate::error::BusError;
use crate::headers::Headers;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

type TopicPartition = (String, u32);

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    headers: Headers,
    value: Vec<u8>,
}

#[derive(Default)]
struct GroupState {
    committed: HashMap<TopicPartition, u64>,
    members: BTreeMap<u64, Subscription>,
}

#[derive(Default)]
struct LogState {
    topics: BTreeMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, GroupState>,
    rejected: HashSet<String>,
    next_member: u64,
}

impl LogState {
    /// Partitions owned by `member`: every matching partition is handed to
    /// the eligible members round-robin, in member-id order.
    fn assignment(&self, group: &str, member: u64) -> Vec<TopicPartition> {
        let Some(state) = self.groups.get(group) else {
            return Vec::new();
        };

        let mut owned = Vec::new();
        let mut index = 0usize;
        for (topic, partitions) in &self.topics {
            let eligible: Vec<u64> = state
                .members
                .iter()
                .filter(|(_, subscription)| subscription.matches(topic))
                .map(|(id, _)| *id)
                .collect();
            if eligible.is_empty() {
                continue;
            }
            for partition in 0..partitions.len() as u32 {
                if eligible[index % eligible.len()] == member {
                    owned.push((topic.clone(), partition));
                }
                index += 1;
            }
        }
        owned
    }
}

struct Shared {
    state: Mutex<LogState>,
    appended: Notify,
    partitions: u32,
    max_message_bytes: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self::with_limits(partitions, DEFAULT_MAX_MESSAGE_BYTES)
    }

    pub fn with_limits(partitions: u32, max_message_bytes: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LogState::default()),
                appended: Notify::new(),
                partitions: partitions.max(1),
                max_message_bytes,
            }),
        }
    }

    /// Every record of `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<ConsumerRecord> {
        let state = self.shared.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, stored)| ConsumerRecord {
                    topic: topic.to_string(),
                    partition: partition as u32,
                    offset: offset.to_string(),
                    key: stored.key.clone(),
                    headers: stored.headers.clone(),
                    value: stored.value.clone(),
                })
            })
            .collect()
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.shared.lock().topics.keys().cloned().collect()
    }

    /// Next offset `group` will read from the partition, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.shared
            .lock()
            .groups
            .get(group)
            .and_then(|state| state.committed.get(&(topic.to_string(), partition)))
            .copied()
    }

    /// Make sends to `topic` fail as if the broker were unreachable.
    pub fn reject_topic(&self, topic: &str) {
        self.shared.lock().rejected.insert(topic.to_string());
    }

    pub fn accept_topic(&self, topic: &str) {
        self.shared.lock().rejected.remove(topic);
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BusError> {
        if record.value.len() > self.shared.max_message_bytes {
            return Err(BusError::MessageTooLarge {
                size: record.value.len(),
                limit: self.shared.max_message_bytes,
            });
        }

        let metadata = {
            let mut state = self.shared.lock();
            if state.rejected.contains(&record.topic) {
                return Err(BusError::Unavailable(format!(
                    "topic '{}' is not accepting writes",
                    record.topic
                )));
            }

            let default_partitions = self.shared.partitions;
            let partitions = state.topics.entry(record.topic.clone()).or_insert_with(|| {
                let count = record
                    .partition
                    .map_or(default_partitions, |p| default_partitions.max(p + 1));
                vec![Vec::new(); count as usize]
            });

            let partition = record
                .partition
                .unwrap_or_else(|| partition_for(record.key.as_deref(), partitions.len() as u32));
            let log = partitions
                .get_mut(partition as usize)
                .ok_or_else(|| BusError::UnknownPartition {
                    topic: record.topic.clone(),
                    partition,
                })?;

            log.push(StoredRecord {
                key: record.key,
                headers: record.headers,
                value: record.value,
            });

            RecordMetadata {
                topic: record.topic,
                partition,
                offset: (log.len() - 1).to_string(),
            }
        };

        self.shared.appended.notify_waiters();
        Ok(metadata)
    }

    async fn subscribe(
        &self,
        group: &str,
        subscription: &Subscription,
    ) -> Result<Box<dyn BrokerConsumer>, BusError> {
        let member = {
            let mut state = self.shared.lock();
            state.next_member += 1;
            let member = state.next_member;
            state
                .groups
                .entry(group.to_string())
                .or_default()
                .members
                .insert(member, subscription.clone());
            member
        };
        self.shared.appended.notify_waiters();

        debug!(group, member, "Joined consumer group");

        Ok(Box::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            group: group.to_string(),
            member,
            positions: HashMap::new(),
            closed: false,
        }))
    }
}

struct InMemoryConsumer {
    shared: Arc<Shared>,
    group: String,
    member: u64,
    /// Next offset to fetch per owned partition
    positions: HashMap<TopicPartition, u64>,
    closed: bool,
}

impl InMemoryConsumer {
    fn fetch(&mut self, max: usize) -> Result<Vec<ConsumerRecord>, BusError> {
        let state = self.shared.lock();
        let group = state
            .groups
            .get(&self.group)
            .filter(|group| group.members.contains_key(&self.member))
            .ok_or_else(|| BusError::NotAMember(self.group.clone()))?;

        let owned = state.assignment(&self.group, self.member);

        // Partitions picked up since the last poll restart from the
        // group's committed offset.
        self.positions.retain(|tp, _| owned.contains(tp));
        for tp in &owned {
            let committed = group.committed.get(tp).copied().unwrap_or(0);
            self.positions.entry(tp.clone()).or_insert(committed);
        }

        let mut batch = Vec::new();
        for (topic, partition) in owned {
            if batch.len() >= max {
                break;
            }
            let Some(log) = state
                .topics
                .get(&topic)
                .and_then(|partitions| partitions.get(partition as usize))
            else {
                continue;
            };

            let position = self.positions.entry((topic.clone(), partition)).or_insert(0);
            while batch.len() < max {
                let Some(stored) = log.get(*position as usize) else {
                    break;
                };
                batch.push(ConsumerRecord {
                    topic: topic.clone(),
                    partition,
                    offset: position.to_string(),
                    key: stored.key.clone(),
                    headers: stored.headers.clone(),
                    value: stored.value.clone(),
                });
                *position += 1;
            }
        }
        Ok(batch)
    }

    fn leave(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(group) = self.shared.lock().groups.get_mut(&self.group) {
            group.members.remove(&self.member);
        }
        self.shared.appended.notify_waiters();
    }
}

fn parse_offset(record: &ConsumerRecord) -> Result<u64, BusError> {
    record
        .offset
        .parse()
        .map_err(|_| BusError::InvalidOffset(record.offset.clone()))
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<ConsumerRecord>, BusError> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.shared);
        loop {
            // Register interest before looking, so an append between the
            // fetch and the wait is not missed.
            let mut appended = pin!(shared.appended.notified());
            appended.as_mut().enable();

            let batch = self.fetch(max.max(1))?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BusError> {
        let next = parse_offset(record)? + 1;
        let mut state = self.shared.lock();
        let group = state
            .groups
            .get_mut(&self.group)
            .filter(|group| group.members.contains_key(&self.member))
            .ok_or_else(|| BusError::NotAMember(self.group.clone()))?;

        group
            .committed
            .insert((record.topic.clone(), record.partition), next);
        Ok(())
    }

    async fn seek(&mut self, record: &ConsumerRecord) -> Result<(), BusError> {
        let offset = parse_offset(record)?;
        self.positions
            .insert((record.topic.clone(), record.partition), offset);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.leave();
        debug!(group = %self.group, member = self.member, "Left consumer group");
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, key: &str, value: &str) -> ProducerRecord {
        ProducerRecord::new(topic, value.as_bytes().to_vec()).with_key(key)
    }

    fn values(records: &[ConsumerRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| String::from_utf8(r.value.clone()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let broker = InMemoryBroker::new(4);
        for i in 0..5 {
            broker
                .send(record("orders.event", "agg-1", &format!("v{i}")))
                .await
                .unwrap();
        }

        let stored = broker.records("orders.event");
        assert_eq!(stored.len(), 5);
        let partition = stored[0].partition;
        assert!(stored.iter().all(|r| r.partition == partition));
        assert_eq!(values(&stored), vec!["v0", "v1", "v2", "v3", "v4"]);
    }

    #[tokio::test]
    async fn test_explicit_partition_out_of_range() {
        let broker = InMemoryBroker::new(2);
        broker.send(record("a.event", "k", "x")).await.unwrap();

        let err = broker
            .send(record("a.event", "k", "y").with_partition(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownPartition { partition: 5, .. }));
    }

    #[tokio::test]
    async fn test_message_size_limit() {
        let broker = InMemoryBroker::with_limits(1, 4);
        let err = broker.send(record("a.event", "k", "too long")).await.unwrap_err();
        assert!(matches!(err, BusError::MessageTooLarge { size: 8, limit: 4 }));
    }

    #[tokio::test]
    async fn test_rejected_topic_is_unavailable() {
        let broker = InMemoryBroker::new(1);
        broker.reject_topic("a.event.DLT");
        assert!(matches!(
            broker.send(record("a.event.DLT", "k", "x")).await,
            Err(BusError::Unavailable(_))
        ));

        broker.accept_topic("a.event.DLT");
        assert!(broker.send(record("a.event.DLT", "k", "x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_uncommitted_records_are_redelivered_after_drop() {
        let broker = InMemoryBroker::new(1);
        broker.send(record("a.event", "k", "first")).await.unwrap();
        broker.send(record("a.event", "k", "second")).await.unwrap();
        let subscription = Subscription::topics(["a.event"]);

        let mut consumer = broker.subscribe("g", &subscription).await.unwrap();
        let batch = consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(values(&batch), vec!["first", "second"]);
        consumer.commit(&batch[0]).await.unwrap();
        drop(consumer);

        let mut replacement = broker.subscribe("g", &subscription).await.unwrap();
        let batch = replacement.poll(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(values(&batch), vec!["second"]);
        assert_eq!(broker.committed_offset("g", "a.event", 0), Some(1));
    }

    #[tokio::test]
    async fn test_seek_refetches_record() {
        let broker = InMemoryBroker::new(1);
        broker.send(record("a.event", "k", "only")).await.unwrap();

        let mut consumer = broker
            .subscribe("g", &Subscription::topics(["a.event"]))
            .await
            .unwrap();
        let batch = consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        consumer.seek(&batch[0]).await.unwrap();

        let again = consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(again, batch);
    }

    #[tokio::test]
    async fn test_members_split_partitions() {
        let broker = InMemoryBroker::new(4);
        for i in 0..40 {
            broker
                .send(record("a.event", &format!("agg-{i}"), "x"))
                .await
                .unwrap();
        }
        let subscription = Subscription::topics(["a.event"]);
        let mut first = broker.subscribe("g", &subscription).await.unwrap();
        let mut second = broker.subscribe("g", &subscription).await.unwrap();

        let a = first.poll(100, Duration::from_millis(10)).await.unwrap();
        let b = second.poll(100, Duration::from_millis(10)).await.unwrap();
        assert_eq!(a.len() + b.len(), 40);

        let partitions_a: HashSet<u32> = a.iter().map(|r| r.partition).collect();
        let partitions_b: HashSet<u32> = b.iter().map(|r| r.partition).collect();
        assert!(partitions_a.is_disjoint(&partitions_b));
    }

    #[tokio::test]
    async fn test_groups_consume_independently() {
        let broker = InMemoryBroker::new(1);
        broker.send(record("a.event", "k", "x")).await.unwrap();
        let subscription = Subscription::topics(["a.event"]);

        let mut one = broker.subscribe("one", &subscription).await.unwrap();
        let mut two = broker.subscribe("two", &subscription).await.unwrap();
        assert_eq!(one.poll(10, Duration::from_millis(10)).await.unwrap().len(), 1);
        assert_eq!(two.poll(10, Duration::from_millis(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pattern_picks_up_new_topics() {
        let broker = InMemoryBroker::new(1);
        let mut consumer = broker
            .subscribe("g", &Subscription::pattern(r".*\.event").unwrap())
            .await
            .unwrap();
        assert!(consumer.poll(10, Duration::from_millis(5)).await.unwrap().is_empty());

        broker.send(record("late.event", "k", "x")).await.unwrap();
        broker.send(record("late.event.DLT", "k", "y")).await.unwrap();

        let batch = consumer.poll(10, Duration::from_millis(5)).await.unwrap();
        assert_eq!(values(&batch), vec!["x"]);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let broker = InMemoryBroker::new(1);
        let mut consumer = broker
            .subscribe("g", &Subscription::topics(["a.event"]))
            .await
            .unwrap();

        let producer = broker.clone();
        let send = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send(record("a.event", "k", "late")).await.unwrap();
        });

        let batch = consumer.poll(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(values(&batch), vec!["late"]);
        send.await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_after_close_fails() {
        let broker = InMemoryBroker::new(1);
        broker.send(record("a.event", "k", "x")).await.unwrap();
        let mut consumer = broker
            .subscribe("g", &Subscription::topics(["a.event"]))
            .await
            .unwrap();
        let batch = consumer.poll(10, Duration::from_millis(5)).await.unwrap();
        consumer.close().await.unwrap();

        assert!(matches!(
            consumer.commit(&batch[0]).await,
            Err(BusError::NotAMember(_))
        ));
    }
}
