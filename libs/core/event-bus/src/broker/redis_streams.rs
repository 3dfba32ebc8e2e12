//! Redis Streams backend
//!
//! Each partition is its own stream, `<topic>:<partition>`. Every topic that
//! has been written to is recorded in the `event-bus:topics` set so pattern
//! subscriptions can discover it.
//!
//! Redis consumer groups hand entries of one stream to whichever member reads
//! first, which would break per-partition ordering. Members therefore take a
//! lease per stream (`event-bus:lease:<group>:<stream>`) and only read streams
//! they hold. A heartbeat task renews held leases while records are being
//! dispatched, and an entry is acknowledged only while its stream's lease is
//! still ours. A lease that is not renewed expires, and the next member to
//! refresh takes the stream over. Entries the old holder left pending are
//! claimed once they have been idle for a full lease TTL; until then the new
//! holder reads nothing else from that stream, so they are still handled
//! first.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    Broker, BrokerConsumer, ConsumerRecord, ProducerRecord, RecordMetadata, Subscription,
    partition_for,
};
use crate::error::BusError;
use crate::headers::Headers;

/// Set of every topic written through this backend
pub const TOPICS_KEY: &str = "event-bus:topics";

const LEASE_TTL: Duration = Duration::from_secs(30);
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLAIM_BATCH: usize = 100;

const FIELD_KEY: &str = "key";
const FIELD_HEADERS: &str = "headers";
const FIELD_VALUE: &str = "value";

/// Take the lease if it is free, renew it if we already hold it.
const ACQUIRE_LEASE: &str = r"
local owner = redis.call('GET', KEYS[1])
if not owner then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return 1
end
if owner == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
";

/// Extend the lease only while we still hold it.
const RENEW_LEASE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

/// XACK under the stream's lease; -1 when someone else holds it.
const ACK_UNDER_LEASE: &str = r"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return -1
end
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return redis.call('XACK', KEYS[2], ARGV[3], ARGV[4])
";

const RELEASE_LEASE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// XPENDING extended reply: (id, consumer, idle ms, deliveries)
type PendingEntry = (String, String, i64, i64);

type StreamEntries = Vec<(String, Vec<(String, Vec<u8>)>)>;
type StreamReply = Vec<(String, StreamEntries)>;

pub fn stream_key(topic: &str, partition: u32) -> String {
    format!("{topic}:{partition}")
}

pub fn lease_key(group: &str, stream: &str) -> String {
    format!("event-bus:lease:{group}:{stream}")
}

fn lease_ttl_ms() -> u64 {
    LEASE_TTL.as_millis() as u64
}

/// Entries other members left pending that have been idle long enough to
/// claim, and whether younger ones remain.
fn abandoned(pending: &[PendingEntry], consumer: &str, min_idle: Duration) -> (Vec<String>, bool) {
    let min_idle = min_idle.as_millis() as i64;
    let mut claimable = Vec::new();
    let mut recent = false;
    for (id, owner, idle, _) in pending {
        if owner == consumer {
            continue;
        }
        if *idle >= min_idle {
            claimable.push(id.clone());
        } else {
            recent = true;
        }
    }
    (claimable, recent)
}

/// Streams a consumer holds, shared with its heartbeat
#[derive(Default)]
struct Leases {
    held: BTreeSet<String>,
    /// Held streams whose renewal found another owner
    lost: BTreeSet<String>,
}

fn lock(leases: &Mutex<Leases>) -> MutexGuard<'_, Leases> {
    leases.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Renew held leases on a timer so a slow dispatch does not let them lapse.
/// Uses the broker's shared connection; the consumer's own is blocked in
/// XREADGROUP most of the time.
fn spawn_heartbeat(
    mut conn: ConnectionManager,
    group: String,
    consumer: String,
    leases: Arc<Mutex<Leases>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let renew = Script::new(RENEW_LEASE);
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let streams: Vec<String> = lock(&leases).held.iter().cloned().collect();
            for stream in streams {
                let renewed: RedisResult<i32> = renew
                    .key(lease_key(&group, &stream))
                    .arg(&consumer)
                    .arg(lease_ttl_ms())
                    .invoke_async(&mut conn)
                    .await;
                match renewed {
                    Ok(1) => {}
                    Ok(_) => {
                        warn!(stream = %stream, consumer = %consumer, "Partition lease taken over");
                        let mut leases = lock(&leases);
                        leases.held.remove(&stream);
                        leases.lost.insert(stream);
                    }
                    Err(e) => warn!(stream = %stream, error = %e, "Failed to renew partition lease"),
                }
            }
        }
    })
}

#[derive(Clone)]
pub struct RedisStreamsBroker {
    client: redis::Client,
    conn: ConnectionManager,
    partitions: u32,
    max_length: usize,
    max_message_bytes: usize,
}

impl RedisStreamsBroker {
    pub async fn connect(url: &str, partitions: u32) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!(partitions, "Connected to Redis Streams broker");

        Ok(Self {
            client,
            conn,
            partitions: partitions.max(1),
            max_length: 100_000,
            max_message_bytes: 1024 * 1024,
        })
    }

    /// Approximate per-stream cap applied on every append (`MAXLEN ~`)
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    #[instrument(skip(self, record), fields(topic = %record.topic))]
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BusError> {
        if record.value.len() > self.max_message_bytes {
            return Err(BusError::MessageTooLarge {
                size: record.value.len(),
                limit: self.max_message_bytes,
            });
        }

        let partition = match record.partition {
            Some(partition) if partition >= self.partitions => {
                return Err(BusError::UnknownPartition {
                    topic: record.topic,
                    partition,
                });
            }
            Some(partition) => partition,
            None => partition_for(record.key.as_deref(), self.partitions),
        };

        let stream = stream_key(&record.topic, partition);
        let headers = serde_json::to_string(&record.headers)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*");
        if let Some(key) = &record.key {
            pipe.arg(FIELD_KEY).arg(key);
        }
        pipe.arg(FIELD_HEADERS)
            .arg(headers)
            .arg(FIELD_VALUE)
            .arg(&record.value[..]);
        pipe.cmd("SADD").arg(TOPICS_KEY).arg(&record.topic).ignore();

        let mut conn = self.conn.clone();
        let (offset,): (String,) = pipe.query_async(&mut conn).await?;

        debug!(stream = %stream, offset = %offset, "Appended record");

        Ok(RecordMetadata {
            topic: record.topic,
            partition,
            offset,
        })
    }

    async fn subscribe(
        &self,
        group: &str,
        subscription: &Subscription,
    ) -> Result<Box<dyn BrokerConsumer>, BusError> {
        // A dedicated connection, blocking reads would stall other users
        // of a shared one.
        let conn = ConnectionManager::new(self.client.clone()).await?;
        let consumer = format!("consumer-{}", Uuid::new_v4().simple());
        let leases = Arc::new(Mutex::new(Leases::default()));
        let heartbeat = spawn_heartbeat(
            self.conn.clone(),
            group.to_string(),
            consumer.clone(),
            Arc::clone(&leases),
        );

        info!(group, consumer = %consumer, "Joined consumer group");

        Ok(Box::new(StreamsConsumer {
            conn,
            group: group.to_string(),
            consumer,
            subscription: subscription.clone(),
            partitions: self.partitions,
            owned: BTreeMap::new(),
            fenced: HashSet::new(),
            groups_ready: HashSet::new(),
            read_pending: true,
            last_refresh: None,
            leases,
            heartbeat,
        }))
    }
}

struct StreamsConsumer {
    conn: ConnectionManager,
    group: String,
    consumer: String,
    subscription: Subscription,
    partitions: u32,
    /// Leased streams: stream key -> (topic, partition)
    owned: BTreeMap<String, (String, u32)>,
    /// Owned streams with entries not yet claimable from an earlier holder
    fenced: HashSet<String>,
    groups_ready: HashSet<String>,
    /// Re-read our own pending entries before asking for new ones
    read_pending: bool,
    last_refresh: Option<Instant>,
    leases: Arc<Mutex<Leases>>,
    heartbeat: JoinHandle<()>,
}

impl StreamsConsumer {
    fn lease_key(&self, stream: &str) -> String {
        lease_key(&self.group, stream)
    }

    fn forget(&mut self, stream: &str) -> bool {
        self.fenced.remove(stream);
        self.owned.remove(stream).is_some()
    }

    /// Stop reading streams the heartbeat found taken over.
    fn drop_lost(&mut self) {
        let lost = std::mem::take(&mut lock(&self.leases).lost);
        for stream in lost {
            if self.forget(&stream) {
                warn!(stream = %stream, "Lost partition lease");
            }
        }
    }

    fn publish_held(&self) {
        lock(&self.leases).held = self.owned.keys().cloned().collect();
    }

    /// Owned streams safe to read from
    fn readable(&self) -> Vec<String> {
        self.owned
            .keys()
            .filter(|stream| !self.fenced.contains(*stream))
            .cloned()
            .collect()
    }

    async fn topics(&mut self) -> Result<Vec<String>, BusError> {
        match &self.subscription {
            Subscription::Topics(topics) => Ok(topics.clone()),
            Subscription::Pattern(_) => {
                let known: Vec<String> = self.conn.smembers(TOPICS_KEY).await?;
                Ok(known
                    .into_iter()
                    .filter(|topic| self.subscription.matches(topic))
                    .collect())
            }
        }
    }

    async fn ensure_group(&mut self, stream: &str) -> Result<(), BusError> {
        if self.groups_ready.contains(stream) {
            return Ok(());
        }

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(()) => debug!(stream, group = %self.group, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }
        self.groups_ready.insert(stream.to_string());
        Ok(())
    }

    /// Renew leases, pick up free streams, claim what dead holders left behind.
    async fn refresh(&mut self) -> Result<(), BusError> {
        if self
            .last_refresh
            .is_some_and(|at| at.elapsed() < REFRESH_INTERVAL)
        {
            return Ok(());
        }
        self.last_refresh = Some(Instant::now());

        let acquire = Script::new(ACQUIRE_LEASE);
        let ttl_ms = lease_ttl_ms();

        for topic in self.topics().await? {
            for partition in 0..self.partitions {
                let stream = stream_key(&topic, partition);
                self.ensure_group(&stream).await?;

                let held: i32 = acquire
                    .key(self.lease_key(&stream))
                    .arg(&self.consumer)
                    .arg(ttl_ms)
                    .invoke_async(&mut self.conn)
                    .await?;

                if held == 1 {
                    let acquired = self
                        .owned
                        .insert(stream.clone(), (topic.clone(), partition))
                        .is_none();
                    if acquired {
                        debug!(stream = %stream, "Acquired partition lease");
                        self.read_pending = true;
                    }
                    if acquired || self.fenced.contains(&stream) {
                        self.claim_abandoned(&stream).await?;
                    }
                } else if self.forget(&stream) {
                    warn!(stream = %stream, "Lost partition lease");
                }
            }
        }
        self.publish_held();
        Ok(())
    }

    /// Claim entries earlier holders left pending. A holder that stopped
    /// renewing stopped at least a lease TTL ago, so anything younger may
    /// still be in flight and keeps the stream fenced.
    async fn claim_abandoned(&mut self, stream: &str) -> Result<(), BusError> {
        let pending: Vec<PendingEntry> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(CLAIM_BATCH)
            .query_async(&mut self.conn)
            .await?;

        let (ids, recent) = abandoned(&pending, &self.consumer, LEASE_TTL);
        let claimed: Vec<String> = if ids.is_empty() {
            Vec::new()
        } else {
            redis::cmd("XCLAIM")
                .arg(stream)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(lease_ttl_ms())
                .arg(&ids)
                .arg("JUSTID")
                .query_async(&mut self.conn)
                .await?
        };

        if !claimed.is_empty() {
            warn!(stream, count = claimed.len(), "Claimed abandoned records");
            self.read_pending = true;
        }

        let more = pending.len() >= CLAIM_BATCH && !ids.is_empty();
        if recent || claimed.len() < ids.len() || more {
            if self.fenced.insert(stream.to_string()) {
                debug!(stream, "Waiting for earlier holder's records to become claimable");
            }
        } else {
            self.fenced.remove(stream);
        }
        Ok(())
    }

    /// Mark our pending entries as idle for a full lease so the next holder
    /// claims them at once instead of waiting them out.
    async fn abandon_pending(&mut self, stream: &str) -> Result<(), BusError> {
        let pending: Vec<PendingEntry> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(CLAIM_BATCH)
            .arg(&self.consumer)
            .query_async(&mut self.conn)
            .await?;
        if pending.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = pending.into_iter().map(|(id, _, _, _)| id).collect();
        let _: Vec<String> = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(0)
            .arg(&ids)
            .arg("IDLE")
            .arg(lease_ttl_ms())
            .arg("JUSTID")
            .query_async(&mut self.conn)
            .await?;
        debug!(stream, count = ids.len(), "Handed back uncommitted records");
        Ok(())
    }

    async fn read_group(
        &mut self,
        streams: &[String],
        max: usize,
        block: Option<Duration>,
        id: &str,
    ) -> Result<StreamReply, BusError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(&self.group).arg(&self.consumer);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("COUNT").arg(max).arg("STREAMS");
        for stream in streams {
            cmd.arg(stream);
        }
        for _ in streams {
            cmd.arg(id);
        }

        let result: RedisResult<Option<StreamReply>> = cmd.query_async(&mut self.conn).await;
        match result {
            Ok(reply) => Ok(reply.unwrap_or_default()),
            Err(e) if e.to_string().contains("NOGROUP") => {
                // Stream was deleted under us; recreate on next refresh.
                self.groups_ready.clear();
                self.last_refresh = None;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn to_records(&mut self, reply: StreamReply) -> Result<Vec<ConsumerRecord>, BusError> {
        let mut records = Vec::new();
        for (stream, entries) in reply {
            let Some((topic, partition)) = self.owned.get(&stream).cloned() else {
                continue;
            };

            let mut trimmed = Vec::new();
            for (id, fields) in entries {
                match decode_entry(&topic, partition, id, fields) {
                    Ok(record) => records.push(record),
                    Err(id) => trimmed.push(id),
                }
            }

            // Pending entries whose data was trimmed away can never be
            // delivered; drop them from the pending list.
            if !trimmed.is_empty() {
                warn!(stream = %stream, count = trimmed.len(), "Acknowledging trimmed entries");
                let _: i64 = redis::cmd("XACK")
                    .arg(&stream)
                    .arg(&self.group)
                    .arg(&trimmed)
                    .query_async(&mut self.conn)
                    .await?;
            }
        }
        Ok(records)
    }
}

fn decode_entry(
    topic: &str,
    partition: u32,
    id: String,
    fields: Vec<(String, Vec<u8>)>,
) -> Result<ConsumerRecord, String> {
    let mut key = None;
    let mut headers = Headers::new();
    let mut value = None;

    for (name, raw) in fields {
        match name.as_str() {
            FIELD_KEY => key = String::from_utf8(raw).ok(),
            FIELD_HEADERS => {
                headers = serde_json::from_slice(&raw).unwrap_or_else(|e| {
                    warn!(topic, offset = %id, error = %e, "Unreadable headers, delivering without them");
                    Headers::new()
                });
            }
            FIELD_VALUE => value = Some(raw),
            _ => {}
        }
    }

    let Some(value) = value else {
        return Err(id);
    };

    Ok(ConsumerRecord {
        topic: topic.to_string(),
        partition,
        offset: id,
        key,
        headers,
        value,
    })
}

#[async_trait]
impl BrokerConsumer for StreamsConsumer {
    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<ConsumerRecord>, BusError> {
        self.drop_lost();
        self.refresh().await?;
        let streams = self.readable();
        if streams.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(Vec::new());
        }

        let max = max.max(1);
        if self.read_pending {
            let reply = self.read_group(&streams, max, None, "0").await?;
            let has_entries = reply.iter().any(|(_, entries)| !entries.is_empty());
            let records = self.to_records(reply).await?;
            if !records.is_empty() {
                return Ok(records);
            }
            if !has_entries {
                self.read_pending = false;
            }
        }

        let reply = self.read_group(&streams, max, Some(timeout), ">").await?;
        self.to_records(reply).await
    }

    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BusError> {
        let stream = stream_key(&record.topic, record.partition);
        if !self.owned.contains_key(&stream) {
            return Err(BusError::NotAMember(self.group.clone()));
        }

        let ack = Script::new(ACK_UNDER_LEASE);
        let acked: i64 = ack
            .key(self.lease_key(&stream))
            .key(&stream)
            .arg(&self.consumer)
            .arg(lease_ttl_ms())
            .arg(&self.group)
            .arg(&record.offset)
            .invoke_async(&mut self.conn)
            .await?;

        if acked < 0 {
            // The new holder redelivers the entry.
            warn!(stream = %stream, offset = %record.offset, "Partition lease lost before commit");
            self.forget(&stream);
            self.publish_held();
            return Err(BusError::LeaseLost(stream));
        }
        Ok(())
    }

    async fn seek(&mut self, _record: &ConsumerRecord) -> Result<(), BusError> {
        // Unacknowledged entries stay in our pending list; reading it from
        // the start returns the record and everything fetched after it.
        self.read_pending = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.heartbeat.abort();
        let release = Script::new(RELEASE_LEASE);
        let streams: Vec<String> = self.owned.keys().cloned().collect();
        for stream in streams {
            self.abandon_pending(&stream).await?;
            let _: i32 = release
                .key(self.lease_key(&stream))
                .arg(&self.consumer)
                .invoke_async(&mut self.conn)
                .await?;
        }
        self.owned.clear();
        self.fenced.clear();
        self.publish_held();

        info!(group = %self.group, consumer = %self.consumer, "Left consumer group");
        Ok(())
    }
}

impl Drop for StreamsConsumer {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_layout() {
        assert_eq!(stream_key("customer.registered.event", 2), "customer.registered.event:2");
    }

    #[test]
    fn test_lease_key_layout() {
        assert_eq!(
            lease_key("projector", "customer.registered.event:2"),
            "event-bus:lease:projector:customer.registered.event:2"
        );
    }

    #[test]
    fn test_abandoned_claims_only_idle_foreign_entries() {
        let pending = vec![
            ("1-0".to_string(), "consumer-old".to_string(), 45_000, 1),
            ("2-0".to_string(), "consumer-me".to_string(), 90_000, 1),
            ("3-0".to_string(), "consumer-old".to_string(), 30_000, 2),
        ];

        let (ids, recent) = abandoned(&pending, "consumer-me", LEASE_TTL);

        assert_eq!(ids, vec!["1-0".to_string(), "3-0".to_string()]);
        assert!(!recent);
    }

    #[test]
    fn test_abandoned_reports_entries_still_in_flight() {
        let pending = vec![
            ("1-0".to_string(), "consumer-old".to_string(), 40_000, 1),
            ("2-0".to_string(), "consumer-old".to_string(), 1_200, 1),
        ];

        let (ids, recent) = abandoned(&pending, "consumer-me", LEASE_TTL);

        assert_eq!(ids, vec!["1-0".to_string()]);
        assert!(recent);
    }

    #[test]
    fn test_abandoned_ignores_own_entries() {
        let pending = vec![("1-0".to_string(), "consumer-me".to_string(), 5, 1)];
        assert_eq!(abandoned(&pending, "consumer-me", LEASE_TTL), (Vec::new(), false));
    }

    #[test]
    fn test_heartbeat_renews_well_inside_the_lease() {
        assert!(HEARTBEAT_INTERVAL * 3 <= LEASE_TTL);
        assert!(HEARTBEAT_INTERVAL < REFRESH_INTERVAL);
    }

    #[test]
    fn test_decode_entry_reads_fields() {
        let fields = vec![
            (FIELD_KEY.to_string(), b"agg-1".to_vec()),
            (FIELD_HEADERS.to_string(), br#"{"trace-id":"abc"}"#.to_vec()),
            (FIELD_VALUE.to_string(), b"{}".to_vec()),
        ];
        let record = decode_entry("a.event", 1, "1-0".into(), fields).unwrap();

        assert_eq!(record.key.as_deref(), Some("agg-1"));
        assert_eq!(record.headers["trace-id"], "abc");
        assert_eq!(record.offset, "1-0");
        assert_eq!(record.partition, 1);
    }

    #[test]
    fn test_decode_entry_without_value_is_trimmed() {
        assert_eq!(decode_entry("a.event", 0, "5-0".into(), Vec::new()).unwrap_err(), "5-0");
    }

    #[test]
    fn test_decode_entry_tolerates_bad_headers() {
        let fields = vec![
            (FIELD_HEADERS.to_string(), b"not json".to_vec()),
            (FIELD_VALUE.to_string(), b"x".to_vec()),
        ];
        let record = decode_entry("a.event", 0, "1-0".into(), fields).unwrap();
        assert!(record.headers.is_empty());
        assert!(record.key.is_none());
    }
}
