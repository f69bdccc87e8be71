//! Test utilities for the order pipeline
//!
//! In-memory stand-ins for the order store and the event log. They keep the
//! observable contracts of the real clients: per-key partition affinity,
//! committed offsets that survive a consumer restart, delivery futures that
//! resolve after the broker accepts a message, and transactional inserts
//! that reject a repeated `order_id`.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::db::repository::{OrderStore, StoreError, StoreResult};
use crate::kafka::client::{
    Delivered, LogConsumer, LogError, LogErrorKind, LogProducer, LogRecord, PendingDelivery,
    PollResult, PublishError,
};
use crate::models::{Order, StoredOrder};
use crate::shutdown::ShutdownHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StoreState {
    rows: HashMap<String, StoredOrder>,
    insertion_order: Vec<String>,
    failures: VecDeque<StoreError>,
    attempts: u32,
    rollbacks: u32,
    closed: bool,
    unhealthy: bool,
}

/// In-memory [`OrderStore`]
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` insert attempts with `error`
    pub fn fail_next(&self, error: StoreError, times: u32) {
        let mut state = lock(&self.state);
        for _ in 0..times {
            state.failures.push_back(error.clone());
        }
    }

    /// Make health checks fail
    pub fn set_unhealthy(&self, unhealthy: bool) {
        lock(&self.state).unhealthy = unhealthy;
    }

    /// Insert attempts seen, successful or not
    pub fn attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    /// Transactions rolled back
    pub fn rollbacks(&self) -> u32 {
        lock(&self.state).rollbacks
    }

    pub fn len(&self) -> usize {
        lock(&self.state).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn get(&self, order_id: &str) -> Option<StoredOrder> {
        lock(&self.state).rows.get(order_id).cloned()
    }

    /// Stored orders in insertion order
    pub fn orders(&self) -> Vec<StoredOrder> {
        let state = lock(&self.state);
        state
            .insertion_order
            .iter()
            .filter_map(|id| state.rows.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<StoredOrder> {
        let mut state = lock(&self.state);
        state.attempts += 1;

        if state.closed {
            return Err(StoreError::transient("pool closed"));
        }

        if let Some(error) = state.failures.pop_front() {
            state.rollbacks += 1;
            return Err(error);
        }

        if state.rows.contains_key(&order.order_id) {
            state.rollbacks += 1;
            return Err(StoreError::duplicate_key(format!(
                "duplicate key value violates unique constraint \"orders_pkey\": {}",
                order.order_id
            )));
        }

        let stored = StoredOrder {
            order: order.clone(),
            processed_at: Utc::now(),
        };
        state.rows.insert(order.order_id.clone(), stored.clone());
        state.insertion_order.push(order.order_id.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, order_id: &str) -> StoreResult<Option<StoredOrder>> {
        Ok(self.get(order_id))
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.len() as i64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        if lock(&self.state).unhealthy {
            return Err(StoreError::transient("database unreachable"));
        }
        Ok(())
    }

    async fn close(&self) {
        lock(&self.state).closed = true;
    }
}

struct BrokerState {
    topic: String,
    partitions: Vec<Vec<LogRecord>>,
    committed: HashMap<(String, i32), i64>,
    commits: Vec<(String, i32, i64)>,
}

/// In-memory partitioned log for a single topic
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new(topic: &str, partitions: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                topic: topic.to_string(),
                partitions: vec![Vec::new(); partitions.max(1)],
                committed: HashMap::new(),
                commits: Vec::new(),
            })),
        }
    }

    pub fn topic(&self) -> String {
        lock(&self.state).topic.clone()
    }

    pub fn partition_count(&self) -> usize {
        lock(&self.state).partitions.len()
    }

    /// Partition a key is routed to; stable for the broker's lifetime
    pub fn partition_for(&self, key: &[u8]) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partition_count() as u64) as i32
    }

    /// Append a message, bypassing any producer
    pub fn append(&self, key: Option<&[u8]>, payload: &[u8]) -> Delivered {
        let partition = key.map(|k| self.partition_for(k)).unwrap_or(0);
        let mut state = lock(&self.state);
        let topic = state.topic.clone();
        let log = &mut state.partitions[partition as usize];
        let offset = log.len() as i64;
        let timestamp = Some(Utc::now().timestamp_millis());

        log.push(LogRecord {
            topic,
            partition,
            offset,
            key: key.map(|k| k.to_vec()),
            payload: Some(payload.to_vec()),
            timestamp,
        });

        Delivered {
            partition,
            offset,
            timestamp,
        }
    }

    pub fn records(&self, partition: i32) -> Vec<LogRecord> {
        lock(&self.state)
            .partitions
            .get(partition as usize)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_records(&self) -> Vec<LogRecord> {
        lock(&self.state).partitions.iter().flatten().cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        lock(&self.state).partitions.iter().map(Vec::len).sum()
    }

    /// Committed next offset for `group` on `partition`
    pub fn committed(&self, group: &str, partition: i32) -> Option<i64> {
        lock(&self.state)
            .committed
            .get(&(group.to_string(), partition))
            .copied()
    }

    /// Every commit in the order it happened
    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        lock(&self.state).commits.clone()
    }

    fn commit(&self, group: &str, partition: i32, next_offset: i64) {
        let mut state = lock(&self.state);
        state
            .committed
            .insert((group.to_string(), partition), next_offset);
        state
            .commits
            .push((group.to_string(), partition, next_offset));
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
            state: Arc::new(Mutex::new(ProducerState::default())),
        }
    }

    /// Consumer resuming from the group's committed offsets
    pub fn consumer(&self, group: &str) -> MemoryConsumer {
        let positions = {
            let state = lock(&self.state);
            (0..state.partitions.len() as i32)
                .map(|p| {
                    let committed = state.committed.get(&(group.to_string(), p)).copied();
                    (p, committed.unwrap_or(0))
                })
                .collect()
        };

        MemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            state: Arc::new(Mutex::new(ConsumerFakeState {
                positions,
                ..ConsumerFakeState::default()
            })),
        }
    }
}

type PendingSend = (Vec<u8>, Vec<u8>, oneshot::Sender<Result<Delivered, LogError>>);

#[derive(Default)]
struct ProducerState {
    stalled: bool,
    capacity: Option<usize>,
    pending: Vec<PendingSend>,
    failed_deliveries: u32,
    flushes: u32,
}

/// In-memory [`LogProducer`] writing into a [`MemoryBroker`]
///
/// Messages are acknowledged as soon as they are sent unless the producer is
/// stalled, in which case they wait for [`MemoryProducer::release`].
#[derive(Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
    state: Arc<Mutex<ProducerState>>,
}

impl MemoryProducer {
    /// Hold deliveries back, as if the broker were unreachable
    pub fn stall(&self) {
        lock(&self.state).stalled = true;
    }

    /// Reject sends once `capacity` messages are waiting
    pub fn set_capacity(&self, capacity: usize) {
        lock(&self.state).capacity = Some(capacity);
    }

    /// Fail the next `count` deliveries with a timeout
    pub fn fail_deliveries(&self, count: u32) {
        lock(&self.state).failed_deliveries = count;
    }

    pub fn flushes(&self) -> u32 {
        lock(&self.state).flushes
    }

    /// Stop stalling and deliver everything waiting
    pub fn release(&self) {
        let pending = {
            let mut state = lock(&self.state);
            state.stalled = false;
            std::mem::take(&mut state.pending)
        };

        for (key, payload, reply) in pending {
            let result = self.deliver(&key, &payload);
            let _ = reply.send(result);
        }
    }

    fn deliver(&self, key: &[u8], payload: &[u8]) -> Result<Delivered, LogError> {
        {
            let mut state = lock(&self.state);
            if state.failed_deliveries > 0 {
                state.failed_deliveries -= 1;
                return Err(LogError::new(
                    LogErrorKind::TimedOut,
                    "Local: Message timed out",
                ));
            }
        }
        Ok(self.broker.append(Some(key), payload))
    }
}

#[async_trait]
impl LogProducer for MemoryProducer {
    fn send(&self, _topic: &str, key: &[u8], payload: &[u8]) -> Result<PendingDelivery, PublishError> {
        let mut state = lock(&self.state);

        if let Some(capacity) = state.capacity {
            if state.pending.len() >= capacity {
                return Err(PublishError::BufferFull);
            }
        }

        if state.stalled {
            let (tx, rx) = oneshot::channel();
            state.pending.push((key.to_vec(), payload.to_vec(), tx));
            return Ok(async move {
                rx.await.unwrap_or_else(|_| {
                    Err(LogError::new(LogErrorKind::Other, "producer dropped"))
                })
            }
            .boxed());
        }

        drop(state);
        let result = self.deliver(key, payload);
        Ok(futures::future::ready(result).boxed())
    }

    async fn flush(&self, timeout: Duration) -> Result<(), LogError> {
        let stalled = {
            let mut state = lock(&self.state);
            state.flushes += 1;
            state.stalled
        };

        if stalled {
            tokio::time::sleep(timeout).await;
            return Err(LogError::new(
                LogErrorKind::TimedOut,
                "Local: Timed out",
            ));
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

#[derive(Default)]
struct ConsumerFakeState {
    positions: HashMap<i32, i64>,
    scripted: VecDeque<PollResult>,
    commit_failures: u32,
    next_partition: usize,
    closed: bool,
    stop_when_drained: Option<ShutdownHandle>,
}

/// In-memory [`LogConsumer`] reading from a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    state: Arc<Mutex<ConsumerFakeState>>,
}

impl MemoryConsumer {
    /// Return `result` from an upcoming poll, before any message
    pub fn push_poll_result(&self, result: PollResult) {
        lock(&self.state).scripted.push_back(result);
    }

    /// Fail the next `count` commits
    pub fn fail_commits(&self, count: u32) {
        lock(&self.state).commit_failures = count;
    }

    /// Trigger `shutdown` the first time a poll finds nothing to read
    pub fn stop_when_drained(&self, shutdown: ShutdownHandle) {
        lock(&self.state).stop_when_drained = Some(shutdown);
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn next_record(&self) -> Option<LogRecord> {
        let mut state = lock(&self.state);
        let partition_count = self.broker.partition_count();

        for step in 0..partition_count {
            let partition = ((state.next_partition + step) % partition_count) as i32;
            let position = state.positions.get(&partition).copied().unwrap_or(0);
            let record = self
                .broker
                .records(partition)
                .into_iter()
                .find(|r| r.offset == position);

            if let Some(record) = record {
                state.positions.insert(partition, position + 1);
                state.next_partition = (partition as usize + 1) % partition_count;
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn poll(&self, timeout: Duration) -> PollResult {
        if let Some(result) = lock(&self.state).scripted.pop_front() {
            return result;
        }

        if let Some(record) = self.next_record() {
            return PollResult::Message(record);
        }

        if let Some(shutdown) = lock(&self.state).stop_when_drained.take() {
            shutdown.trigger();
        }
        tokio::time::sleep(timeout).await;
        PollResult::Timeout
    }

    fn commit(&self, _topic: &str, partition: i32, next_offset: i64) -> Result<(), LogError> {
        {
            let mut state = lock(&self.state);
            if state.commit_failures > 0 {
                state.commit_failures -= 1;
                return Err(LogError::new(
                    LogErrorKind::Other,
                    "Broker: Not coordinator",
                ));
            }
        }
        self.broker.commit(&self.group, partition, next_offset);
        Ok(())
    }

    fn close(&self) -> Result<(), LogError> {
        lock(&self.state).closed = true;
        Ok(())
    }
}
