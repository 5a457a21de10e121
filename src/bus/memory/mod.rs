//! In-memory partitioned log broker.
//!
//! Keeps an append-only log per partition and fans new records out to open
//! cursors over tokio broadcast channels. Implements both `DeliveryBackend`
//! and `LogConsumer`, so a producer and a consumer can be wired together in a
//! single process without an external broker.
//!
//! Fault injection hooks (unreachable broker, failing publishes, injected
//! consumption errors, slow acknowledgements) drive the failure paths in tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::{BusError, ConsumedMessage, DeliveryBackend, LogConsumer, Result, StartOffset};
use crate::consumer::PartitionConsumer;

/// Broadcast capacity per partition. Slower cursors see a lag error.
const TAIL_CAPACITY: usize = 1024;
/// Partitions given to topics created implicitly by a publish.
const DEFAULT_PARTITIONS: usize = 1;
/// Message/error buffer handed to each cursor.
const CURSOR_BUFFER: usize = 256;

type TailEvent = std::result::Result<ConsumedMessage, BusError>;

struct PartitionLog {
    records: Vec<Vec<u8>>,
    tail: broadcast::Sender<TailEvent>,
}

impl PartitionLog {
    fn new() -> Self {
        let (tail, _) = broadcast::channel(TAIL_CAPACITY);
        Self {
            records: Vec::new(),
            tail,
        }
    }
}

struct TopicLog {
    partitions: Vec<PartitionLog>,
    /// Round-robin cursor for unkeyed writes.
    next: usize,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| PartitionLog::new()).collect(),
            next: 0,
        }
    }

    fn assign(&mut self, key: Option<&str>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            None => {
                let partition = self.next % count;
                self.next = self.next.wrapping_add(1);
                partition
            }
        }
    }
}

#[derive(Default)]
struct Faults {
    unreachable: bool,
    failing_publishes: usize,
    ack_delay: Option<Duration>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    faults: Faults,
}

/// Decrements the open cursor count when a pump exits.
struct CursorGuard(Arc<AtomicUsize>);

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process broker. Clones share the same log.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` partitions. No-op if it already exists.
    pub async fn create_topic(&self, topic: impl Into<String>, partitions: usize) {
        let topic = topic.into();
        let mut state = self.state.write().await;
        state.topics.entry(topic.clone()).or_insert_with(|| {
            info!(topic = %topic, partitions = partitions, "Memory broker topic created");
            TopicLog::new(partitions)
        });
    }

    /// Refuse every connection-level operation while set.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.write().await.faults.unreachable = unreachable;
    }

    /// Reject the next `count` publishes.
    pub async fn fail_next_publishes(&self, count: usize) {
        self.state.write().await.faults.failing_publishes = count;
    }

    /// Hold every acknowledgement for `delay` before appending.
    pub async fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state.write().await.faults.ack_delay = delay;
    }

    /// Push a consumption error to every open cursor on the partition.
    ///
    /// Returns the number of cursors that will observe it.
    pub async fn inject_consume_error(&self, topic: &str, partition: i32, error: BusError) -> usize {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .and_then(|p| p.tail.send(Err(error)).ok())
            .unwrap_or(0)
    }

    /// Append a payload, returning `(partition, offset)`.
    pub async fn append(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> (i32, i64) {
        let mut state = self.state.write().await;
        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(DEFAULT_PARTITIONS));

        let partition = log.assign(key);
        let partition_log = &mut log.partitions[partition];
        let offset = partition_log.records.len() as i64;
        partition_log.records.push(payload.to_vec());

        // No subscribers is fine; the record is still in the log.
        let _ = partition_log.tail.send(Ok(ConsumedMessage {
            topic: topic.to_string(),
            partition: partition as i32,
            offset,
            payload: payload.to_vec(),
        }));

        (partition as i32, offset)
    }

    /// Snapshot of a partition's records.
    pub async fn records(&self, topic: &str, partition: i32) -> Vec<Vec<u8>> {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .map(|p| p.records.clone())
            .unwrap_or_default()
    }

    /// Cursors whose pump is still running.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryBackend for MemoryBroker {
    async fn deliver(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<(i32, i64)> {
        let delay = {
            let mut state = self.state.write().await;
            if state.faults.unreachable {
                return Err(BusError::Connection("memory broker unreachable".to_string()));
            }
            if state.faults.failing_publishes > 0 {
                state.faults.failing_publishes -= 1;
                return Err(BusError::Publish(
                    "broker did not acknowledge write".to_string(),
                ));
            }
            state.faults.ack_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (partition, offset) = self.append(topic, key, payload).await;
        debug!(topic = %topic, partition, offset, "Memory broker appended record");
        Ok((partition, offset))
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        // Every acknowledged write is already in the log.
        Ok(())
    }
}

#[async_trait]
impl LogConsumer for MemoryBroker {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<PartitionConsumer> {
        let (backlog, mut tail) = {
            let state = self.state.read().await;
            if state.faults.unreachable {
                return Err(BusError::Connection("memory broker unreachable".to_string()));
            }

            let unavailable = |message: &str| BusError::PartitionUnavailable {
                topic: topic.to_string(),
                partition,
                message: message.to_string(),
            };
            let log = state
                .topics
                .get(topic)
                .ok_or_else(|| unavailable("unknown topic"))?;
            let partition_log = usize::try_from(partition)
                .ok()
                .and_then(|p| log.partitions.get(p))
                .ok_or_else(|| unavailable("unknown partition"))?;

            let backlog: Vec<ConsumedMessage> = match start {
                StartOffset::Newest => Vec::new(),
                StartOffset::Oldest => partition_log
                    .records
                    .iter()
                    .enumerate()
                    .map(|(offset, payload)| ConsumedMessage {
                        topic: topic.to_string(),
                        partition,
                        offset: offset as i64,
                        payload: payload.clone(),
                    })
                    .collect(),
            };

            // Subscribed under the read lock, so no append can slip between
            // the backlog snapshot and the tail.
            (backlog, partition_log.tail.subscribe())
        };

        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        let guard = CursorGuard(self.open_cursors.clone());

        info!(topic = %topic, partition, start = ?start, "Memory broker cursor opened");

        Ok(PartitionConsumer::spawn(
            topic,
            partition,
            CURSOR_BUFFER,
            move |mut feed| async move {
                let _guard = guard;

                for message in backlog {
                    if !feed.message(message).await {
                        return;
                    }
                }

                loop {
                    tokio::select! {
                        _ = feed.stopped() => break,
                        received = tail.recv() => {
                            let accepted = match received {
                                Ok(Ok(message)) => feed.message(message).await,
                                Ok(Err(error)) => feed.error(error).await,
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    feed.error(BusError::Consume(format!(
                                        "cursor lagged, {} messages skipped",
                                        skipped
                                    )))
                                    .await
                                }
                                Err(broadcast::error::RecvError::Closed) => false,
                            };
                            if !accepted {
                                break;
                            }
                        }
                    }
                }
            },
        ))
    }

    async fn close(self) -> Result<()> {
        debug!(open_cursors = self.open_cursors(), "Memory broker connection closed");
        Ok(())
    }
}
