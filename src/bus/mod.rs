//! Broker seam for the publish and consume sides.
//!
//! This module contains:
//! - `DeliveryBackend` trait: hands one payload to the broker and resolves with
//!   the partition/offset it was written at
//! - `LogConsumer` trait: opens a cursor on one partition of a topic
//! - Implementations: Kafka (rdkafka), in-memory

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::consumer::PartitionConsumer;

// Implementation modules
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

// Re-exports
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumerClient, KafkaDelivery};
pub use memory::MemoryBroker;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Partition {partition} of topic '{topic}' unavailable: {message}")]
    PartitionUnavailable {
        topic: String,
        partition: i32,
        message: String,
    },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Publisher closed")]
    Closed,
}

/// Where a new partition cursor begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Only records appended after the cursor opens.
    #[default]
    Newest,
    /// Every record still retained by the broker.
    Oldest,
}

/// A record read back from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Transport an `AsyncPublisher` hands serialized records to.
///
/// Implementations:
/// - `KafkaDelivery`: rdkafka `FutureProducer`
/// - `MemoryBroker`: in-process partitioned log
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Write one payload to `topic`.
    ///
    /// The broker picks the partition. Resolves with `(partition, offset)` once
    /// the write is acknowledged.
    async fn deliver(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<(i32, i64)>;

    /// Wait for anything still buffered client-side, bounded by `timeout`.
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

/// Connection able to open partition cursors.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Open a cursor on `partition` of `topic`.
    ///
    /// Fails if the broker cannot be reached or the partition does not exist.
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<PartitionConsumer>;

    /// Release the connection. Call after every cursor has been closed.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_offset_default_is_newest() {
        assert_eq!(StartOffset::default(), StartOffset::Newest);
    }

    #[test]
    fn test_partition_unavailable_message() {
        let err = BusError::PartitionUnavailable {
            topic: "orders".to_string(),
            partition: 3,
            message: "unknown partition".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Partition 3 of topic 'orders' unavailable: unknown partition"
        );
    }
}
