//! Kafka broker implementation.
//!
//! Publishing goes through an rdkafka `FutureProducer`; the broker assigns the
//! partition (by key hash when a key is set). Consuming uses a `StreamConsumer`
//! with a manual partition assignment, so there is no group rebalancing and no
//! offset commit.
//!
//! Both clients probe cluster metadata on connect so an unreachable broker is
//! reported at startup rather than on the first write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::metadata::Metadata;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::{BusError, ConsumedMessage, DeliveryBackend, LogConsumer, Result, StartOffset};
use crate::config::{ConsumerConfig, KafkaConfig};
use crate::consumer::PartitionConsumer;

impl KafkaConfig {
    /// Build a ClientConfig for producers.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("message.timeout.ms", self.message_timeout_ms.to_string());
        config.set("acks", "all");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    fn build_consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "false");
        config.set("enable.auto.offset.store", "false");
        config.set("enable.partition.eof", "false");

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

/// Run a blocking metadata request off the async runtime.
async fn fetch_metadata<T, F>(fetch: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> KafkaResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(fetch)
        .await
        .map_err(|e| BusError::Connection(format!("Metadata request aborted: {}", e)))?
        .map_err(|e| BusError::Connection(format!("Failed to fetch metadata: {}", e)))
}

/// Publishing side: hands payloads to librdkafka and awaits the ack.
pub struct KafkaDelivery {
    producer: FutureProducer,
}

impl KafkaDelivery {
    /// Create the producer and verify at least one broker answers.
    pub async fn connect(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        let probe = producer.clone();
        let timeout = config.connect_timeout();
        let brokers = fetch_metadata(move || {
            probe
                .client()
                .fetch_metadata(None, timeout)
                .map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| {
            BusError::Connection(format!(
                "Failed to connect to Kafka at {}: {}",
                config.bootstrap_servers, e
            ))
        })?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            brokers = brokers,
            "Connected to Kafka"
        );

        Ok(Self { producer })
    }
}

#[async_trait]
impl DeliveryBackend for KafkaDelivery {
    async fn deliver(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<(i32, i64)> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        // Never: wait for room in librdkafka's local queue instead of failing.
        match self.producer.send(record, Timeout::Never).await {
            Ok((partition, offset)) => {
                debug!(topic = %topic, partition, offset, "Kafka acknowledged record");
                Ok((partition, offset))
            }
            Err((e, _)) => Err(BusError::Publish(format!("Failed to publish: {}", e))),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BusError::Publish(format!("Flush aborted: {}", e)))?
            .map_err(|e| BusError::Publish(format!("Flush failed: {}", e)))
    }
}

/// Consuming side: one connection, cursors opened by manual assignment.
pub struct KafkaConsumerClient {
    consumer: Arc<StreamConsumer>,
    connect_timeout: Duration,
    buffer: usize,
}

impl KafkaConsumerClient {
    /// Create the consumer and verify at least one broker answers.
    pub async fn connect(config: &KafkaConfig, consumer_config: &ConsumerConfig) -> Result<Self> {
        let consumer: StreamConsumer = config
            .build_consumer_config(&consumer_config.group_id)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;
        let consumer = Arc::new(consumer);

        let probe = consumer.clone();
        let timeout = config.connect_timeout();
        let brokers = fetch_metadata(move || {
            probe
                .fetch_metadata(None, timeout)
                .map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| {
            BusError::Connection(format!(
                "Failed to connect to Kafka at {}: {}",
                config.bootstrap_servers, e
            ))
        })?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            brokers = brokers,
            "Connected to Kafka"
        );

        Ok(Self {
            consumer,
            connect_timeout: timeout,
            buffer: consumer_config.buffer,
        })
    }

    /// Confirm `partition` exists in `topic`.
    async fn check_partition(&self, topic: &str, partition: i32) -> Result<()> {
        let unavailable = |message: String| BusError::PartitionUnavailable {
            topic: topic.to_string(),
            partition,
            message,
        };

        let probe = self.consumer.clone();
        let owned_topic = topic.to_string();
        let timeout = self.connect_timeout;
        let status = fetch_metadata(move || {
            probe
                .fetch_metadata(Some(&owned_topic), timeout)
                .map(|m| topic_status(&m, &owned_topic))
        })
        .await
        .map_err(|e| unavailable(e.to_string()))?;

        match status {
            TopicStatus::Missing => Err(unavailable("unknown topic".to_string())),
            TopicStatus::Error(err) => Err(unavailable(err)),
            TopicStatus::Partitions(ids) if !ids.contains(&partition) => {
                Err(unavailable("unknown partition".to_string()))
            }
            TopicStatus::Partitions(_) => Ok(()),
        }
    }
}

/// What the broker reported for one topic.
enum TopicStatus {
    Missing,
    Error(String),
    Partitions(Vec<i32>),
}

fn topic_status(metadata: &Metadata, topic: &str) -> TopicStatus {
    match metadata.topics().iter().find(|t| t.name() == topic) {
        None => TopicStatus::Missing,
        Some(t) => match t.error() {
            Some(err) => TopicStatus::Error(format!("{:?}", err)),
            None => TopicStatus::Partitions(t.partitions().iter().map(|p| p.id()).collect()),
        },
    }
}

/// Wait for the next record and copy it out of librdkafka's buffer.
async fn next_event(consumer: &StreamConsumer) -> std::result::Result<ConsumedMessage, BusError> {
    match consumer.recv().await {
        Ok(message) => Ok(ConsumedMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }),
        Err(e) => Err(BusError::Consume(e.to_string())),
    }
}

#[async_trait]
impl LogConsumer for KafkaConsumerClient {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<PartitionConsumer> {
        self.check_partition(topic, partition).await?;

        let offset = match start {
            StartOffset::Newest => Offset::End,
            StartOffset::Oldest => Offset::Beginning,
        };

        let assign_failed = |e: rdkafka::error::KafkaError| BusError::PartitionUnavailable {
            topic: topic.to_string(),
            partition,
            message: format!("Failed to assign partition: {}", e),
        };
        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, offset)
            .map_err(assign_failed)?;
        self.consumer.assign(&assignment).map_err(assign_failed)?;

        info!(topic = %topic, partition, start = ?start, "Assigned Kafka partition");

        let consumer = self.consumer.clone();
        Ok(PartitionConsumer::spawn(
            topic,
            partition,
            self.buffer,
            move |mut feed| async move {
                loop {
                    tokio::select! {
                        _ = feed.stopped() => break,
                        event = next_event(&consumer) => {
                            let accepted = match event {
                                Ok(message) => feed.message(message).await,
                                Err(error) => feed.error(error).await,
                            };
                            if !accepted {
                                break;
                            }
                        }
                    }
                }

                match consumer.unassign() {
                    Ok(()) => debug!("Kafka partition unassigned"),
                    Err(e) => warn!(error = %e, "Failed to unassign Kafka partition"),
                }
            },
        ))
    }

    async fn close(self) -> Result<()> {
        let open = Arc::strong_count(&self.consumer) - 1;
        if open > 0 {
            warn!(open_cursors = open, "Closing Kafka consumer with cursors still open");
        }

        // Dropping the last handle runs librdkafka's blocking consumer close.
        let consumer = self.consumer;
        tokio::task::spawn_blocking(move || drop(consumer))
            .await
            .map_err(|e| BusError::Consume(format!("Consumer close aborted: {}", e)))?;

        info!("Kafka consumer closed");
        Ok(())
    }
}
