//! Partition cursor handle shared by every `LogConsumer` implementation.
//!
//! A backend opens a cursor by spawning a pump task through
//! [`PartitionConsumer::spawn`]. The pump receives a [`PartitionFeed`] and pushes
//! messages and errors into it until the handle asks it to stop.

use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{BusError, ConsumedMessage, Result};

/// Writing end of a partition cursor, owned by the backend's pump task.
pub struct PartitionFeed {
    messages: mpsc::Sender<ConsumedMessage>,
    errors: mpsc::Sender<BusError>,
    stop: watch::Receiver<bool>,
}

impl PartitionFeed {
    /// Resolves once the cursor is closed or its handle dropped.
    pub async fn stopped(&mut self) {
        // Err means the handle is gone, which is also a stop.
        let _ = self.stop.wait_for(|stop| *stop).await;
    }

    /// Push a message. Returns false when nobody is reading any more.
    pub async fn message(&self, message: ConsumedMessage) -> bool {
        self.messages.send(message).await.is_ok()
    }

    /// Push a non-fatal consumption error. Returns false when nobody is reading.
    pub async fn error(&self, error: BusError) -> bool {
        self.errors.send(error).await.is_ok()
    }
}

/// Read cursor on one partition.
///
/// Exposes two lazy sequences (messages and errors) through
/// [`channels`](Self::channels). The cursor is released by [`close`](Self::close);
/// dropping the handle without closing still signals the pump to stop.
pub struct PartitionConsumer {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<ConsumedMessage>,
    errors: mpsc::Receiver<BusError>,
    stop: watch::Sender<bool>,
    pump: Option<JoinHandle<()>>,
}

impl PartitionConsumer {
    /// Start a cursor whose pump is the future returned by `pump`.
    pub fn spawn<F, Fut>(topic: impl Into<String>, partition: i32, buffer: usize, pump: F) -> Self
    where
        F: FnOnce(PartitionFeed) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (message_tx, messages) = mpsc::channel(buffer.max(1));
        let (error_tx, errors) = mpsc::channel(buffer.max(1));
        let (stop, stop_rx) = watch::channel(false);

        let feed = PartitionFeed {
            messages: message_tx,
            errors: error_tx,
            stop: stop_rx,
        };

        Self {
            topic: topic.into(),
            partition,
            messages,
            errors,
            stop,
            pump: Some(tokio::spawn(pump(feed))),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Borrow the message and error sequences together, for use in one `select!`.
    pub fn channels(
        &mut self,
    ) -> (
        &mut mpsc::Receiver<ConsumedMessage>,
        &mut mpsc::Receiver<BusError>,
    ) {
        (&mut self.messages, &mut self.errors)
    }

    /// Stop the pump and wait for it to release the broker-side cursor.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.stop.send(true);
        self.messages.close();
        self.errors.close();

        if let Some(pump) = self.pump.take() {
            pump.await.map_err(|e| {
                BusError::Consume(format!(
                    "Partition {} of '{}' did not shut down cleanly: {}",
                    self.partition, self.topic, e
                ))
            })?;
        }

        debug!(topic = %self.topic, partition = self.partition, "Partition consumer closed");
        Ok(())
    }
}

impl Drop for PartitionConsumer {
    fn drop(&mut self) {
        if self.pump.is_some() {
            warn!(
                topic = %self.topic,
                partition = self.partition,
                "Partition consumer dropped without close, stopping pump"
            );
            let _ = self.stop.send(true);
        }
    }
}
