//! Consumption loop: multiplexes messages, errors and the interrupt signal.

use std::future::Future;

use tracing::{debug, error, info, warn};

use super::PartitionConsumer;
use crate::bus::{BusError, ConsumedMessage};
use crate::order::Order;

/// Loop state. `Stopping` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Active,
    Stopping,
}

/// Final counts reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Messages consumed. Only ever incremented by a message event.
    pub consumed: u64,
    /// Consumption errors observed.
    pub errors: u64,
}

/// Tallies a partition cursor until interrupted.
#[derive(Debug)]
pub struct ConsumptionLoop {
    state: LoopState,
    summary: ConsumeSummary,
}

impl Default for ConsumptionLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumptionLoop {
    pub fn new() -> Self {
        Self {
            state: LoopState::Active,
            summary: ConsumeSummary::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> ConsumeSummary {
        self.summary
    }

    /// Count and log one consumed message.
    pub fn record_message(&mut self, message: &ConsumedMessage) {
        self.summary.consumed += 1;

        info!(
            partition = message.partition,
            offset = message.offset,
            "Consumed message from partition {} at offset {}",
            message.partition,
            message.offset
        );
        info!(
            payload = %String::from_utf8_lossy(&message.payload),
            "Raw message"
        );

        if let Ok(order) = Order::decode(&message.payload) {
            debug!(
                order_id = %order.order_id,
                user = %order.user,
                item = %order.item,
                quantity = order.quantity,
                "Decoded order"
            );
        }
    }

    /// Log one consumption error. Never touches the consumed count.
    pub fn record_error(&mut self, err: &BusError) {
        self.summary.errors += 1;
        error!(error = %err, "Error consuming message");
    }

    /// Run until `shutdown` resolves or the cursor's message sequence ends.
    pub async fn run<F>(mut self, partition: &mut PartitionConsumer, shutdown: F) -> ConsumeSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut errors_open = true;
        let (messages, errors) = partition.channels();

        while self.state == LoopState::Active {
            tokio::select! {
                received = messages.recv() => match received {
                    Some(message) => self.record_message(&message),
                    None => {
                        warn!("Message sequence ended, stopping consumer");
                        self.state = LoopState::Stopping;
                    }
                },
                received = errors.recv(), if errors_open => match received {
                    Some(err) => self.record_error(&err),
                    None => errors_open = false,
                },
                _ = &mut shutdown => {
                    info!("Interrupt received, shutting down...");
                    self.state = LoopState::Stopping;
                }
            }
        }

        self.summary
    }
}
