//! Producer side: order cadence, async publisher and delivery reporter.
//!
//! ```text
//! [OrderGenerator] --tick--> [AsyncPublisher] --> [broker]
//!                                  |
//!                     (successes | errors)
//!                                  v
//!                          [DeliveryReporter]
//! ```
//!
//! The `ShutdownCoordinator` owns the ticker and the interrupt. On interrupt it
//! stops generating, the publisher is closed within the grace bound, and the
//! reporter is joined once the completion channels drain.

mod publisher;
mod reporter;

use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::bus::{BusError, DeliveryBackend};
use crate::config::ProducerConfig;
use crate::order::{Order, OrderGenerator};

pub use publisher::{
    AsyncPublisher, Completions, Correlated, DeliveryFailure, DeliverySuccess, PublishRequest,
    PublisherLimits,
};
pub use reporter::{DeliveryReporter, DeliveryTally};

/// Producer lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Running,
    Stopped,
}

/// Counts logged when the producer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    /// Requests accepted by the publisher.
    pub submitted: u64,
    /// Orders dropped before submission (encoding failures).
    pub skipped: u64,
    /// Reporter tally, if the reporter finished within the grace period.
    pub tally: Option<DeliveryTally>,
}

/// Drives the order cadence until interrupted.
pub struct ShutdownCoordinator<R> {
    generator: OrderGenerator<R>,
    config: ProducerConfig,
    state: ProducerState,
    submitted: u64,
    skipped: u64,
}

impl<R: Rng> ShutdownCoordinator<R> {
    pub fn new(generator: OrderGenerator<R>, config: ProducerConfig) -> Self {
        Self {
            generator,
            config,
            state: ProducerState::Running,
            submitted: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Submit one order now, then one per interval, until `shutdown` resolves
    /// or the publisher stops accepting requests.
    pub async fn run<F>(&mut self, publisher: &AsyncPublisher<Order>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = self.config.interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            topic = %self.config.topic,
            interval = ?interval,
            "Producer started. Sending random orders every {:?}",
            interval
        );

        while self.state == ProducerState::Running {
            tokio::select! {
                // First tick completes immediately: that is the startup order.
                _ = ticker.tick() => {
                    if let Err(e) = self.submit(publisher).await {
                        error!(error = %e, "Publisher stopped accepting orders");
                        self.state = ProducerState::Stopped;
                    }
                }
                _ = &mut shutdown => {
                    info!("Interrupt received, exiting...");
                    self.state = ProducerState::Stopped;
                }
            }
        }
    }

    async fn submit(&mut self, publisher: &AsyncPublisher<Order>) -> crate::bus::Result<()> {
        let order = self.generator.next_order();
        let payload = match order.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "Failed to encode order");
                self.skipped += 1;
                return Ok(());
            }
        };

        info!(
            order_id = %order.order_id,
            item = %order.item,
            quantity = order.quantity,
            user = %order.user,
            "Sending {}",
            order
        );

        let request = PublishRequest {
            topic: self.config.topic.clone(),
            key: self
                .config
                .key_by_order_id
                .then(|| order.order_id.clone()),
            payload,
            metadata: order,
        };

        match publisher.send(request).await {
            Ok(()) => {
                self.submitted += 1;
                Ok(())
            }
            Err(BusError::InvalidRequest(reason)) => {
                warn!(reason = %reason, "Order rejected before submission");
                self.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Run the whole producer: publisher, reporter and cadence loop.
///
/// Returns after `shutdown` resolves and the publisher and reporter have
/// been closed, each within `shutdown_grace_secs`.
pub async fn run_producer<R, F>(
    backend: Arc<dyn DeliveryBackend>,
    generator: OrderGenerator<R>,
    config: &ProducerConfig,
    shutdown: F,
) -> ProducerSummary
where
    R: Rng,
    F: Future<Output = ()>,
{
    let (publisher, completions) = AsyncPublisher::start(backend, config.limits());
    let reporter = DeliveryReporter::spawn(completions);

    let mut coordinator = ShutdownCoordinator::new(generator, config.clone());
    coordinator.run(&publisher, shutdown).await;

    info!("Closing producer...");
    let grace = config.shutdown_grace();
    if let Err(e) = publisher.close(grace).await {
        warn!(error = %e, "Producer did not close cleanly");
    }
    let tally = reporter.join(grace).await;

    let summary = ProducerSummary {
        submitted: coordinator.submitted,
        skipped: coordinator.skipped,
        tally,
    };
    info!(
        submitted = summary.submitted,
        skipped = summary.skipped,
        delivered = tally.map(|t| t.delivered),
        failed = tally.map(|t| t.failed),
        "Producer closed."
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBroker;
    use crate::order::Catalog;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn generator() -> OrderGenerator<StdRng> {
        OrderGenerator::new(Catalog::default(), StdRng::seed_from_u64(42))
    }

    fn config(interval_secs: u64) -> ProducerConfig {
        ProducerConfig {
            interval_secs,
            shutdown_grace_secs: 2,
            ..ProducerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sends_immediately_on_start() {
        let broker = MemoryBroker::new();

        let summary = run_producer(
            Arc::new(broker.clone()),
            generator(),
            &config(5),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await;

        assert_eq!(summary.submitted, 1);
        assert_eq!(
            summary.tally,
            Some(DeliveryTally {
                delivered: 1,
                failed: 0
            })
        );

        let records = broker.records("orders", 0).await;
        assert_eq!(records.len(), 1);
        assert!(Order::decode(&records[0]).is_ok());
    }

    #[tokio::test]
    async fn test_broker_failures_do_not_stop_the_cadence() {
        let broker = MemoryBroker::new();
        broker.fail_next_publishes(1).await;

        let summary = run_producer(
            Arc::new(broker.clone()),
            generator(),
            &config(1),
            tokio::time::sleep(Duration::from_millis(1500)),
        )
        .await;

        assert_eq!(summary.submitted, 2);
        assert_eq!(
            summary.tally,
            Some(DeliveryTally {
                delivered: 1,
                failed: 1
            })
        );
    }

    #[tokio::test]
    async fn test_coordinator_stops_on_interrupt() {
        let broker = MemoryBroker::new();
        let (publisher, _completions) =
            AsyncPublisher::start(Arc::new(broker), PublisherLimits::default());
        let mut coordinator = ShutdownCoordinator::new(generator(), config(5));
        assert_eq!(coordinator.state(), ProducerState::Running);

        tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.run(&publisher, tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("coordinator should stop on interrupt");

        assert_eq!(coordinator.state(), ProducerState::Stopped);
    }

    #[tokio::test]
    async fn test_keyed_orders_use_order_id() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 4).await;
        let keyed = ProducerConfig {
            key_by_order_id: true,
            ..config(5)
        };

        let summary = run_producer(
            Arc::new(broker.clone()),
            generator(),
            &keyed,
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await;
        assert_eq!(summary.submitted, 1);

        let mut total = 0;
        for partition in 0..4 {
            total += broker.records("orders", partition).await.len();
        }
        assert_eq!(total, 1);
    }
}
