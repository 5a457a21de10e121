//! Async publisher: decouples submission from delivery confirmation.
//!
//! `send` only enqueues. A dispatcher task hands each request to the
//! `DeliveryBackend` and reports exactly one outcome per request on either the
//! success or the failure completion channel, paired with the request's
//! correlation metadata.
//!
//! Backpressure: the input channel holds `input_buffer` requests and the
//! dispatcher keeps at most `max_in_flight` deliveries outstanding. When both
//! are exhausted `send` waits instead of dropping data.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, DeliveryBackend, Result};

/// Metadata that identifies which request an outcome belongs to.
pub trait Correlated {
    fn correlation_id(&self) -> &str;
}

/// One payload bound for a topic, carrying its correlation metadata.
#[derive(Debug, Clone)]
pub struct PublishRequest<M> {
    pub topic: String,
    /// Optional message key. The broker assigns the partition either way.
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub metadata: M,
}

/// Broker acknowledged the write.
#[derive(Debug, Clone)]
pub struct DeliverySuccess<M> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub metadata: M,
}

/// Broker rejected or never acknowledged the write.
#[derive(Debug, Clone)]
pub struct DeliveryFailure<M> {
    pub topic: String,
    pub error: BusError,
    pub metadata: M,
}

impl<M: Correlated> fmt::Display for DeliverySuccess<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → partition {}, offset {}",
            self.metadata.correlation_id(),
            self.partition,
            self.offset
        )
    }
}

impl<M: Correlated> fmt::Display for DeliveryFailure<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.metadata.correlation_id(), self.error)
    }
}

/// Receiving ends of the two completion channels.
pub struct Completions<M> {
    pub successes: mpsc::Receiver<DeliverySuccess<M>>,
    pub errors: mpsc::Receiver<DeliveryFailure<M>>,
}

/// Buffer sizes for an `AsyncPublisher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherLimits {
    pub input_buffer: usize,
    pub max_in_flight: usize,
    pub completion_buffer: usize,
}

impl Default for PublisherLimits {
    fn default() -> Self {
        Self {
            input_buffer: 256,
            max_in_flight: 1024,
            completion_buffer: 256,
        }
    }
}

/// Non-blocking publisher front end.
pub struct AsyncPublisher<M> {
    input: mpsc::Sender<PublishRequest<M>>,
    dispatcher: JoinHandle<()>,
    backend: Arc<dyn DeliveryBackend>,
}

impl<M: Send + 'static> AsyncPublisher<M> {
    /// Start the dispatcher. Returns the publisher and its completion channels.
    pub fn start(backend: Arc<dyn DeliveryBackend>, limits: PublisherLimits) -> (Self, Completions<M>) {
        let (input, requests) = mpsc::channel(limits.input_buffer.max(1));
        let (success_tx, successes) = mpsc::channel(limits.completion_buffer.max(1));
        let (failure_tx, errors) = mpsc::channel(limits.completion_buffer.max(1));

        let dispatcher = tokio::spawn(dispatch(
            requests,
            backend.clone(),
            success_tx,
            failure_tx,
            limits.max_in_flight.max(1),
        ));

        let publisher = Self {
            input,
            dispatcher,
            backend,
        };
        (publisher, Completions { successes, errors })
    }

    /// Enqueue a request.
    ///
    /// Returns as soon as the request is buffered. Waits only when the input
    /// buffer is full. Delivery errors never surface here; they arrive on the
    /// failure channel.
    pub async fn send(&self, request: PublishRequest<M>) -> Result<()> {
        if request.payload.is_empty() {
            return Err(BusError::InvalidRequest("payload must not be empty".to_string()));
        }
        self.input.send(request).await.map_err(|_| BusError::Closed)
    }

    /// Stop accepting requests and deliver whatever is buffered.
    ///
    /// Waits up to `grace` for outstanding deliveries. Anything still pending
    /// after that is abandoned without an outcome. Completion channels close
    /// once this returns.
    pub async fn close(self, grace: Duration) -> Result<()> {
        let Self {
            input,
            mut dispatcher,
            backend,
        } = self;
        drop(input);

        let started = tokio::time::Instant::now();
        match tokio::time::timeout(grace, &mut dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Publisher dispatcher failed");
            }
            Err(_) => {
                warn!(grace = ?grace, "Grace period expired, abandoning in-flight deliveries");
                dispatcher.abort();
                return Err(BusError::Publish(format!(
                    "deliveries still pending after {:?}",
                    grace
                )));
            }
        }

        let remaining = grace.saturating_sub(started.elapsed());
        backend.flush(remaining).await?;
        info!("Publisher closed");
        Ok(())
    }
}

async fn dispatch<M: Send + 'static>(
    mut requests: mpsc::Receiver<PublishRequest<M>>,
    backend: Arc<dyn DeliveryBackend>,
    successes: mpsc::Sender<DeliverySuccess<M>>,
    failures: mpsc::Sender<DeliveryFailure<M>>,
    max_in_flight: usize,
) {
    let mut in_flight = JoinSet::new();

    loop {
        if in_flight.len() >= max_in_flight {
            reap(in_flight.join_next().await);
            continue;
        }

        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => {
                    in_flight.spawn(deliver(
                        backend.clone(),
                        request,
                        successes.clone(),
                        failures.clone(),
                    ));
                }
                None => break,
            },
            joined = in_flight.join_next(), if !in_flight.is_empty() => reap(joined),
        }
    }

    debug!(pending = in_flight.len(), "Input closed, draining in-flight deliveries");
    while let Some(joined) = in_flight.join_next().await {
        reap(Some(joined));
    }
}

fn reap(joined: Option<std::result::Result<(), tokio::task::JoinError>>) {
    if let Some(Err(e)) = joined {
        error!(error = %e, "Delivery task failed");
    }
}

async fn deliver<M>(
    backend: Arc<dyn DeliveryBackend>,
    request: PublishRequest<M>,
    successes: mpsc::Sender<DeliverySuccess<M>>,
    failures: mpsc::Sender<DeliveryFailure<M>>,
) {
    let PublishRequest {
        topic,
        key,
        payload,
        metadata,
    } = request;

    let reported = match backend.deliver(&topic, key.as_deref(), &payload).await {
        Ok((partition, offset)) => successes
            .send(DeliverySuccess {
                topic,
                partition,
                offset,
                metadata,
            })
            .await
            .is_ok(),
        Err(error) => failures
            .send(DeliveryFailure {
                topic,
                error,
                metadata,
            })
            .await
            .is_ok(),
    };

    if !reported {
        debug!("Completion receiver dropped, outcome discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBroker;
    use crate::test_utils::{make_order, make_request};

    #[tokio::test]
    async fn test_every_request_gets_one_outcome() {
        let broker = MemoryBroker::new();
        broker.fail_next_publishes(3).await;
        let (publisher, mut completions) =
            AsyncPublisher::start(Arc::new(broker.clone()), PublisherLimits::default());

        for i in 0..10 {
            publisher
                .send(make_request("orders", &format!("order-{}", i)))
                .await
                .unwrap();
        }
        publisher.close(Duration::from_secs(5)).await.unwrap();

        let mut seen = Vec::new();
        while let Some(success) = completions.successes.recv().await {
            seen.push(success.metadata.order_id);
        }
        let mut failed = 0;
        while let Some(failure) = completions.errors.recv().await {
            assert!(matches!(failure.error, BusError::Publish(_)));
            seen.push(failure.metadata.order_id);
            failed += 1;
        }

        assert_eq!(failed, 3);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 10);
        assert_eq!(broker.records("orders", 0).await.len(), 7);
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let (publisher, _completions) = AsyncPublisher::<crate::order::Order>::start(
            Arc::new(MemoryBroker::new()),
            PublisherLimits::default(),
        );

        let mut request = make_request("orders", "X");
        request.payload.clear();
        assert!(matches!(
            publisher.send(request).await,
            Err(BusError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_send_waits_when_buffers_full() {
        let broker = MemoryBroker::new();
        broker.set_ack_delay(Some(Duration::from_millis(500))).await;
        let limits = PublisherLimits {
            input_buffer: 1,
            max_in_flight: 1,
            completion_buffer: 8,
        };
        let (publisher, _completions) = AsyncPublisher::start(Arc::new(broker), limits);

        // One in flight, one buffered; the third has nowhere to go.
        publisher.send(make_request("orders", "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.send(make_request("orders", "b")).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), publisher.send(make_request("orders", "c")))
                .await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_failure_outcome_keeps_metadata() {
        let broker = MemoryBroker::new();
        broker.set_unreachable(true).await;
        let (publisher, mut completions) =
            AsyncPublisher::start(Arc::new(broker), PublisherLimits::default());

        publisher.send(make_request("orders", "X")).await.unwrap();
        let failure = completions.errors.recv().await.unwrap();

        assert_eq!(failure.metadata, make_order("X"));
        assert!(matches!(failure.error, BusError::Connection(_)));
        assert!(failure.to_string().starts_with("X failed: Connection failed"));
    }

    #[tokio::test]
    async fn test_close_times_out_on_stuck_broker() {
        let broker = MemoryBroker::new();
        broker.set_ack_delay(Some(Duration::from_secs(30))).await;
        let (publisher, mut completions) =
            AsyncPublisher::start(Arc::new(broker), PublisherLimits::default());

        publisher.send(make_request("orders", "X")).await.unwrap();
        let closed = publisher.close(Duration::from_millis(100)).await;

        assert!(matches!(closed, Err(BusError::Publish(_))));
        assert!(completions.successes.recv().await.is_none());
    }
}
