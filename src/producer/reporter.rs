//! Delivery reporter: drains both completion channels and logs each outcome.
//!
//! Outcomes are logged in the order the broker resolves them. The task ends
//! once both channels are closed, which happens when the publisher is closed.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Completions, Correlated, DeliveryFailure, DeliverySuccess};

/// Outcome counts seen by the reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTally {
    pub delivered: u64,
    pub failed: u64,
}

/// Handle to the running reporter task.
pub struct DeliveryReporter {
    handle: JoinHandle<DeliveryTally>,
}

impl DeliveryReporter {
    pub fn spawn<M>(completions: Completions<M>) -> Self
    where
        M: Correlated + Send + 'static,
    {
        Self {
            handle: tokio::spawn(drain(completions)),
        }
    }

    /// Wait for the reporter to finish, up to `grace`.
    ///
    /// Returns `None` if it had to be aborted; outcomes still queued at that
    /// point are lost.
    pub async fn join(mut self, grace: Duration) -> Option<DeliveryTally> {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(tally)) => Some(tally),
            Ok(Err(e)) => {
                error!(error = %e, "Delivery reporter failed");
                None
            }
            Err(_) => {
                warn!(grace = ?grace, "Delivery reporter still running, aborting");
                self.handle.abort();
                None
            }
        }
    }
}

async fn drain<M: Correlated>(completions: Completions<M>) -> DeliveryTally {
    let Completions {
        mut successes,
        mut errors,
    } = completions;
    let mut tally = DeliveryTally::default();
    let (mut successes_open, mut errors_open) = (true, true);

    while successes_open || errors_open {
        tokio::select! {
            received = successes.recv(), if successes_open => match received {
                Some(success) => {
                    report_success(&success);
                    tally.delivered += 1;
                }
                None => successes_open = false,
            },
            received = errors.recv(), if errors_open => match received {
                Some(failure) => {
                    report_failure(&failure);
                    tally.failed += 1;
                }
                None => errors_open = false,
            },
        }
    }

    info!(
        delivered = tally.delivered,
        failed = tally.failed,
        "Delivery reporter finished"
    );
    tally
}

fn report_success<M: Correlated>(success: &DeliverySuccess<M>) {
    info!(
        order_id = %success.metadata.correlation_id(),
        topic = %success.topic,
        partition = success.partition,
        offset = success.offset,
        "Sent {}",
        success
    );
}

fn report_failure<M: Correlated>(failure: &DeliveryFailure<M>) {
    error!(
        order_id = %failure.metadata.correlation_id(),
        topic = %failure.topic,
        error = %failure.error,
        "Failed to send message: {}",
        failure.error
    );
}
