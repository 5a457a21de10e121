//! Consumer side: partition cursor and consumption loop.
//!
//! ```text
//! [broker] --> [LogConsumer] --> [PartitionConsumer] --(messages | errors)--> [ConsumptionLoop]
//!                                                                 interrupt --^
//! ```

mod consumption;
mod partition;

use std::future::Future;

use tracing::{error, info, warn};

use crate::bus::{LogConsumer, Result};
use crate::config::ConsumerConfig;

pub use consumption::{ConsumeSummary, ConsumptionLoop, LoopState};
pub use partition::{PartitionConsumer, PartitionFeed};

/// Open the configured partition, consume until `shutdown`, then release the
/// cursor and the connection in reverse order of acquisition.
///
/// Returns an error only when the cursor cannot be opened. No loop iteration
/// happens in that case.
pub async fn run_consumer<C, F>(client: C, config: &ConsumerConfig, shutdown: F) -> Result<ConsumeSummary>
where
    C: LogConsumer,
    F: Future<Output = ()>,
{
    let mut partition = match client
        .consume_partition(&config.topic, config.partition, config.start_offset)
        .await
    {
        Ok(partition) => partition,
        Err(e) => {
            error!(
                topic = %config.topic,
                partition = config.partition,
                error = %e,
                "Failed to consume partition"
            );
            if let Err(close_err) = client.close().await {
                warn!(error = %close_err, "Error closing consumer");
            }
            return Err(e);
        }
    };

    info!(
        topic = %config.topic,
        partition = config.partition,
        start_offset = ?config.start_offset,
        "Consumer started. Waiting for messages..."
    );

    let summary = ConsumptionLoop::new().run(&mut partition, shutdown).await;

    info!(
        consumed = summary.consumed,
        errors = summary.errors,
        "Total consumed: {} messages",
        summary.consumed
    );

    if let Err(e) = partition.close().await {
        warn!(error = %e, "Error closing partition consumer");
    }
    if let Err(e) = client.close().await {
        warn!(error = %e, "Error closing consumer");
    }

    Ok(summary)
}
