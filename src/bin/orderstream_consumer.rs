//! orderstream-consumer: Partition tail
//!
//! Reads one partition of the orders topic starting at the newest offset and
//! logs every record until interrupted. Nothing is committed, so each run
//! starts fresh from the partition's end.
//!
//! ## Configuration
//! - `--config <path>` or ORDERSTREAM_CONFIG: YAML configuration file
//! - ORDERSTREAM__KAFKA__BOOTSTRAP_SERVERS: broker list (default: localhost:9092)
//! - ORDERSTREAM__CONSUMER__TOPIC: topic to read (default: orders)
//! - ORDERSTREAM__CONSUMER__PARTITION: partition index (default: 0)
//! - ORDERSTREAM__CONSUMER__START_OFFSET: `newest` or `oldest` (default: newest)
//! - ORDERSTREAM_LOG: tracing filter (default: info)

use tracing::error;

use orderstream::bus::KafkaConsumerClient;
use orderstream::config::Config;
use orderstream::consumer::run_consumer;
use orderstream::utils::bootstrap::{init_tracing, interrupt_signal, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    let client = KafkaConsumerClient::connect(&config.kafka, &config.consumer)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to start consumer");
            e
        })?;

    run_consumer(client, &config.consumer, interrupt_signal()).await?;

    Ok(())
}
