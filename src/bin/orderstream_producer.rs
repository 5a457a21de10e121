//! orderstream-producer: Random order publisher
//!
//! Generates a random order on a fixed interval and publishes it to Kafka
//! without waiting for the acknowledgement. Outcomes are logged by a
//! separate reporter task as they arrive.
//!
//! ## Architecture
//! ```text
//! [ticker] --> [AsyncPublisher] --> [Kafka topic]
//!                     |
//!                     v
//!             [DeliveryReporter] --> logs
//! ```
//!
//! ## Configuration
//! - `--config <path>` or ORDERSTREAM_CONFIG: YAML configuration file
//! - ORDERSTREAM__KAFKA__BOOTSTRAP_SERVERS: broker list (default: localhost:9092)
//! - ORDERSTREAM__PRODUCER__TOPIC: target topic (default: orders)
//! - ORDERSTREAM__PRODUCER__INTERVAL_SECS: seconds between orders (default: 5)
//! - ORDERSTREAM_LOG: tracing filter (default: info)

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::error;

use orderstream::bus::KafkaDelivery;
use orderstream::config::Config;
use orderstream::order::OrderGenerator;
use orderstream::producer::run_producer;
use orderstream::utils::bootstrap::{init_tracing, interrupt_signal, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    let backend = KafkaDelivery::connect(&config.kafka).await.map_err(|e| {
        error!(error = %e, "Failed to start producer");
        e
    })?;

    let generator = OrderGenerator::new(config.catalog()?, StdRng::from_os_rng());

    run_producer(
        Arc::new(backend),
        generator,
        &config.producer,
        interrupt_signal(),
    )
    .await;

    Ok(())
}
