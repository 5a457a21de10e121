//! Orderstream - async order producer and partition consumer
//!
//! A producer that synthesizes order events and publishes them without
//! waiting on acknowledgements, and a consumer that tails one partition of
//! the same topic from the newest offset. The broker is Kafka (feature
//! `kafka`) or the in-memory log in [`bus::memory`].

pub mod bus;
pub mod config;
pub mod consumer;
pub mod order;
pub mod producer;
pub mod utils;

#[cfg(test)]
mod test_utils;
