//! Data layer for the tank monitor.
//!
//! Fetches readings from the telemetry provider through an ordered chain of
//! transports with TTL caching, infers pump state from the level trend, and
//! rolls readings into persisted daily usage records.

pub mod aggregator;
pub mod cache;
pub mod feed;
pub mod history;
#[cfg(test)]
mod seed;
pub mod store;
pub mod summary;
pub mod telemetry;
pub mod transport;
pub mod trend;

pub use tank_core as core;
