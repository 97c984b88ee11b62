//! Runtime orchestration layer for the tank monitor.
//!
//! Drives the fetch → trend → usage pipeline on a periodic tick inside a
//! tokio task and publishes snapshots over a channel.

pub mod orchestrator;

pub use tank_core as core;
pub use tank_data as data;
