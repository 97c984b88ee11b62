//! Shared domain layer for the tank monitor.
//!
//! Holds the reading and usage models exchanged between crates, the common
//! error type, command-line settings, and the small pieces of time and volume
//! arithmetic every other crate leans on.

pub mod calculations;
pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;
pub mod time_utils;

pub use error::{Result, TankError};
