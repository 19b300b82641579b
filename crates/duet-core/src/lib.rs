//! Foundational low-level utilities shared across Duet crates.
//!
//! Provides the wall-clock timestamp helpers used by replay records and
//! runtime logging.

pub mod time_utils;

pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
