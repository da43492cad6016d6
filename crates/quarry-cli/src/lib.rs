//! Command line driver for Quarry pages.
//!
//! This crate provides:
//! - A fixture backend replaying recorded search responses
//! - Plain text reports of grids, maps and population outcomes

pub mod fixture;
pub mod report;

// Re-export commonly used types
pub use fixture::FixtureBackend;
pub use report::{grid_summary, map_summary, outcome_line};
