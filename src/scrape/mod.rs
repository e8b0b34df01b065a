//! Scrape orchestration: targets, connection probing, circuit
//! breaking, result caching and the per-request scheduler.

pub mod breaker;
pub mod cache;
pub mod error;
pub mod scheduler;
pub mod stats;
pub mod target;
pub mod version;
