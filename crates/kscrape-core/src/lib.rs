//! kscrape core - time-window scraping of Kafka topics
//!
//! This library prints the records of one topic that fall inside a
//! wall-clock window:
//!
//! - Window resolution into exact per-partition offset ranges
//! - Bounded scanning that stops once every partition reached its end
//! - Key/value filtering, match capping and progress markers
//! - Stateless reads: offsets are never committed

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod kafka;
pub mod offsets;
pub mod scanner;
pub mod time;

// Re-export commonly used types
pub use config::{Config, ScrapeRequest};
pub use error::KafkaError;
pub use error::{Error, Result};
