//! Scrape orchestration.

mod scrape;

pub use scrape::ScrapeEngine;
