//! Survey response analytics: time-series aggregation, trend and seasonality
//! detection, rolling anomaly flags, cohort retention, and insight synthesis.
//!
//! Everything here is pure and synchronous over in-memory collections.

#![warn(clippy::unwrap_used)]

pub mod aggregator;
pub mod anomaly;
pub mod cohort;
pub mod insight;
pub mod sentiment;
pub mod stats;
pub mod trend;

pub use aggregator::Aggregator;
pub use anomaly::AnomalyDetector;
pub use cohort::CohortAnalyzer;
pub use insight::{InsightInputs, InsightSynthesizer};
pub use sentiment::{is_gibberish, score_sentiment, SentimentLabel, SentimentScore};
pub use trend::TrendCalculator;
