//! Trend and cohort analytics engine for survey responses.
//!
//! [`AnalyticsEngine`] is constructed once per process with a validated
//! configuration and its result caches, and serves concurrent requests.

#![warn(clippy::unwrap_used)]

pub mod engine;
pub mod pipeline;

pub use engine::AnalyticsEngine;
pub use pipeline::Pipeline;
