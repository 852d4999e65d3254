pub mod config;
pub mod error;
pub mod types;

pub use config::AnalyticsConfig;
pub use error::{InsightsError, InsightsResult};
