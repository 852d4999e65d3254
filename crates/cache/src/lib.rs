#![warn(clippy::unwrap_used)]

pub mod key;
pub mod local;
pub mod single_flight;

pub use key::CacheKey;
pub use local::LruStore;
pub use single_flight::{CacheError, CacheStatsSnapshot, ResultCache};
