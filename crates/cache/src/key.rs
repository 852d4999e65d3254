//! Cache keys: SHA-256 over the request fields that determine a result.

use sha2::{Digest, Sha256};
use std::fmt;
use survey_core::types::{CohortRequest, TimeRange, TrendRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    survey_id: String,
    digest: String,
}

impl CacheKey {
    /// Key over `(survey, metric, granularity, range)`.
    pub fn for_trend(request: &TrendRequest) -> Self {
        Self::build(
            &request.survey_id,
            &[
                "trend",
                request.metric.as_str(),
                request.granularity.as_str(),
            ],
            &request.range,
        )
    }

    /// Key over `(survey, cohort period, range)`.
    pub fn for_cohort(request: &CohortRequest) -> Self {
        Self::build(
            &request.survey_id,
            &["cohort", request.period.as_str()],
            &request.range,
        )
    }

    fn build(survey_id: &str, parts: &[&str], range: &TimeRange) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(survey_id.as_bytes());
        for part in parts {
            hasher.update([0x1fu8]);
            hasher.update(part.as_bytes());
        }
        hasher.update([0x1fu8]);
        hasher.update(range.start.timestamp_micros().to_be_bytes());
        hasher.update(range.end.timestamp_micros().to_be_bytes());
        Self {
            survey_id: survey_id.to_string(),
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn survey_id(&self) -> &str {
        &self.survey_id
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.survey_id, &self.digest[..12])
    }
}
