//! The analytics engine: validated configuration, the analysis pipeline, and
//! the cohort and trend result caches.

use crate::pipeline::Pipeline;
use std::sync::Arc;
use survey_analytics::{score_sentiment, SentimentScore};
use survey_cache::{CacheKey, CacheStatsSnapshot, ResultCache};
use survey_core::config::AnalyticsConfig;
use survey_core::error::InsightsResult;
use survey_core::types::{
    CohortAnalysisResult, CohortPeriod, CohortRequest, ResponsePoint, TrendAnalysisResult,
    TrendRequest,
};
use tracing::{debug, info};

pub type TrendCache = ResultCache<TrendAnalysisResult>;
pub type CohortCache = ResultCache<CohortAnalysisResult>;

pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    pipeline: Arc<Pipeline>,
    trend_cache: Arc<TrendCache>,
    cohort_cache: Arc<CohortCache>,
}

impl AnalyticsEngine {
    /// Validate `config` and build the engine with fresh caches sized from it.
    pub fn new(config: AnalyticsConfig) -> InsightsResult<Self> {
        let trend_cache = Arc::new(ResultCache::new(
            "trend",
            config.cache.trend_ttl(),
            config.cache.max_entries,
        ));
        let cohort_cache = Arc::new(ResultCache::new(
            "cohort",
            config.cache.cohort_ttl(),
            config.cache.max_entries,
        ));
        Self::with_caches(config, trend_cache, cohort_cache)
    }

    /// Build the engine around caches owned by the caller.
    pub fn with_caches(
        config: AnalyticsConfig,
        trend_cache: Arc<TrendCache>,
        cohort_cache: Arc<CohortCache>,
    ) -> InsightsResult<Self> {
        config.validate()?;
        info!(
            window = config.anomaly.window,
            z_threshold = config.anomaly.z_threshold,
            seasonality_threshold = config.trend.seasonality_threshold,
            trend_ttl_secs = config.cache.trend_ttl_secs,
            cohort_ttl_secs = config.cache.cohort_ttl_secs,
            "Analytics engine initialized"
        );
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(&config)),
            config,
            trend_cache,
            cohort_cache,
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Time series, trend, anomalies and ranked insights for one metric.
    ///
    /// The cohort matrix for the same survey and range feeds the cohort-based
    /// insight rules and is served from the cohort cache.
    pub async fn analyze_trends(
        &self,
        request: TrendRequest,
        points: Arc<[ResponsePoint]>,
    ) -> InsightsResult<Arc<TrendAnalysisResult>> {
        self.pipeline.validate(&request.range, request.granularity)?;

        let key = CacheKey::for_trend(&request);
        if let Some(cached) = self.trend_cache.get(&key) {
            debug!(key = %key, "Trend result served from cache");
            return Ok(cached);
        }

        let cohorts = self
            .analyze_cohorts(
                CohortRequest {
                    survey_id: request.survey_id.clone(),
                    period: CohortPeriod::for_granularity(request.granularity),
                    range: request.range,
                },
                Arc::clone(&points),
            )
            .await?;

        let pipeline = Arc::clone(&self.pipeline);
        let result = self
            .trend_cache
            .get_or_compute(key, move || pipeline.run_trend(&request, &points, &cohorts))
            .await?;
        Ok(result)
    }

    /// Cohort × age retention matrix, average curve and age-1 ranking.
    pub async fn analyze_cohorts(
        &self,
        request: CohortRequest,
        points: Arc<[ResponsePoint]>,
    ) -> InsightsResult<Arc<CohortAnalysisResult>> {
        self.pipeline
            .validate(&request.range, request.period.granularity())?;

        let key = CacheKey::for_cohort(&request);
        let pipeline = Arc::clone(&self.pipeline);
        let result = self
            .cohort_cache
            .get_or_compute(key, move || pipeline.run_cohort(&request, &points))
            .await?;
        Ok(result)
    }

    /// Keyword-polarity score for a free-text answer.
    pub fn score_feedback(&self, text: &str) -> SentimentScore {
        score_sentiment(text)
    }

    /// Purge expired results from both caches. Call this periodically.
    pub fn maintenance(&self) -> usize {
        let evicted = self.trend_cache.purge_expired() + self.cohort_cache.purge_expired();
        if evicted > 0 {
            debug!(evicted = evicted, "Result cache eviction complete");
        }
        evicted
    }

    pub fn trend_cache_stats(&self) -> CacheStatsSnapshot {
        self.trend_cache.stats()
    }

    pub fn cohort_cache_stats(&self) -> CacheStatsSnapshot {
        self.cohort_cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use survey_core::error::InsightsError;

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = AnalyticsConfig::default();
        config.anomaly.window = 0;
        assert!(matches!(
            AnalyticsEngine::new(config),
            Err(InsightsError::Config(_))
        ));
    }

    #[test]
    fn test_score_feedback_delegates() {
        let engine = AnalyticsEngine::new(AnalyticsConfig::default()).unwrap();
        let score = engine.score_feedback("terrible and slow");
        assert_eq!(score.negative_hits, 2);
    }

    #[test]
    fn test_injected_caches_are_used() {
        let trend = Arc::new(TrendCache::new("trend", std::time::Duration::from_secs(1), 4));
        let cohort = Arc::new(CohortCache::new("cohort", std::time::Duration::from_secs(1), 4));
        let engine =
            AnalyticsEngine::with_caches(AnalyticsConfig::default(), Arc::clone(&trend), cohort)
                .unwrap();
        assert_eq!(engine.trend_cache_stats(), trend.stats());
        assert_eq!(engine.maintenance(), 0);
    }
}
