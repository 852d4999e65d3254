//! The synchronous analysis pipeline run on a cache miss.

use chrono::Utc;
use std::time::Instant;
use survey_analytics::aggregator::sample_points;
use survey_analytics::insight::{degraded_insight, rank_insights};
use survey_analytics::{
    Aggregator, AnomalyDetector, CohortAnalyzer, InsightInputs, InsightSynthesizer,
    TrendCalculator,
};
use survey_core::config::{AnalyticsConfig, LimitsConfig};
use survey_core::error::InsightsResult;
use survey_core::types::{
    CohortAnalysisResult, CohortRequest, Granularity, ResponsePoint, TimeRange, TimeSeries,
    TrendAnalysisResult, TrendRequest, TrendResult,
};
use tracing::{info, warn};

pub struct Pipeline {
    aggregator: Aggregator,
    trend: TrendCalculator,
    anomaly: AnomalyDetector,
    cohort: CohortAnalyzer,
    synthesizer: InsightSynthesizer,
    limits: LimitsConfig,
}

impl Pipeline {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            aggregator: Aggregator::new(config.limits.max_periods),
            trend: TrendCalculator::new(config.trend.clone()),
            anomaly: AnomalyDetector::new(config.anomaly.clone()),
            cohort: CohortAnalyzer::new(config.limits.max_cohort_periods),
            synthesizer: InsightSynthesizer::new(config),
            limits: config.limits.clone(),
        }
    }

    /// Reject a malformed range before any computation is scheduled.
    pub fn validate(&self, range: &TimeRange, granularity: Granularity) -> InsightsResult<()> {
        range.validate()?;
        self.aggregator.period_starts(granularity, range)?;
        Ok(())
    }

    pub fn run_trend(
        &self,
        request: &TrendRequest,
        points: &[ResponsePoint],
        cohorts: &CohortAnalysisResult,
    ) -> TrendAnalysisResult {
        let started = Instant::now();
        let metric = request.metric;
        let (selected, stride) = self.select(points, &request.survey_id, &request.range);
        let mut degraded = Vec::new();

        let time_series = match self.aggregator.aggregate_sampled(
            &selected,
            metric,
            request.granularity,
            &request.range,
            stride,
        ) {
            Ok(series) => series,
            Err(e) => {
                warn!(survey_id = %request.survey_id, error = %e, "Aggregation failed");
                degraded.push(degraded_insight(metric, &e));
                TimeSeries {
                    metric,
                    granularity: request.granularity,
                    buckets: Vec::new(),
                    values: Vec::new(),
                    deltas: Vec::new(),
                    sample_stride: stride,
                }
            }
        };

        let offset = time_series
            .values
            .len()
            .saturating_sub(self.limits.max_series_len);
        let values = &time_series.values[offset..];
        let keys: Vec<String> = time_series.buckets[offset..]
            .iter()
            .map(|b| b.period_key.clone())
            .collect();

        let trend = match self.trend.calculate(values) {
            Ok(trend) => trend,
            Err(e) => {
                warn!(survey_id = %request.survey_id, metric = %metric, error = %e, "Trend degraded");
                degraded.push(degraded_insight(metric, &e));
                TrendResult::insufficient(values.len())
            }
        };

        let anomalies = match self.anomaly.detect(values, &keys) {
            Ok(mut anomalies) => {
                for a in &mut anomalies {
                    a.index += offset;
                }
                anomalies
            }
            Err(e) => {
                warn!(survey_id = %request.survey_id, metric = %metric, error = %e, "Anomaly scan degraded");
                degraded.push(degraded_insight(metric, &e));
                Vec::new()
            }
        };

        let mut insights = self.synthesizer.synthesize(&InsightInputs {
            metric,
            trend: &trend,
            anomalies: &anomalies,
            cohorts: Some(cohorts),
        });
        insights.extend(degraded);
        rank_insights(&mut insights);

        info!(
            survey_id = %request.survey_id,
            metric = %metric,
            granularity = %request.granularity,
            buckets = time_series.buckets.len(),
            anomalies = anomalies.len(),
            insights = insights.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Trend analysis computed"
        );

        TrendAnalysisResult {
            survey_id: request.survey_id.clone(),
            time_series,
            trend,
            anomalies,
            insights,
            computed_at: Utc::now(),
        }
    }

    pub fn run_cohort(&self, request: &CohortRequest, points: &[ResponsePoint]) -> CohortAnalysisResult {
        let started = Instant::now();
        let mut selected: Vec<ResponsePoint> = points
            .iter()
            .filter(|p| p.survey_id == request.survey_id && request.range.contains(p.timestamp))
            .cloned()
            .collect();

        // Stride sampling would split cohort membership, so an oversized
        // input keeps its most recent points instead.
        let capped = selected.len() > self.limits.max_input_points;
        if capped {
            let total = selected.len();
            selected.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
            selected = selected.split_off(total - self.limits.max_input_points);
            warn!(
                survey_id = %request.survey_id,
                total = total,
                kept = selected.len(),
                "Cohort input capped to most recent points"
            );
        }

        let mut result = match self.cohort.analyze(&request.survey_id, &selected, request.period) {
            Ok(result) => result,
            Err(e) => {
                warn!(survey_id = %request.survey_id, error = %e, "Cohort analysis failed");
                CohortAnalysisResult::empty(&request.survey_id, request.period)
            }
        };
        result.truncated |= capped;

        info!(
            survey_id = %request.survey_id,
            period = request.period.as_str(),
            cohorts = result.cohorts.len(),
            points = selected.len(),
            truncated = result.truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cohort analysis computed"
        );
        result
    }

    /// Points for one survey inside `range`, stride-sampled down to the input cap.
    fn select(
        &self,
        points: &[ResponsePoint],
        survey_id: &str,
        range: &TimeRange,
    ) -> (Vec<ResponsePoint>, usize) {
        let selected: Vec<ResponsePoint> = points
            .iter()
            .filter(|p| p.survey_id == survey_id && range.contains(p.timestamp))
            .cloned()
            .collect();
        let total = selected.len();
        let (selected, stride) = sample_points(selected, self.limits.max_input_points);
        if stride > 1 {
            warn!(
                survey_id = survey_id,
                total = total,
                kept = selected.len(),
                stride = stride,
                "Input capped by sampling"
            );
        }
        (selected, stride)
    }
}
