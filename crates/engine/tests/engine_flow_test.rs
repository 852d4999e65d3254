//! Integration tests for the trend and cohort request flow through the engine.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;
    use survey_core::config::AnalyticsConfig;
    use survey_core::error::InsightsError;
    use survey_core::types::*;
    use survey_engine::AnalyticsEngine;
    use tokio::task::JoinSet;

    const FIXTURE: [usize; 12] = [50, 52, 49, 70, 51, 53, 48, 30, 52, 54, 50, 90];

    // 2024-01-01 is a Monday.
    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(AnalyticsConfig::default()).unwrap()
    }

    fn trend_request(metric: MetricKind, granularity: Granularity, days: i64) -> TrendRequest {
        TrendRequest {
            survey_id: "survey-1".to_string(),
            metric,
            granularity,
            range: TimeRange::new(origin(), origin() + Duration::days(days)).unwrap(),
        }
    }

    /// Week `w` gets `10 + 5w` responses, each from a first-time user.
    fn growing_weekly_points(weeks: i64) -> Arc<[ResponsePoint]> {
        let mut points = Vec::new();
        for w in 0..weeks {
            for i in 0..(10 + 5 * w) {
                let ts = origin() + Duration::weeks(w) + Duration::hours(i);
                points.push(ResponsePoint::new("survey-1", &format!("u{w}-{i}"), ts, i % 3 != 0));
            }
        }
        points.into()
    }

    fn fixture_daily_points() -> Arc<[ResponsePoint]> {
        let mut points = Vec::new();
        for (d, count) in FIXTURE.iter().enumerate() {
            for i in 0..*count {
                let ts = origin() + Duration::days(d as i64) + Duration::minutes(i as i64);
                points.push(ResponsePoint::new("survey-1", &format!("d{d}-{i}"), ts, true));
            }
        }
        points.into()
    }

    #[tokio::test]
    async fn test_growing_series_yields_high_impact_trend() {
        let engine = engine();
        let result = engine
            .analyze_trends(
                trend_request(MetricKind::ResponseCount, Granularity::Weekly, 84),
                growing_weekly_points(12),
            )
            .await
            .unwrap();

        assert_eq!(result.time_series.buckets.len(), 12);
        assert_eq!(result.time_series.values[0], 10.0);
        assert_eq!(result.time_series.values[11], 65.0);
        assert_eq!(result.trend.direction, TrendDirection::Increasing);
        assert!((result.trend.slope - 5.0).abs() < 1e-9);
        assert!(result.anomalies.is_empty());

        let first = &result.insights[0];
        assert_eq!(first.insight_type, InsightType::Trend);
        assert_eq!(first.impact, Impact::High);
        assert!(result
            .insights
            .iter()
            .any(|i| i.insight_type == InsightType::Opportunity));

        let payload = serde_json::to_value(result.as_ref()).unwrap();
        assert_eq!(payload["trend"]["direction"], "increasing");
        assert_eq!(payload["time_series"]["buckets"][0]["period_key"], "2024-W01");
    }

    #[tokio::test]
    async fn test_fixture_anomalies_ranked_first() {
        let engine = engine();
        let result = engine
            .analyze_trends(
                trend_request(MetricKind::ResponseCount, Granularity::Daily, 12),
                fixture_daily_points(),
            )
            .await
            .unwrap();

        let indices: Vec<usize> = result.anomalies.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![7, 11]);
        assert_eq!(result.anomalies[1].period_key, "2024-01-12");

        assert_eq!(result.insights.len(), 2);
        assert_eq!(result.insights[0].insight_type, InsightType::Anomaly);
        assert_eq!(result.insights[0].impact, Impact::High);
        assert_eq!(result.insights[1].impact, Impact::Medium);
    }

    #[tokio::test]
    async fn test_empty_input_is_zero_filled() {
        let engine = engine();
        let result = engine
            .analyze_trends(
                trend_request(MetricKind::CompletionRate, Granularity::Daily, 14),
                Vec::new().into(),
            )
            .await
            .unwrap();
        assert_eq!(result.time_series.buckets.len(), 14);
        assert_eq!(result.trend.direction, TrendDirection::Stable);
        assert_eq!(result.trend.confidence, 0.0);
        assert!(result.insights.is_empty());
    }

    #[tokio::test]
    async fn test_short_range_is_low_confidence_not_error() {
        let engine = engine();
        let result = engine
            .analyze_trends(
                trend_request(MetricKind::ResponseCount, Granularity::Daily, 2),
                fixture_daily_points(),
            )
            .await
            .unwrap();
        assert!(!result.trend.sufficient_data);
        assert_eq!(result.trend.direction, TrendDirection::Stable);
        assert_eq!(result.trend.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_reversed_range_is_rejected_before_computation() {
        let engine = engine();
        let request = TrendRequest {
            survey_id: "survey-1".to_string(),
            metric: MetricKind::ResponseCount,
            granularity: Granularity::Daily,
            range: TimeRange {
                start: origin() + Duration::days(5),
                end: origin(),
            },
        };
        let err = engine
            .analyze_trends(request, fixture_daily_points())
            .await
            .unwrap_err();
        assert!(matches!(err, InsightsError::InvalidRange(_)));
        assert_eq!(engine.trend_cache_stats().computations, 0);
        assert_eq!(engine.cohort_cache_stats().computations, 0);
    }

    #[tokio::test]
    async fn test_overflow_surfaces_as_degraded_insight() {
        let engine = engine();
        let points: Vec<ResponsePoint> = (0..6)
            .map(|d| {
                let sign = if d % 2 == 0 { 1.0 } else { -1.0 };
                ResponsePoint::new("survey-1", "u", origin() + Duration::days(d), true)
                    .with_value(sign * 1e300)
            })
            .collect();
        let result = engine
            .analyze_trends(
                trend_request(MetricKind::AverageValue, Granularity::Daily, 6),
                points.into(),
            )
            .await
            .unwrap();
        assert_eq!(result.trend.confidence, 0.0);
        assert_eq!(result.insights.len(), 1);
        assert_eq!(result.insights[0].insight_type, InsightType::Warning);
        assert_eq!(result.insights[0].impact, Impact::Low);
    }

    #[tokio::test]
    async fn test_underperforming_cohort_warning() {
        let engine = engine();
        let mut points = Vec::new();
        let mut push = |user: String, week: i64| {
            let ts = origin() + Duration::weeks(week) + Duration::hours(2);
            points.push(ResponsePoint::new("survey-1", &user, ts, true));
        };
        for (week, returning) in [(0i64, 8), (1, 8), (2, 1)] {
            for i in 0..10 {
                push(format!("w{week}-{i}"), week);
            }
            for i in 0..returning {
                push(format!("w{week}-{i}"), week + 1);
            }
        }

        let result = engine
            .analyze_trends(
                trend_request(MetricKind::ResponseCount, Granularity::Weekly, 28),
                points.into(),
            )
            .await
            .unwrap();
        let warning = result
            .insights
            .iter()
            .find(|i| i.insight_type == InsightType::Warning)
            .expect("warning insight");
        assert_eq!(warning.supporting_data["cohort_key"], "2024-W03");
        assert_eq!(warning.impact, Impact::High);
    }

    #[tokio::test]
    async fn test_cohort_matrix_through_engine() {
        let engine = engine();
        let request = CohortRequest {
            survey_id: "survey-1".to_string(),
            period: CohortPeriod::Weekly,
            range: TimeRange::new(origin(), origin() + Duration::days(84)).unwrap(),
        };
        let result = engine
            .analyze_cohorts(request, growing_weekly_points(12))
            .await
            .unwrap();
        assert_eq!(result.cohorts.len(), 12);
        for cohort in &result.cohorts {
            let age0 = result.snapshot(&cohort.cohort_key, 0).unwrap();
            assert_eq!(age0.retained_count, cohort.size());
        }
        assert!(result.snapshots.iter().all(|s| s.retention_rate >= 0.0));
    }

    #[tokio::test]
    async fn test_repeat_request_served_from_cache() {
        let engine = engine();
        let points = fixture_daily_points();
        let request = trend_request(MetricKind::ResponseCount, Granularity::Daily, 12);
        let first = engine
            .analyze_trends(request.clone(), Arc::clone(&points))
            .await
            .unwrap();
        let second = engine.analyze_trends(request, points).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = engine.trend_cache_stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        // The cached trend result short-circuits the cohort lookup.
        assert_eq!(engine.cohort_cache_stats().hits, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_compute_once() {
        let engine = Arc::new(engine());
        let points = fixture_daily_points();
        let request = trend_request(MetricKind::ResponseCount, Granularity::Daily, 12);

        let mut tasks = JoinSet::new();
        for _ in 0..12 {
            let engine = Arc::clone(&engine);
            let points = Arc::clone(&points);
            let request = request.clone();
            tasks.spawn(async move { engine.analyze_trends(request, points).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.unwrap().unwrap());
        }
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.anomalies == results[0].anomalies));
        assert_eq!(engine.trend_cache_stats().computations, 1);
        assert_eq!(engine.cohort_cache_stats().computations, 1);
    }
}
