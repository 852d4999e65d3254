//! Insight synthesis. Turns trend, anomaly and cohort outputs into a ranked
//! list of typed insights with templated recommendations.

use crate::cohort::{average_age1_retention, top_quartile_cohorts, underperforming_cohorts};
use serde_json::json;
use survey_core::config::{AnalyticsConfig, InsightConfig};
use survey_core::error::InsightsError;
use survey_core::types::{
    Anomaly, AnomalyDirection, CohortAnalysisResult, Impact, Insight, InsightType, MetricKind,
    TrendDirection, TrendResult,
};

/// Cohorts needed before a top quartile is meaningful.
const MIN_RANKED_COHORTS_FOR_OPPORTUNITY: usize = 4;
/// Cohort size at which a retention warning reaches full confidence.
const FULL_CONFIDENCE_COHORT_SIZE: f64 = 30.0;

pub struct InsightInputs<'a> {
    pub metric: MetricKind,
    pub trend: &'a TrendResult,
    pub anomalies: &'a [Anomaly],
    pub cohorts: Option<&'a CohortAnalysisResult>,
}

pub struct InsightSynthesizer {
    insight: InsightConfig,
    high_impact_z: f64,
    underperformance_margin: f64,
}

impl InsightSynthesizer {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            insight: config.insight.clone(),
            high_impact_z: config.anomaly.high_impact_z,
            underperformance_margin: config.cohort.underperformance_margin,
        }
    }

    /// Evaluate the rules in order (trend, anomaly, warning, opportunity),
    /// then rank the result.
    pub fn synthesize(&self, inputs: &InsightInputs<'_>) -> Vec<Insight> {
        let metric = inputs.metric.as_str();
        let mut insights = Vec::new();

        if let Some(insight) = self.trend_insight(metric, inputs.trend) {
            insights.push(insight);
        }
        insights.extend(inputs.anomalies.iter().map(|a| self.anomaly_insight(metric, a)));
        if let Some(cohorts) = inputs.cohorts {
            insights.extend(self.retention_warnings(metric, cohorts));
            insights.extend(self.opportunities(metric, inputs.trend, cohorts));
        }

        rank_insights(&mut insights);
        insights
    }

    fn trend_insight(&self, metric: &str, trend: &TrendResult) -> Option<Insight> {
        if trend.direction == TrendDirection::Stable
            || trend.confidence < self.insight.trend_min_confidence
        {
            return None;
        }
        let impact = if trend.confidence >= self.insight.high_impact_trend_confidence {
            Impact::High
        } else {
            Impact::Medium
        };
        let recommendation = match trend.direction {
            TrendDirection::Increasing => format!(
                "Keep the current survey cadence and watch whether {metric} keeps climbing."
            ),
            _ => format!(
                "Review recent changes to the survey flow; {metric} has been falling steadily."
            ),
        };
        Some(Insight {
            insight_type: InsightType::Trend,
            metric: metric.to_string(),
            message: format!(
                "{metric} is {} by {:.2} per period (R² {:.2})",
                trend.direction.as_str(),
                trend.slope.abs(),
                trend.r_squared
            ),
            recommendation,
            confidence: trend.confidence,
            impact,
            supporting_data: json!({
                "slope": trend.slope,
                "intercept": trend.intercept,
                "r_squared": trend.r_squared,
                "sample_size": trend.sample_size,
                "seasonal_period": trend.seasonal_period,
            }),
        })
    }

    fn anomaly_insight(&self, metric: &str, anomaly: &Anomaly) -> Insight {
        let z = anomaly.z_score.abs();
        let (word, recommendation) = match anomaly.direction {
            AnomalyDirection::Up => (
                "spike",
                format!("Check what drove the jump in {metric} during {}.", anomaly.period_key),
            ),
            AnomalyDirection::Down => (
                "drop",
                format!(
                    "Investigate delivery or tracking issues around {}.",
                    anomaly.period_key
                ),
            ),
        };
        Insight {
            insight_type: InsightType::Anomaly,
            metric: metric.to_string(),
            message: format!(
                "Unusual {word} in {metric} for {}: {:.2} (z = {:.2})",
                anomaly.period_key, anomaly.value, anomaly.z_score
            ),
            recommendation,
            confidence: (z / self.high_impact_z).min(1.0),
            impact: if z > self.high_impact_z {
                Impact::High
            } else {
                Impact::Medium
            },
            supporting_data: json!({
                "period_key": anomaly.period_key,
                "index": anomaly.index,
                "value": anomaly.value,
                "z_score": anomaly.z_score,
            }),
        }
    }

    fn retention_warnings(&self, metric: &str, cohorts: &CohortAnalysisResult) -> Vec<Insight> {
        let Some(avg) = average_age1_retention(cohorts) else {
            return Vec::new();
        };
        underperforming_cohorts(cohorts, self.underperformance_margin)
            .into_iter()
            .map(|rank| {
                let gap = avg - rank.age1_retention;
                Insight {
                    insight_type: InsightType::Warning,
                    metric: metric.to_string(),
                    message: format!(
                        "Cohort {} retained {:.0}% after one period, {:.0} points below the {:.0}% average",
                        rank.cohort_key,
                        rank.age1_retention * 100.0,
                        gap * 100.0,
                        avg * 100.0
                    ),
                    recommendation: format!(
                        "Follow up with the {} cohort; compare its onboarding to stronger cohorts.",
                        rank.cohort_key
                    ),
                    confidence: (rank.size as f64 / FULL_CONFIDENCE_COHORT_SIZE).min(1.0),
                    impact: if gap >= self.insight.severe_underperformance_margin {
                        Impact::High
                    } else {
                        Impact::Medium
                    },
                    supporting_data: json!({
                        "cohort_key": rank.cohort_key,
                        "cohort_size": rank.size,
                        "age1_retention": rank.age1_retention,
                        "average_age1_retention": avg,
                    }),
                }
            })
            .collect()
    }

    fn opportunities(
        &self,
        metric: &str,
        trend: &TrendResult,
        cohorts: &CohortAnalysisResult,
    ) -> Vec<Insight> {
        if trend.direction != TrendDirection::Increasing
            || trend.confidence < self.insight.opportunity_min_confidence
            || cohorts.ranking.len() < MIN_RANKED_COHORTS_FOR_OPPORTUNITY
        {
            return Vec::new();
        }
        top_quartile_cohorts(cohorts)
            .iter()
            .map(|rank| Insight {
                insight_type: InsightType::Opportunity,
                metric: metric.to_string(),
                message: format!(
                    "{metric} is rising and cohort {} is in the top quartile ({:.0}% age-1 retention)",
                    rank.cohort_key,
                    rank.age1_retention * 100.0
                ),
                recommendation: format!(
                    "Reuse what worked for the {} cohort when targeting new respondents.",
                    rank.cohort_key
                ),
                confidence: trend.confidence,
                impact: Impact::Low,
                supporting_data: json!({
                    "cohort_key": rank.cohort_key,
                    "cohort_size": rank.size,
                    "age1_retention": rank.age1_retention,
                    "trend_slope": trend.slope,
                }),
            })
            .collect()
    }
}

/// Insight standing in for an analysis that hit numeric instability.
pub fn degraded_insight(metric: MetricKind, error: &InsightsError) -> Insight {
    Insight {
        insight_type: InsightType::Warning,
        metric: metric.as_str().to_string(),
        message: format!("Analysis of {} was degraded: {error}", metric.as_str()),
        recommendation: "Check the source data for extreme or corrupt values.".to_string(),
        confidence: 0.0,
        impact: Impact::Low,
        supporting_data: json!({ "error": error.to_string() }),
    }
}

/// Stable sort by impact (high first), then confidence descending.
pub fn rank_insights(insights: &mut [Insight]) {
    insights.sort_by(|a, b| {
        b.impact
            .rank()
            .cmp(&a.impact.rank())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use survey_core::types::{CohortPeriod, CohortRank};

    fn trend(direction: TrendDirection, confidence: f64) -> TrendResult {
        TrendResult {
            slope: if direction == TrendDirection::Decreasing { -2.0 } else { 2.0 },
            intercept: 10.0,
            r_squared: confidence,
            direction,
            confidence,
            seasonality_score: 0.0,
            seasonal_period: None,
            sample_size: 10,
            sufficient_data: true,
        }
    }

    fn insight(impact: Impact, confidence: f64, message: &str) -> Insight {
        Insight {
            insight_type: InsightType::Trend,
            metric: "response_count".to_string(),
            message: message.to_string(),
            recommendation: String::new(),
            confidence,
            impact,
            supporting_data: serde_json::Value::Null,
        }
    }

    fn cohorts(rates: &[f64]) -> CohortAnalysisResult {
        let mut result = CohortAnalysisResult::empty("survey-1", CohortPeriod::Weekly);
        result.ranking = rates
            .iter()
            .enumerate()
            .map(|(i, r)| CohortRank {
                cohort_key: format!("2024-W{:02}", i + 1),
                size: 20,
                age1_retention: *r,
            })
            .collect();
        result
            .ranking
            .sort_by(|a, b| b.age1_retention.total_cmp(&a.age1_retention));
        let avg = rates.iter().sum::<f64>() / rates.len() as f64;
        result.average_retention = vec![1.0, avg];
        result.computed_at = Utc::now();
        result
    }

    fn synthesizer() -> InsightSynthesizer {
        InsightSynthesizer::new(&AnalyticsConfig::default())
    }

    #[test]
    fn test_ranking_orders_by_impact() {
        let mut insights = vec![
            insight(Impact::Low, 0.9, "low"),
            insight(Impact::High, 0.5, "high"),
            insight(Impact::Medium, 0.7, "medium"),
        ];
        rank_insights(&mut insights);
        let impacts: Vec<Impact> = insights.iter().map(|i| i.impact).collect();
        assert_eq!(impacts, vec![Impact::High, Impact::Medium, Impact::Low]);
    }

    #[test]
    fn test_ranking_ties_keep_rule_order() {
        let mut insights = vec![
            insight(Impact::Medium, 0.5, "first"),
            insight(Impact::Medium, 0.8, "confident"),
            insight(Impact::Medium, 0.5, "second"),
        ];
        rank_insights(&mut insights);
        let order: Vec<&str> = insights.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(order, vec!["confident", "first", "second"]);
    }

    #[test]
    fn test_trend_rule_respects_confidence_and_direction() {
        let s = synthesizer();
        let strong = trend(TrendDirection::Increasing, 0.95);
        let out = s.synthesize(&InsightInputs {
            metric: MetricKind::ResponseCount,
            trend: &strong,
            anomalies: &[],
            cohorts: None,
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].insight_type, InsightType::Trend);
        assert_eq!(out[0].impact, Impact::High);

        let weak = trend(TrendDirection::Increasing, 0.4);
        let stable = trend(TrendDirection::Stable, 0.9);
        for t in [&weak, &stable] {
            let out = s.synthesize(&InsightInputs {
                metric: MetricKind::ResponseCount,
                trend: t,
                anomalies: &[],
                cohorts: None,
            });
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_anomaly_impact_by_z() {
        let s = synthesizer();
        let flat = trend(TrendDirection::Stable, 0.0);
        let anomalies = vec![
            Anomaly {
                index: 7,
                period_key: "2024-W08".to_string(),
                value: 30.0,
                z_score: -3.3,
                direction: AnomalyDirection::Down,
            },
            Anomaly {
                index: 11,
                period_key: "2024-W12".to_string(),
                value: 90.0,
                z_score: 5.4,
                direction: AnomalyDirection::Up,
            },
        ];
        let out = s.synthesize(&InsightInputs {
            metric: MetricKind::ResponseCount,
            trend: &flat,
            anomalies: &anomalies,
            cohorts: None,
        });
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].impact, Impact::High);
        assert_eq!(out[0].supporting_data["index"], 11);
        assert_eq!(out[1].impact, Impact::Medium);
    }

    #[test]
    fn test_underperforming_cohort_warning() {
        let s = synthesizer();
        let flat = trend(TrendDirection::Stable, 0.0);
        let c = cohorts(&[0.6, 0.55, 0.2]);
        let out = s.synthesize(&InsightInputs {
            metric: MetricKind::CompletionRate,
            trend: &flat,
            anomalies: &[],
            cohorts: Some(&c),
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].insight_type, InsightType::Warning);
        assert_eq!(out[0].supporting_data["cohort_key"], "2024-W03");
    }

    #[test]
    fn test_opportunity_for_top_quartile() {
        let s = synthesizer();
        let rising = trend(TrendDirection::Increasing, 0.7);
        let c = cohorts(&[0.5, 0.45, 0.48, 0.52, 0.47]);
        let out = s.synthesize(&InsightInputs {
            metric: MetricKind::ResponseCount,
            trend: &rising,
            anomalies: &[],
            cohorts: Some(&c),
        });
        let opportunities: Vec<&Insight> = out
            .iter()
            .filter(|i| i.insight_type == InsightType::Opportunity)
            .collect();
        // ceil(5 / 4) = 2 cohorts.
        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].supporting_data["cohort_key"], "2024-W04");
        assert_eq!(out.last().map(|i| i.impact), Some(Impact::Low));
    }

    #[test]
    fn test_no_opportunity_when_declining() {
        let s = synthesizer();
        let falling = trend(TrendDirection::Decreasing, 0.9);
        let c = cohorts(&[0.5, 0.45, 0.48, 0.52]);
        let out = s.synthesize(&InsightInputs {
            metric: MetricKind::ResponseCount,
            trend: &falling,
            anomalies: &[],
            cohorts: Some(&c),
        });
        assert!(out.iter().all(|i| i.insight_type != InsightType::Opportunity));
    }

    #[test]
    fn test_degraded_insight() {
        let err = InsightsError::ComputationOverflow("variance exploded".to_string());
        let insight = degraded_insight(MetricKind::AverageValue, &err);
        assert_eq!(insight.insight_type, InsightType::Warning);
        assert_eq!(insight.impact, Impact::Low);
        assert_eq!(insight.confidence, 0.0);
        assert!(insight.message.contains("variance exploded"));
    }
}
