//! Cohort analysis: groups users by the period of their first response and
//! tracks activity by relative age.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use survey_core::error::{InsightsError, InsightsResult};
use survey_core::types::{
    Cohort, CohortAnalysisResult, CohortPeriod, CohortRank, CohortSnapshot, ResponsePoint,
};
use tracing::debug;

#[derive(Default)]
struct AgeAccumulator<'a> {
    active: BTreeSet<&'a str>,
    responses: u64,
    completed: u64,
    response_time_sum: f64,
    response_time_count: u64,
}

pub struct CohortAnalyzer {
    max_periods: usize,
}

impl CohortAnalyzer {
    /// Analyzer that keeps at most the `max_periods` most recent periods.
    pub fn new(max_periods: usize) -> Self {
        Self {
            max_periods: max_periods.max(1),
        }
    }

    /// Build the cohort × age matrix for `points`.
    ///
    /// Every cohort gets one snapshot per age from 0 up to the latest period
    /// observed in the input, including ages with no activity. Points older
    /// than the period window are dropped first, so a user whose earlier
    /// history falls outside it is assigned to their first period inside it.
    pub fn analyze(
        &self,
        survey_id: &str,
        points: &[ResponsePoint],
        period_type: CohortPeriod,
    ) -> InsightsResult<CohortAnalysisResult> {
        let granularity = period_type.granularity();
        let period_of = |ts: DateTime<Utc>| {
            granularity.period_start(ts).ok_or_else(|| {
                InsightsError::InvalidRange(format!("timestamp {ts} out of bounds"))
            })
        };

        let Some(last_ts) = points.iter().map(|p| p.timestamp).max() else {
            return Ok(CohortAnalysisResult::empty(survey_id, period_type));
        };
        let last_period = period_of(last_ts)?;

        // Each point paired with its period start, limited to the window.
        let mut windowed: Vec<(&ResponsePoint, DateTime<Utc>)> = Vec::with_capacity(points.len());
        for p in points {
            let period = period_of(p.timestamp)?;
            if granularity.periods_between(period, last_period) < self.max_periods as i64 {
                windowed.push((p, period));
            }
        }
        let truncated = windowed.len() < points.len();
        if truncated {
            debug!(
                survey_id = survey_id,
                dropped = points.len() - windowed.len(),
                max_periods = self.max_periods,
                "Cohort input limited to recent periods"
            );
        }

        let mut origin_of: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        for (p, period) in &windowed {
            origin_of
                .entry(p.user_id.as_str())
                .and_modify(|origin| {
                    if *period < *origin {
                        *origin = *period;
                    }
                })
                .or_insert(*period);
        }

        let mut members: BTreeMap<DateTime<Utc>, BTreeSet<String>> = BTreeMap::new();
        for (user, origin) in &origin_of {
            members.entry(*origin).or_default().insert(user.to_string());
        }

        let mut cells: BTreeMap<(DateTime<Utc>, usize), AgeAccumulator> = BTreeMap::new();
        for (p, period) in &windowed {
            let origin = origin_of[p.user_id.as_str()];
            let age = granularity.periods_between(origin, *period).max(0) as usize;
            let cell = cells.entry((origin, age)).or_default();
            cell.active.insert(p.user_id.as_str());
            cell.responses += 1;
            if p.completed {
                cell.completed += 1;
            }
            if let Some(ms) = p.response_time_ms {
                cell.response_time_sum += ms;
                cell.response_time_count += 1;
            }
        }

        let mut cohorts = Vec::with_capacity(members.len());
        let mut snapshots = Vec::new();
        let mut ranking = Vec::new();
        for (origin, users) in members {
            let cohort_key = granularity.period_key(origin);
            let size = users.len();
            let max_age = granularity.periods_between(origin, last_period).max(0) as usize;
            for age in 0..=max_age {
                snapshots.push(snapshot_for(&cohort_key, age, size, cells.get(&(origin, age))));
            }
            if max_age >= 1 {
                let retained = cells.get(&(origin, 1)).map_or(0, |cell| cell.active.len());
                ranking.push(CohortRank {
                    cohort_key: cohort_key.clone(),
                    size,
                    age1_retention: retained as f64 / size as f64,
                });
            }
            cohorts.push(Cohort {
                cohort_key,
                period_type,
                origin_period: origin,
                member_user_ids: users,
            });
        }

        let average_retention = average_retention_curve(&snapshots);
        ranking.sort_by(|a, b| {
            b.age1_retention
                .total_cmp(&a.age1_retention)
                .then_with(|| a.cohort_key.cmp(&b.cohort_key))
        });

        debug!(
            survey_id = survey_id,
            cohorts = cohorts.len(),
            snapshots = snapshots.len(),
            "Cohort matrix computed"
        );

        Ok(CohortAnalysisResult {
            survey_id: survey_id.to_string(),
            period_type,
            cohorts,
            snapshots,
            average_retention,
            ranking,
            truncated,
            computed_at: Utc::now(),
        })
    }
}

fn snapshot_for(
    cohort_key: &str,
    age: usize,
    size: usize,
    cell: Option<&AgeAccumulator>,
) -> CohortSnapshot {
    match cell {
        Some(cell) => CohortSnapshot {
            cohort_key: cohort_key.to_string(),
            age_index: age,
            retained_count: cell.active.len(),
            retention_rate: cell.active.len() as f64 / size as f64,
            completion_rate: if cell.responses > 0 {
                cell.completed as f64 / cell.responses as f64
            } else {
                0.0
            },
            avg_response_time_ms: (cell.response_time_count > 0)
                .then(|| cell.response_time_sum / cell.response_time_count as f64),
        },
        None => CohortSnapshot {
            cohort_key: cohort_key.to_string(),
            age_index: age,
            retained_count: 0,
            retention_rate: 0.0,
            completion_rate: 0.0,
            avg_response_time_ms: None,
        },
    }
}

fn average_retention_curve(snapshots: &[CohortSnapshot]) -> Vec<f64> {
    let Some(longest) = snapshots.iter().map(|s| s.age_index).max() else {
        return Vec::new();
    };
    let mut sums = vec![0.0; longest + 1];
    let mut counts = vec![0usize; longest + 1];
    for s in snapshots {
        sums[s.age_index] += s.retention_rate;
        counts[s.age_index] += 1;
    }
    sums.iter()
        .zip(&counts)
        .map(|(sum, count)| if *count > 0 { sum / *count as f64 } else { 0.0 })
        .collect()
}

/// Mean age-1 retention across ranked cohorts.
pub fn average_age1_retention(result: &CohortAnalysisResult) -> Option<f64> {
    result.average_retention.get(1).copied()
}

/// Ranked cohorts whose age-1 retention sits more than `margin` below the average.
pub fn underperforming_cohorts(result: &CohortAnalysisResult, margin: f64) -> Vec<&CohortRank> {
    let Some(avg) = average_age1_retention(result) else {
        return Vec::new();
    };
    result
        .ranking
        .iter()
        .filter(|r| r.age1_retention < avg - margin)
        .collect()
}

/// Best `ceil(n / 4)` ranked cohorts.
pub fn top_quartile_cohorts(result: &CohortAnalysisResult) -> &[CohortRank] {
    let n = result.ranking.len();
    &result.ranking[..n.div_ceil(4)]
}
