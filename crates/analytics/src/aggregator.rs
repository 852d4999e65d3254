//! Time-series aggregation: buckets response points into contiguous,
//! zero-filled calendar periods.

use chrono::{DateTime, Utc};
use survey_core::error::{InsightsError, InsightsResult};
use survey_core::types::{
    Granularity, MetricKind, ResponsePoint, TimeRange, TimeSeries, TimeSeriesBucket,
};
use tracing::debug;

pub struct Aggregator {
    max_periods: usize,
}

impl Aggregator {
    pub fn new(max_periods: usize) -> Self {
        Self { max_periods }
    }

    /// Bucket `points` into one bucket per period of `range`.
    ///
    /// Periods start at the truncation of `range.start` and continue while the
    /// period start is before `range.end`. Points outside the range, or in a
    /// period past the last bucket, are ignored.
    pub fn aggregate(
        &self,
        points: &[ResponsePoint],
        metric: MetricKind,
        granularity: Granularity,
        range: &TimeRange,
    ) -> InsightsResult<TimeSeries> {
        self.aggregate_sampled(points, metric, granularity, range, 1)
    }

    /// Like [`Aggregator::aggregate`] for input that was stride-sampled; bucket
    /// totals are scaled back up by `stride`.
    pub fn aggregate_sampled(
        &self,
        points: &[ResponsePoint],
        metric: MetricKind,
        granularity: Granularity,
        range: &TimeRange,
        stride: usize,
    ) -> InsightsResult<TimeSeries> {
        range.validate()?;
        let starts = self.period_starts(granularity, range)?;

        let mut buckets = Vec::with_capacity(starts.len());
        for (i, start) in starts.iter().enumerate() {
            let end = match starts.get(i + 1) {
                Some(next) => *next,
                None => next_start(granularity, *start)?,
            };
            buckets.push(TimeSeriesBucket {
                period_key: granularity.period_key(*start),
                period_start: *start,
                period_end: end,
                count: 0,
                completed_count: 0,
                sum_value: 0.0,
            });
        }

        let mut skipped = 0usize;
        for point in points {
            if !range.contains(point.timestamp) {
                skipped += 1;
                continue;
            }
            let Some(start) = granularity.period_start(point.timestamp) else {
                skipped += 1;
                continue;
            };
            match starts.binary_search(&start) {
                Ok(idx) => {
                    let bucket = &mut buckets[idx];
                    bucket.count += 1;
                    if point.completed {
                        bucket.completed_count += 1;
                    }
                    if let Some(v) = point.value {
                        bucket.sum_value += v;
                    }
                }
                Err(_) => skipped += 1,
            }
        }

        if stride > 1 {
            let factor = stride as u64;
            for bucket in &mut buckets {
                bucket.count *= factor;
                bucket.completed_count *= factor;
                bucket.sum_value *= stride as f64;
            }
        }

        let values: Vec<f64> = buckets.iter().map(|b| b.metric_value(metric)).collect();
        let deltas = period_deltas(&values);

        debug!(
            metric = %metric,
            granularity = %granularity,
            buckets = buckets.len(),
            points = points.len(),
            skipped = skipped,
            "Aggregated response series"
        );

        Ok(TimeSeries {
            metric,
            granularity,
            buckets,
            values,
            deltas,
            sample_stride: stride.max(1),
        })
    }

    /// Every period start in `range`, oldest first.
    pub fn period_starts(
        &self,
        granularity: Granularity,
        range: &TimeRange,
    ) -> InsightsResult<Vec<DateTime<Utc>>> {
        range.validate()?;
        let mut current = granularity
            .period_start(range.start)
            .ok_or_else(|| InsightsError::InvalidRange("range start out of bounds".to_string()))?;
        let mut starts = Vec::new();
        while current < range.end {
            if starts.len() >= self.max_periods {
                return Err(InsightsError::InvalidRange(format!(
                    "range spans more than {} {} periods",
                    self.max_periods, granularity
                )));
            }
            starts.push(current);
            current = next_start(granularity, current)?;
        }
        Ok(starts)
    }
}

fn next_start(granularity: Granularity, start: DateTime<Utc>) -> InsightsResult<DateTime<Utc>> {
    granularity
        .next_period_start(start)
        .ok_or_else(|| InsightsError::InvalidRange("range end out of bounds".to_string()))
}

/// `(v[n] - v[n-1]) / v[n-1]`, `None` for the first value and for zero denominators.
pub fn period_deltas(values: &[f64]) -> Vec<Option<f64>> {
    let mut deltas = Vec::with_capacity(values.len());
    if values.is_empty() {
        return deltas;
    }
    deltas.push(None);
    for w in values.windows(2) {
        let (prev, cur) = (w[0], w[1]);
        deltas.push(if prev == 0.0 {
            None
        } else {
            Some((cur - prev) / prev)
        });
    }
    deltas
}

/// Cap `points` at `max` by keeping every k-th point after a deterministic
/// sort by `(timestamp, user_id)`. Returns the kept points and the stride.
pub fn sample_points(mut points: Vec<ResponsePoint>, max: usize) -> (Vec<ResponsePoint>, usize) {
    if max == 0 || points.len() <= max {
        return (points, 1);
    }
    let stride = points.len().div_ceil(max);
    points.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    let sampled = points.into_iter().step_by(stride).collect();
    (sampled, stride)
}
