use crate::error::{InsightsError, InsightsResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single survey response, as supplied by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePoint {
    pub survey_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
    #[serde(default)]
    pub value: Option<f64>,
    /// Time the respondent spent on the survey.
    #[serde(default)]
    pub response_time_ms: Option<f64>,
}

impl ResponsePoint {
    pub fn new(survey_id: &str, user_id: &str, timestamp: DateTime<Utc>, completed: bool) -> Self {
        Self {
            survey_id: survey_id.to_string(),
            user_id: user_id.to_string(),
            timestamp,
            completed,
            value: None,
            response_time_ms: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_response_time_ms(mut self, ms: f64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }
}

/// Calendar period used to bucket a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    /// Start of the period containing `ts`: midnight, ISO week Monday, or first of month.
    pub fn period_start(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = ts.date_naive();
        let start = match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            Granularity::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?,
        };
        midnight(start)
    }

    /// Start of the period following the one that begins at `start`.
    pub fn next_period_start(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Daily => start.checked_add_signed(Duration::days(1)),
            Granularity::Weekly => start.checked_add_signed(Duration::days(7)),
            Granularity::Monthly => {
                let date = start.date_naive();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                midnight(NaiveDate::from_ymd_opt(year, month, 1)?)
            }
        }
    }

    /// Whole periods from the period starting at `from` to the one starting at `to`.
    pub fn periods_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        match self {
            Granularity::Daily => (to - from).num_days(),
            Granularity::Weekly => (to - from).num_days().div_euclid(7),
            Granularity::Monthly => {
                let (a, b) = (from.date_naive(), to.date_naive());
                (b.year() as i64 * 12 + b.month() as i64) - (a.year() as i64 * 12 + a.month() as i64)
            }
        }
    }

    /// Stable label for a period start, e.g. `2024-03-05`, `2024-W10`, `2024-03`.
    pub fn period_key(&self, start: DateTime<Utc>) -> String {
        match self {
            Granularity::Daily => start.format("%Y-%m-%d").to_string(),
            Granularity::Weekly => {
                let week = start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Granularity::Monthly => start.format("%Y-%m").to_string(),
        }
    }
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = InsightsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            other => Err(InsightsError::InvalidRange(format!(
                "unsupported granularity '{other}'"
            ))),
        }
    }
}

/// Period type a cohort is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortPeriod {
    Weekly,
    Monthly,
}

impl CohortPeriod {
    pub fn granularity(&self) -> Granularity {
        match self {
            CohortPeriod::Weekly => Granularity::Weekly,
            CohortPeriod::Monthly => Granularity::Monthly,
        }
    }

    /// Cohort period paired with a trend granularity.
    pub fn for_granularity(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Monthly => CohortPeriod::Monthly,
            Granularity::Daily | Granularity::Weekly => CohortPeriod::Weekly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.granularity().as_str()
    }
}

impl FromStr for CohortPeriod {
    type Err = InsightsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Granularity>()? {
            Granularity::Weekly => Ok(CohortPeriod::Weekly),
            Granularity::Monthly => Ok(CohortPeriod::Monthly),
            Granularity::Daily => Err(InsightsError::InvalidRange(
                "cohorts support weekly or monthly periods only".to_string(),
            )),
        }
    }
}

/// Which value a bucket contributes to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ResponseCount,
    CompletionRate,
    AverageValue,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ResponseCount => "response_count",
            MetricKind::CompletionRate => "completion_rate",
            MetricKind::AverageValue => "average_value",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = InsightsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response_count" => Ok(MetricKind::ResponseCount),
            "completion_rate" => Ok(MetricKind::CompletionRate),
            "average_value" => Ok(MetricKind::AverageValue),
            other => Err(InsightsError::InvalidRange(format!(
                "unsupported metric '{other}'"
            ))),
        }
    }
}

/// Request range, half-open: `start <= ts < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> InsightsResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> InsightsResult<()> {
        if self.start > self.end {
            return Err(InsightsError::InvalidRange(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Same admission rule as bucket generation, so every contained
    /// timestamp falls in a generated period.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBucket {
    pub period_key: String,
    pub period_start: DateTime<Utc>,
    /// Exclusive.
    pub period_end: DateTime<Utc>,
    pub count: u64,
    pub completed_count: u64,
    pub sum_value: f64,
}

impl TimeSeriesBucket {
    pub fn metric_value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::ResponseCount => self.count as f64,
            MetricKind::CompletionRate => ratio(self.completed_count as f64, self.count as f64),
            MetricKind::AverageValue => ratio(self.sum_value, self.count as f64),
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Zero-filled series for one metric and granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub metric: MetricKind,
    pub granularity: Granularity,
    pub buckets: Vec<TimeSeriesBucket>,
    pub values: Vec<f64>,
    /// Period-over-period change; `None` for the first bucket and zero denominators.
    pub deltas: Vec<Option<f64>>,
    /// 1 unless the input was sampled down.
    pub sample_stride: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub seasonality_score: f64,
    pub seasonal_period: Option<usize>,
    pub sample_size: usize,
    /// `false` when the series was too short to judge; render as "not enough data yet".
    pub sufficient_data: bool,
}

impl TrendResult {
    /// Neutral result for series too short or too unstable to analyze.
    pub fn insufficient(sample_size: usize) -> Self {
        Self {
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
            direction: TrendDirection::Stable,
            confidence: 0.0,
            seasonality_score: 0.0,
            seasonal_period: None,
            sample_size,
            sufficient_data: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub index: usize,
    pub period_key: String,
    pub value: f64,
    pub z_score: f64,
    pub direction: AnomalyDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub cohort_key: String,
    pub period_type: CohortPeriod,
    pub origin_period: DateTime<Utc>,
    pub member_user_ids: BTreeSet<String>,
}

impl Cohort {
    pub fn size(&self) -> usize {
        self.member_user_ids.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSnapshot {
    pub cohort_key: String,
    pub age_index: usize,
    /// Members with any response in this relative period; reactivations count.
    pub retained_count: usize,
    pub retention_rate: f64,
    pub completion_rate: f64,
    pub avg_response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRank {
    pub cohort_key: String,
    pub size: usize,
    pub age1_retention: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Trend,
    Anomaly,
    Opportunity,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    /// Sort weight, higher first.
    pub fn rank(&self) -> u8 {
        match self {
            Impact::High => 2,
            Impact::Medium => 1,
            Impact::Low => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_type: InsightType,
    pub metric: String,
    pub message: String,
    pub recommendation: String,
    pub confidence: f64,
    pub impact: Impact,
    pub supporting_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRequest {
    pub survey_id: String,
    pub metric: MetricKind,
    pub granularity: Granularity,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRequest {
    pub survey_id: String,
    pub period: CohortPeriod,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysisResult {
    pub survey_id: String,
    pub time_series: TimeSeries,
    pub trend: TrendResult,
    pub anomalies: Vec<Anomaly>,
    pub insights: Vec<Insight>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortAnalysisResult {
    pub survey_id: String,
    pub period_type: CohortPeriod,
    pub cohorts: Vec<Cohort>,
    pub snapshots: Vec<CohortSnapshot>,
    /// Mean retention rate per age index across cohorts that reached that age.
    pub average_retention: Vec<f64>,
    /// Cohorts with an age-1 observation, best first.
    pub ranking: Vec<CohortRank>,
    /// Older periods or points were dropped to stay within the limits.
    #[serde(default)]
    pub truncated: bool,
    pub computed_at: DateTime<Utc>,
}

impl CohortAnalysisResult {
    pub fn empty(survey_id: &str, period_type: CohortPeriod) -> Self {
        Self {
            survey_id: survey_id.to_string(),
            period_type,
            cohorts: Vec::new(),
            snapshots: Vec::new(),
            average_retention: Vec::new(),
            ranking: Vec::new(),
            truncated: false,
            computed_at: Utc::now(),
        }
    }

    pub fn snapshot(&self, cohort_key: &str, age_index: usize) -> Option<&CohortSnapshot> {
        self.snapshots
            .iter()
            .find(|s| s.cohort_key == cohort_key && s.age_index == age_index)
    }
}
