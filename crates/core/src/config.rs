use crate::error::{InsightsError, InsightsResult};
use serde::Deserialize;
use std::time::Duration;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `SURVEY_INSIGHTS__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub cohort: CohortConfig,
    #[serde(default)]
    pub insight: InsightConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendConfig {
    /// Series shorter than this produce a stable, zero-confidence trend.
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    /// `|slope|` below this fraction of the series mean counts as stable.
    #[serde(default = "default_stable_slope_ratio")]
    pub stable_slope_ratio: f64,
    /// Sample size at which the small-sample confidence penalty disappears.
    #[serde(default = "default_full_confidence_points")]
    pub full_confidence_points: usize,
    #[serde(default = "default_seasonality_threshold")]
    pub seasonality_threshold: f64,
    #[serde(default = "default_max_seasonal_lag")]
    pub max_seasonal_lag: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
    /// Rolling baseline length in periods.
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    #[serde(default = "default_high_impact_z")]
    pub high_impact_z: f64,
    #[serde(default = "default_stddev_floor")]
    pub stddev_floor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortConfig {
    /// Absolute retention gap below the average that flags a cohort.
    #[serde(default = "default_underperformance_margin")]
    pub underperformance_margin: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightConfig {
    #[serde(default = "default_trend_min_confidence")]
    pub trend_min_confidence: f64,
    #[serde(default = "default_high_impact_trend_confidence")]
    pub high_impact_trend_confidence: f64,
    #[serde(default = "default_opportunity_min_confidence")]
    pub opportunity_min_confidence: f64,
    #[serde(default = "default_severe_underperformance_margin")]
    pub severe_underperformance_margin: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_trend_ttl_secs")]
    pub trend_ttl_secs: u64,
    #[serde(default = "default_cohort_ttl_secs")]
    pub cohort_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_input_points")]
    pub max_input_points: usize,
    #[serde(default = "default_max_series_len")]
    pub max_series_len: usize,
    #[serde(default = "default_max_periods")]
    pub max_periods: usize,
    /// Cohort analysis keeps only the most recent this-many periods.
    #[serde(default = "default_max_cohort_periods")]
    pub max_cohort_periods: usize,
}

// Default functions
fn default_min_points() -> usize {
    3
}
fn default_stable_slope_ratio() -> f64 {
    0.05
}
fn default_full_confidence_points() -> usize {
    8
}
fn default_seasonality_threshold() -> f64 {
    0.3
}
fn default_max_seasonal_lag() -> usize {
    12
}
fn default_window() -> usize {
    7
}
fn default_z_threshold() -> f64 {
    2.5
}
fn default_high_impact_z() -> f64 {
    4.0
}
fn default_stddev_floor() -> f64 {
    1e-9
}
fn default_underperformance_margin() -> f64 {
    0.15
}
fn default_trend_min_confidence() -> f64 {
    0.6
}
fn default_high_impact_trend_confidence() -> f64 {
    0.9
}
fn default_opportunity_min_confidence() -> f64 {
    0.5
}
fn default_severe_underperformance_margin() -> f64 {
    0.30
}
fn default_trend_ttl_secs() -> u64 {
    300
}
fn default_cohort_ttl_secs() -> u64 {
    86_400
}
fn default_max_entries() -> usize {
    1024
}
fn default_max_input_points() -> usize {
    1_000_000
}
fn default_max_series_len() -> usize {
    1_000
}
fn default_max_periods() -> usize {
    100_000
}
fn default_max_cohort_periods() -> usize {
    260
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_points: default_min_points(),
            stable_slope_ratio: default_stable_slope_ratio(),
            full_confidence_points: default_full_confidence_points(),
            seasonality_threshold: default_seasonality_threshold(),
            max_seasonal_lag: default_max_seasonal_lag(),
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            z_threshold: default_z_threshold(),
            high_impact_z: default_high_impact_z(),
            stddev_floor: default_stddev_floor(),
        }
    }
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            underperformance_margin: default_underperformance_margin(),
        }
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            trend_min_confidence: default_trend_min_confidence(),
            high_impact_trend_confidence: default_high_impact_trend_confidence(),
            opportunity_min_confidence: default_opportunity_min_confidence(),
            severe_underperformance_margin: default_severe_underperformance_margin(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            trend_ttl_secs: default_trend_ttl_secs(),
            cohort_ttl_secs: default_cohort_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_points: default_max_input_points(),
            max_series_len: default_max_series_len(),
            max_periods: default_max_periods(),
            max_cohort_periods: default_max_cohort_periods(),
        }
    }
}

impl CacheConfig {
    pub fn trend_ttl(&self) -> Duration {
        Duration::from_secs(self.trend_ttl_secs)
    }

    pub fn cohort_ttl(&self) -> Duration {
        Duration::from_secs(self.cohort_ttl_secs)
    }
}

impl AnalyticsConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_with_file(None)
    }

    /// Same as [`AnalyticsConfig::load`], layering the environment over a TOML file.
    pub fn load_with_file(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("SURVEY_INSIGHTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }

    /// Reject values the analytics cannot run with.
    pub fn validate(&self) -> InsightsResult<()> {
        let t = &self.trend;
        if t.min_points < 2 {
            return Err(invalid("trend.min_points must be at least 2"));
        }
        if t.full_confidence_points == 0 {
            return Err(invalid("trend.full_confidence_points must be positive"));
        }
        if !(t.stable_slope_ratio.is_finite() && t.stable_slope_ratio >= 0.0) {
            return Err(invalid("trend.stable_slope_ratio must be a non-negative number"));
        }
        check_fraction("trend.seasonality_threshold", t.seasonality_threshold)?;
        if t.max_seasonal_lag == 0 {
            return Err(invalid("trend.max_seasonal_lag must be positive"));
        }

        let a = &self.anomaly;
        if a.window == 0 {
            return Err(invalid("anomaly.window must be positive"));
        }
        if !(a.z_threshold.is_finite() && a.z_threshold > 0.0) {
            return Err(invalid("anomaly.z_threshold must be positive"));
        }
        if !(a.high_impact_z.is_finite() && a.high_impact_z >= a.z_threshold) {
            return Err(invalid("anomaly.high_impact_z must be >= anomaly.z_threshold"));
        }
        if !(a.stddev_floor.is_finite() && a.stddev_floor > 0.0) {
            return Err(invalid("anomaly.stddev_floor must be positive"));
        }

        check_fraction(
            "cohort.underperformance_margin",
            self.cohort.underperformance_margin,
        )?;

        let i = &self.insight;
        check_fraction("insight.trend_min_confidence", i.trend_min_confidence)?;
        check_fraction(
            "insight.high_impact_trend_confidence",
            i.high_impact_trend_confidence,
        )?;
        check_fraction(
            "insight.opportunity_min_confidence",
            i.opportunity_min_confidence,
        )?;
        check_fraction(
            "insight.severe_underperformance_margin",
            i.severe_underperformance_margin,
        )?;

        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries must be positive"));
        }

        let l = &self.limits;
        if l.max_input_points == 0
            || l.max_series_len == 0
            || l.max_periods == 0
            || l.max_cohort_periods == 0
        {
            return Err(invalid("limits must all be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> InsightsError {
    InsightsError::Config(msg.to_string())
}

fn check_fraction(name: &str, value: f64) -> InsightsResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(InsightsError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalyticsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.anomaly.window, 7);
        assert_eq!(config.anomaly.z_threshold, 2.5);
        assert_eq!(config.trend.seasonality_threshold, 0.3);
        assert_eq!(config.cache.trend_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.cohort_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = AnalyticsConfig::default();
        config.anomaly.window = 0;
        assert!(matches!(config.validate(), Err(InsightsError::Config(_))));
    }

    #[test]
    fn test_fraction_out_of_range_rejected() {
        let mut config = AnalyticsConfig::default();
        config.trend.seasonality_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("seasonality_threshold"));
    }

    #[test]
    fn test_high_impact_below_threshold_rejected() {
        let mut config = AnalyticsConfig::default();
        config.anomaly.high_impact_z = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AnalyticsConfig =
            serde_json::from_str(r#"{"anomaly": {"z_threshold": 3.0}}"#).unwrap();
        assert_eq!(config.anomaly.z_threshold, 3.0);
        assert_eq!(config.anomaly.window, 7);
        assert_eq!(config.cache.max_entries, 1024);
        assert_eq!(config.limits.max_cohort_periods, 260);
    }

    #[test]
    fn test_zero_cohort_period_cap_rejected() {
        let mut config = AnalyticsConfig::default();
        config.limits.max_cohort_periods = 0;
        assert!(matches!(config.validate(), Err(InsightsError::Config(_))));
    }
}
