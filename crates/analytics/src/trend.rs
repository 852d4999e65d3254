//! Trend detection: least-squares slope, goodness of fit, and
//! autocorrelation-based seasonality over a bucketed series.

use crate::stats::{autocorrelation, is_constant, mean};
use survey_core::config::TrendConfig;
use survey_core::error::{InsightsError, InsightsResult};
use survey_core::types::{TrendDirection, TrendResult};
use tracing::debug;

pub struct TrendCalculator {
    config: TrendConfig,
}

impl TrendCalculator {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// Fit a trend to `values`, indexed by period.
    ///
    /// Series shorter than `min_points` yield [`TrendResult::insufficient`].
    /// Only a non-finite intermediate is an error.
    pub fn calculate(&self, values: &[f64]) -> InsightsResult<TrendResult> {
        let n = values.len();
        if let Err(e) = self.check_sample_size(n) {
            debug!(error = %e, "Trend skipped");
            return Ok(TrendResult::insufficient(n));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(InsightsError::ComputationOverflow(
                "series contains non-finite values".to_string(),
            ));
        }

        let (slope, intercept, r) = regression(values)?;
        let r_squared = r * r;
        let y_mean = mean(values);

        let direction = if slope == 0.0 || slope.abs() < self.config.stable_slope_ratio * y_mean.abs()
        {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let sample_factor = (n as f64 / self.config.full_confidence_points as f64).min(1.0);
        let confidence = r_squared.clamp(0.0, 1.0) * sample_factor;

        let (seasonal_period, seasonality_score) = self.seasonality(values);

        Ok(TrendResult {
            slope,
            intercept,
            r_squared,
            direction,
            confidence,
            seasonality_score,
            seasonal_period,
            sample_size: n,
            sufficient_data: true,
        })
    }

    fn check_sample_size(&self, n: usize) -> InsightsResult<()> {
        if n < self.config.min_points {
            return Err(InsightsError::InsufficientData {
                required: self.config.min_points,
                actual: n,
            });
        }
        Ok(())
    }

    /// Lag with the strongest autocorrelation above the significance threshold.
    fn seasonality(&self, values: &[f64]) -> (Option<usize>, f64) {
        let max_lag = (values.len() / 2).min(self.config.max_seasonal_lag);
        let mut best: Option<(usize, f64)> = None;
        for lag in 1..=max_lag {
            let acf = autocorrelation(values, lag);
            if acf <= self.config.seasonality_threshold {
                continue;
            }
            if best.map_or(true, |(_, score)| acf > score) {
                best = Some((lag, acf));
            }
        }
        match best {
            Some((lag, score)) => (Some(lag), score),
            None => (None, 0.0),
        }
    }
}

/// OLS of value against index: `(slope, intercept, r)`. Zero variance gives `r = 0`.
fn regression(values: &[f64]) -> InsightsResult<(f64, f64, f64)> {
    let n = values.len() as f64;
    let y_mean = mean(values);
    if is_constant(values) {
        return Ok((0.0, values.first().copied().unwrap_or(0.0), 0.0));
    }

    let x_mean = (n - 1.0) / 2.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if !(sxx.is_finite() && sxy.is_finite() && syy.is_finite()) {
        return Err(InsightsError::ComputationOverflow(
            "variance exceeded floating point range".to_string(),
        ));
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;
    let denom = (sxx * syy).sqrt();
    let r = if denom > 0.0 && denom.is_finite() {
        (sxy / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    if !(slope.is_finite() && intercept.is_finite()) {
        return Err(InsightsError::ComputationOverflow(
            "regression coefficients are not finite".to_string(),
        ));
    }
    Ok((slope, intercept, r))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> TrendCalculator {
        TrendCalculator::new(TrendConfig::default())
    }

    #[test]
    fn test_constant_series_is_stable() {
        let result = calculator().calculate(&[5.0; 10]).unwrap();
        assert_eq!(result.direction, TrendDirection::Stable);
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.r_squared, 0.0);
        assert!(result.confidence.abs() < 1e-12);
        assert!(result.sufficient_data);
    }

    #[test]
    fn test_linear_series_is_increasing() {
        let values: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        let result = calculator().calculate(&values).unwrap();
        assert!(result.slope > 0.0);
        assert!((result.slope - 1.0).abs() < 1e-12);
        assert!((result.intercept - 1.0).abs() < 1e-12);
        assert_eq!(result.direction, TrendDirection::Increasing);
        assert!((result.r_squared - 1.0).abs() < 1e-9);
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_decreasing_series() {
        let values = [40.0, 35.0, 31.0, 24.0, 20.0, 14.0];
        let result = calculator().calculate(&values).unwrap();
        assert_eq!(result.direction, TrendDirection::Decreasing);
        // Six points sit below the full-confidence sample size.
        assert!(result.confidence <= 6.0 / 8.0 + 1e-12);
    }

    #[test]
    fn test_short_series_has_zero_confidence() {
        let result = calculator().calculate(&[1.0, 10.0]).unwrap();
        assert_eq!(result.direction, TrendDirection::Stable);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.sufficient_data);
    }

    #[test]
    fn test_small_slope_relative_to_mean_is_stable() {
        let values = [100.0, 100.5, 101.0, 101.5, 102.0];
        let result = calculator().calculate(&values).unwrap();
        assert!(result.slope > 0.0);
        assert_eq!(result.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_seasonal_period_detected() {
        let pattern = [10.0, 20.0, 30.0, 20.0];
        let values: Vec<f64> = pattern.iter().cycle().take(24).copied().collect();
        let result = calculator().calculate(&values).unwrap();
        assert_eq!(result.seasonal_period, Some(4));
        assert!(result.seasonality_score > 0.3);
    }

    #[test]
    fn test_no_seasonality_when_below_threshold() {
        let mut config = TrendConfig::default();
        config.seasonality_threshold = 1.0;
        let values: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        let result = TrendCalculator::new(config).calculate(&values).unwrap();
        assert_eq!(result.seasonal_period, None);
        assert_eq!(result.seasonality_score, 0.0);
    }

    #[test]
    fn test_calculation_is_bit_identical() {
        let values = [3.2, 7.9, 1.4, 8.8, 5.5, 6.1, 9.7, 2.3, 4.4];
        let a = calculator().calculate(&values).unwrap();
        let b = calculator().calculate(&values).unwrap();
        assert_eq!(a.slope.to_bits(), b.slope.to_bits());
        assert_eq!(a.intercept.to_bits(), b.intercept.to_bits());
        assert_eq!(a.r_squared.to_bits(), b.r_squared.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        assert_eq!(a, b);
    }

    #[test]
    fn test_overflow_is_reported() {
        let values = [1e300, -1e300, 1e300, -1e300, 1e300];
        let err = calculator().calculate(&values).unwrap_err();
        assert!(matches!(err, InsightsError::ComputationOverflow(_)));

        let err = calculator()
            .calculate(&[1.0, f64::NAN, 3.0])
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
