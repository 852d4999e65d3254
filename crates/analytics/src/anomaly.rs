//! Rolling z-score anomaly detection.

use crate::stats::{mean, stddev};
use survey_core::config::AnomalyConfig;
use survey_core::error::{InsightsError, InsightsResult};
use survey_core::types::{Anomaly, AnomalyDirection};

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Flag every value whose z-score against the preceding `window` values
    /// exceeds the threshold. `period_keys` labels each value; missing labels
    /// fall back to the index.
    pub fn detect(&self, values: &[f64], period_keys: &[String]) -> InsightsResult<Vec<Anomaly>> {
        let w = self.config.window;
        let mut anomalies = Vec::new();
        if values.len() <= w {
            return Ok(anomalies);
        }

        for i in w..values.len() {
            let baseline = &values[i - w..i];
            let m = mean(baseline);
            let sd = stddev(baseline).max(self.config.stddev_floor);
            let z = (values[i] - m) / sd;
            if !z.is_finite() {
                return Err(InsightsError::ComputationOverflow(format!(
                    "z-score at index {i} is not finite"
                )));
            }
            if z.abs() > self.config.z_threshold {
                anomalies.push(Anomaly {
                    index: i,
                    period_key: period_keys
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| i.to_string()),
                    value: values[i],
                    z_score: z,
                    direction: if z > 0.0 {
                        AnomalyDirection::Up
                    } else {
                        AnomalyDirection::Down
                    },
                });
            }
        }
        Ok(anomalies)
    }

    pub fn is_high_impact(&self, anomaly: &Anomaly) -> bool {
        anomaly.z_score.abs() > self.config.high_impact_z
    }
}
