//! Iterative outlier-trimmed mean

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

use crate::core::Sample;

/// No good-quality samples were left to average.
///
/// Distinct from a mean of zero: callers skip the calculation instead of
/// writing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no good-quality samples remained after filtering")]
pub struct NoData;

/// Result of a converged trimming run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimmedEstimate {
    pub mean: f64,
    /// Population standard deviation of the retained set
    pub std_dev: f64,
    pub retained: usize,
    pub passes: usize,
}

/// Repeatedly drops samples further than `k_sigma` standard deviations from
/// the mean until a pass removes nothing.
#[derive(Debug, Clone, Copy)]
pub struct TrimmedMeanEstimator {
    k_sigma: f64,
}

impl TrimmedMeanEstimator {
    pub fn new(k_sigma: f64) -> Self {
        Self { k_sigma }
    }

    pub fn k_sigma(&self) -> f64 {
        self.k_sigma
    }

    pub fn estimate(&self, samples: &[Sample]) -> Result<TrimmedEstimate, NoData> {
        let mut values: Vec<f64> = samples
            .iter()
            .filter(|s| s.is_good())
            .map(|s| s.value)
            .collect();

        let mut passes = 0;
        loop {
            if values.is_empty() {
                return Err(NoData);
            }
            passes += 1;

            let mean = values.iter().mean();
            let std_dev = values.iter().population_std_dev();
            let cutoff = self.k_sigma * std_dev;

            let before = values.len();
            values.retain(|v| (v - mean).abs() <= cutoff);

            if values.len() == before {
                return Ok(TrimmedEstimate {
                    mean,
                    std_dev,
                    retained: before,
                    passes,
                });
            }
        }
    }
}

/// Trimmed mean of `samples` with a `k_sigma` cutoff
pub fn trimmed_mean(samples: &[Sample], k_sigma: f64) -> Result<f64, NoData> {
    TrimmedMeanEstimator::new(k_sigma)
        .estimate(samples)
        .map(|e| e.mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn series(values: &[f64]) -> Vec<Sample> {
        let start = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(v, start + Duration::seconds(i as i64)))
            .collect()
    }

    #[test]
    fn test_homogeneous_single_pass() {
        let est = TrimmedMeanEstimator::new(1.75)
            .estimate(&series(&[273.0; 100]))
            .unwrap();

        assert_eq!(est.mean, 273.0);
        assert_eq!(est.passes, 1);
        assert_eq!(est.retained, 100);
        assert_eq!(est.std_dev, 0.0);
    }

    #[test]
    fn test_all_bad_is_no_data() {
        let now = Utc::now();
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample::bad(now + Duration::seconds(i)))
            .collect();

        assert_eq!(trimmed_mean(&samples, 1.75), Err(NoData));
        assert_eq!(trimmed_mean(&[], 1.75), Err(NoData));
    }

    #[test]
    fn test_bad_samples_ignored() {
        let mut samples = series(&[10.0, 10.0, 10.0]);
        let mut spike = Sample::bad(Utc::now());
        spike.value = 1.0e9;
        samples.push(spike);

        assert_eq!(trimmed_mean(&samples, 1.75).unwrap(), 10.0);
    }

    #[test]
    fn test_outlier_removed() {
        let mut values = vec![100.0; 20];
        values.push(1000.0);

        let est = TrimmedMeanEstimator::new(1.75)
            .estimate(&series(&values))
            .unwrap();

        assert_eq!(est.mean, 100.0);
        assert_eq!(est.retained, 20);
        assert_eq!(est.passes, 2);
    }

    #[test]
    fn test_retained_within_cutoff_of_final_mean() {
        let values = [
            9.8, 10.1, 10.0, 9.9, 10.3, 14.0, 9.7, 10.2, 2.0, 10.0, 10.05, 9.95, 11.0,
        ];
        let k = 1.5;
        let est = TrimmedMeanEstimator::new(k).estimate(&series(&values)).unwrap();

        let retained: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| (v - est.mean).abs() <= k * est.std_dev)
            .collect();
        assert_eq!(retained.len(), est.retained);
        assert!(est.passes <= values.len());
        assert!((est.mean - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_single_sample() {
        assert_eq!(trimmed_mean(&series(&[42.5]), 1.75).unwrap(), 42.5);
    }
}
