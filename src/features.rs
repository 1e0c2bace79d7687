//! Signal summarization
//!
//! This module derives scalar features from a resampled heart-rate series:
//! - Mean and population standard deviation (pre-wake window)
//! - Peak, mean and intensity (post-wake window)

use crate::types::{AwakeningShape, SeriesSummary};

/// Feature summarizer for resampled series
pub struct Summarizer;

impl Summarizer {
    /// Mean and population standard deviation (divides by N).
    ///
    /// An empty series yields `{0, 0}`; callers must read that as "no data",
    /// not as a flat reading.
    pub fn summarize(series: &[f64]) -> SeriesSummary {
        if series.is_empty() {
            return SeriesSummary::default();
        }

        let mean = compute_mean(series);
        let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64;

        SeriesSummary {
            mean,
            stddev: variance.sqrt(),
        }
    }

    /// Peak, mean and intensity of a post-wake series; `None` when empty
    pub fn awakening_shape(series: &[f64]) -> Option<AwakeningShape> {
        let peak = compute_peak(series)?;
        let mean = compute_mean(series);

        Some(AwakeningShape {
            peak,
            mean,
            intensity: compute_intensity(peak, mean),
        })
    }
}

pub(crate) fn compute_mean(series: &[f64]) -> f64 {
    series.iter().sum::<f64>() / series.len() as f64
}

fn compute_peak(series: &[f64]) -> Option<f64> {
    series.iter().copied().reduce(f64::max)
}

/// Relative overshoot of the peak over the mean: `(peak - mean) / mean`.
/// Undefined for a zero mean.
fn compute_intensity(peak: f64, mean: f64) -> Option<f64> {
    if mean == 0.0 {
        return None;
    }
    Some((peak - mean) / mean)
}
