//! Comfort scoring
//!
//! Two formulas are in use and intentionally kept apart:
//!
//! - **Processing** (`processing_score`): computed after the post-wake pass.
//!   Objective part is 50% slope, 25% stability, 25% intensity; the final score
//!   is 70% objective and 30% mood.
//! - **Evaluation** (`evaluation_score`): the manual evaluation weighting,
//!   40% slope, 30% stability, 30% mood, with no intensity term.
//!
//! Which one a mood submission uses is a configuration choice
//! (`EngineConfig::evaluation_formula`); product has not reconciled the two.

use crate::types::AlarmEvent;
use serde::{Deserialize, Serialize};

/// Slope (bpm/s) treated as the worst case
pub const SLOPE_WORST: f64 = 0.2;
/// Post-wake stddev (bpm) treated as the worst case
pub const STDDEV_WORST: f64 = 15.0;
/// Intensity treated as the worst case (a 50% overshoot)
pub const INTENSITY_WORST: f64 = 0.5;
/// Mood used when none has been submitted
pub const NEUTRAL_MOOD: u8 = 3;

/// Selects between the two comfort formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComfortFormula {
    Processing,
    Evaluation,
}

/// Comfort scorer combining awakening metrics with the mood rating
pub struct ComfortScorer;

impl ComfortScorer {
    /// Processing-path comfort score in `[0, 100]`, rounded to one decimal.
    ///
    /// Lower slope, stddev and intensity are better; higher mood is better.
    /// A missing mood counts as neutral (3).
    pub fn processing_score(slope: f64, stddev_after: f64, intensity: f64, mood: Option<u8>) -> f64 {
        let objective = 0.5 * goodness(slope, SLOPE_WORST)
            + 0.25 * goodness(stddev_after, STDDEV_WORST)
            + 0.25 * goodness(intensity, INTENSITY_WORST);

        round_to_tenth((0.7 * objective + 0.3 * mood_goodness(mood)) * 100.0)
    }

    /// Evaluation-path comfort score in `[0, 100]`, rounded to one decimal.
    ///
    /// Missing slope or stddev count as best case (0), matching the manual
    /// evaluation flow.
    pub fn evaluation_score(slope: Option<f64>, stddev_after: Option<f64>, mood: Option<u8>) -> f64 {
        let score = 0.4 * goodness(slope.unwrap_or(0.0), SLOPE_WORST)
            + 0.3 * goodness(stddev_after.unwrap_or(0.0), STDDEV_WORST)
            + 0.3 * mood_goodness(mood);

        round_to_tenth(score * 100.0)
    }

    /// Score an event from its stored metrics; `None` until both objective
    /// metrics and a mood rating exist.
    pub fn score_event(event: &AlarmEvent, formula: ComfortFormula) -> Option<f64> {
        let metrics = event.awakening_metrics()?;
        let mood = event.mood_rating?;

        match formula {
            ComfortFormula::Processing => Some(Self::processing_score(
                metrics.slope,
                metrics.stddev,
                event.intensity?,
                Some(mood),
            )),
            ComfortFormula::Evaluation => Some(Self::evaluation_score(
                Some(metrics.slope),
                Some(metrics.stddev),
                Some(mood),
            )),
        }
    }
}

/// `1 - clamp(value / worst, 0, 1)`
fn goodness(value: f64, worst: f64) -> f64 {
    1.0 - (value / worst).clamp(0.0, 1.0)
}

/// Mood 1..=5 mapped to `[0, 1]`
fn mood_goodness(mood: Option<u8>) -> f64 {
    let mood = mood.unwrap_or(NEUTRAL_MOOD);
    ((f64::from(mood) - 1.0) / 4.0).clamp(0.0, 1.0)
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
