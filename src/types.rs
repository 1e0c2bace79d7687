//! Core types for the BioMixer engine
//!
//! This module defines the data that flows through each stage of alarm
//! processing: raw telemetry samples, resampled series, alarm events, and the
//! reports returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A single heart-rate reading at native (irregular) resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    /// Offset in seconds from an arbitrary origin (non-negative, need not be integral)
    pub offset_seconds: f64,
    /// Reading value (bpm)
    pub value: f64,
}

impl TimeSample {
    pub fn new(offset_seconds: f64, value: f64) -> Self {
        Self {
            offset_seconds,
            value,
        }
    }
}

/// Uniformly spaced series produced by the resampler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledSeries {
    /// Grid spacing in seconds
    pub step_seconds: f64,
    /// One value per grid point, starting at offset 0
    pub values: Vec<f64>,
}

impl ResampledSeries {
    pub fn empty(step_seconds: f64) -> Self {
        Self {
            step_seconds,
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Label of an audio mixing strategy.
///
/// The fixed rotation uses single letters; the recommender may emit fused
/// labels such as `"A+B"`, which are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MixingPattern(Cow<'static, str>);

impl MixingPattern {
    pub const A: MixingPattern = MixingPattern(Cow::Borrowed("A"));
    pub const B: MixingPattern = MixingPattern(Cow::Borrowed("B"));
    pub const C: MixingPattern = MixingPattern(Cow::Borrowed("C"));
    pub const D: MixingPattern = MixingPattern(Cow::Borrowed("D"));
    pub const E: MixingPattern = MixingPattern(Cow::Borrowed("E"));
    /// Placeholder stored on an event before selection completes
    pub const PENDING: MixingPattern = MixingPattern(Cow::Borrowed("AUTO"));

    /// Pattern used whenever selection has to degrade
    pub const DEFAULT: MixingPattern = Self::A;

    pub fn new(label: impl Into<String>) -> Self {
        MixingPattern(Cow::Owned(label.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for labels combining several base patterns, e.g. `"A+B"`
    pub fn is_fused(&self) -> bool {
        self.0.contains('+')
    }
}

impl fmt::Display for MixingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OAuth credential pair for a user's wearable account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WearableCredentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Vendor-side user id; `None` means the API's "current user" (`-`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wearable_user_id: Option<String>,
}

/// Mean and population standard deviation of a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub mean: f64,
    pub stddev: f64,
}

/// Locally derived shape of the post-wake response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AwakeningShape {
    /// Highest value in the series
    pub peak: f64,
    /// Mean of the series
    pub mean: f64,
    /// `(peak - mean) / mean`; `None` when the mean is zero
    pub intensity: Option<f64>,
}

/// Slope/variability pair produced by the metrics calculator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AwakeningMetrics {
    /// Rise rate across the post-wake window (bpm per second)
    pub slope: f64,
    /// Post-wake variability (bpm)
    pub stddev: f64,
}

/// A past event offered to the similarity recommender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub event_id: Uuid,
    /// Pre-wake series of that event
    #[serde(rename = "hr_pattern_before")]
    pub series: Vec<f64>,
    #[serde(rename = "mixing_pattern")]
    pub pattern: MixingPattern,
    pub comfort_score: f64,
}

/// Aggregate score the recommender attributes to one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternScore {
    pub average_score: f64,
    pub event_count: u32,
}

/// Recommender output, adopted verbatim by the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pattern: MixingPattern,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub pattern_scores: HashMap<String, PatternScore>,
    #[serde(default)]
    pub similar_events_count: u32,
}

/// Why the policy fell back to the default pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoTelemetry,
    InsufficientHistory,
    RecommenderUnavailable,
    /// Completed count or history could not be read from the event store
    HistoryUnavailable,
}

/// Which branch of the policy produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionSource {
    FixedRotation { phase: usize },
    Recommended,
    Fallback { reason: FallbackReason },
}

/// Pattern chosen for an alarm firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSelection {
    pub pattern: MixingPattern,
    pub confidence: f64,
    pub source: SelectionSource,
}

impl PatternSelection {
    /// Default pattern with zero confidence
    pub fn fallback(reason: FallbackReason) -> Self {
        Self {
            pattern: MixingPattern::DEFAULT,
            confidence: 0.0,
            source: SelectionSource::Fallback { reason },
        }
    }
}

/// Fields computed outside this engine and stored as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassThroughMetrics {
    pub hr_recovery_time: Option<f64>,
    pub hrv_avg: Option<f64>,
    pub hrv_hf: Option<f64>,
    pub hrv_lf_hf_ratio: Option<f64>,
    pub sleep_stage_before: Option<String>,
}

/// One alarm firing and everything measured around it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Originating alarm configuration
    pub alarm_id: String,
    /// Scheduled ring time (UTC)
    pub alarm_time: DateTime<Utc>,
    /// Chosen mixing pattern (`AUTO` until selection completes)
    pub mixing_pattern: MixingPattern,
    /// Confidence attached to the chosen pattern
    pub pattern_confidence: Option<f64>,
    /// Pre-wake series (5 s grid)
    pub hr_pattern_before: Option<ResampledSeries>,
    pub hr_avg_before: Option<f64>,
    pub hr_std_before: Option<f64>,
    /// Post-wake series (1 s grid)
    pub hr_pattern_after: Option<ResampledSeries>,
    pub hr_peak: Option<f64>,
    pub awakening_hr_slope: Option<f64>,
    pub awakening_hr_stddev: Option<f64>,
    pub intensity: Option<f64>,
    #[serde(default)]
    pub pass_through: PassThroughMetrics,
    /// Subjective mood rating (1-5)
    pub mood_rating: Option<u8>,
    /// Subjective sound rating (1-5)
    pub sound_rating: Option<u8>,
    /// Comfort score (0-100)
    pub comfort_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl AlarmEvent {
    /// Placeholder created at pre-alarm time
    pub fn new(user_id: &str, alarm_id: &str, alarm_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            alarm_id: alarm_id.to_string(),
            alarm_time,
            mixing_pattern: MixingPattern::PENDING,
            pattern_confidence: None,
            hr_pattern_before: None,
            hr_avg_before: None,
            hr_std_before: None,
            hr_pattern_after: None,
            hr_peak: None,
            awakening_hr_slope: None,
            awakening_hr_stddev: None,
            intensity: None,
            pass_through: PassThroughMetrics::default(),
            mood_rating: None,
            sound_rating: None,
            comfort_score: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_pre_wake_series(&self) -> bool {
        self.hr_pattern_before
            .as_ref()
            .is_some_and(|s| !s.is_empty())
    }

    /// An event counts towards progression once it has a comfort score
    pub fn is_completed(&self) -> bool {
        self.comfort_score.is_some()
    }

    /// Stored slope/stddev pair, if both are present
    pub fn awakening_metrics(&self) -> Option<AwakeningMetrics> {
        match (self.awakening_hr_slope, self.awakening_hr_stddev) {
            (Some(slope), Some(stddev)) => Some(AwakeningMetrics { slope, stddev }),
            _ => None,
        }
    }

    /// View of this event as recommender history
    pub fn as_historical(&self) -> Option<HistoricalEvent> {
        let series = self.hr_pattern_before.as_ref().filter(|s| !s.is_empty())?;
        let comfort_score = self.comfort_score?;
        Some(HistoricalEvent {
            event_id: self.id,
            series: series.values.clone(),
            pattern: self.mixing_pattern.clone(),
            comfort_score,
        })
    }
}

/// Heart-rate summary included in reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HrReport {
    pub data_points: usize,
    pub avg: f64,
    pub std: f64,
}

/// Result of the pre-alarm pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreAlarmReport {
    pub event_id: Uuid,
    pub recommended_pattern: MixingPattern,
    pub confidence: f64,
    pub source: SelectionSource,
    pub hr: HrReport,
}

/// Result of the post-wake pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostWakeReport {
    pub event_id: Uuid,
    pub data_points: usize,
    pub hr_peak: f64,
    pub intensity: Option<f64>,
    pub awakening_hr_slope: Option<f64>,
    pub awakening_hr_stddev: Option<f64>,
    pub comfort_score: Option<f64>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Result of a mood/sound submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub event_id: Uuid,
    pub mood_rating: u8,
    pub sound_rating: Option<u8>,
    pub comfort_score: Option<f64>,
}
