//! Pattern selection policy
//!
//! The policy is a pure function of the user's completed-event count and the
//! history read at evaluation time:
//!
//! - fewer than `rotation.len() * phase_length` completed events: walk the
//!   fixed rotation, one entry per `phase_length` events, confidence 1.0
//! - otherwise: ask the similarity recommender, falling back to the default
//!   pattern with confidence 0 when history is short or the call fails

use crate::analysis::SimilarityRecommender;
use crate::config::PolicyConfig;
use crate::error::EngineError;
use crate::types::{
    FallbackReason, HistoricalEvent, MixingPattern, PatternSelection, SelectionSource,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Policy state derived from the completed-event count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PolicyState {
    FixedRotation { phase: usize },
    AiRecommendation,
}

/// Selects the mixing pattern for a pre-alarm pass
#[derive(Debug, Clone)]
pub struct PatternPolicy {
    rotation: Vec<MixingPattern>,
    phase_length: usize,
    min_history: usize,
    recommender_timeout: Duration,
}

impl Default for PatternPolicy {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl PatternPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            rotation: config.rotation.clone(),
            phase_length: config.phase_length.max(1),
            min_history: config.min_history,
            recommender_timeout: config.recommender_timeout(),
        }
    }

    /// State for a user with `completed` scored events
    pub fn state_for(&self, completed: usize) -> PolicyState {
        let phase = completed / self.phase_length;
        if phase < self.rotation.len() {
            PolicyState::FixedRotation { phase }
        } else {
            PolicyState::AiRecommendation
        }
    }

    /// Qualifying history needed before the recommender is consulted
    pub fn min_history(&self) -> usize {
        self.min_history
    }

    /// Rotation selection, or `None` once the rotation is exhausted
    pub fn rotation_selection(&self, completed: usize) -> Option<PatternSelection> {
        match self.state_for(completed) {
            PolicyState::FixedRotation { phase } => Some(PatternSelection {
                pattern: self.rotation[phase].clone(),
                confidence: 1.0,
                source: SelectionSource::FixedRotation { phase },
            }),
            PolicyState::AiRecommendation => None,
        }
    }

    /// Choose a pattern.
    ///
    /// `history` holds the user's prior events with both a pre-wake series and
    /// a comfort score. Never fails: every problem in the recommendation phase
    /// degrades to the default pattern.
    pub async fn select(
        &self,
        completed: usize,
        current: &[f64],
        history: &[HistoricalEvent],
        recommender: &dyn SimilarityRecommender,
    ) -> PatternSelection {
        if let Some(selection) = self.rotation_selection(completed) {
            info!(
                completed,
                pattern = %selection.pattern,
                "fixed rotation phase"
            );
            return selection;
        }

        if history.len() < self.min_history {
            let reason = EngineError::InsufficientHistory {
                found: history.len(),
                required: self.min_history,
            };
            info!(completed, %reason, "using default pattern");
            return PatternSelection::fallback(FallbackReason::InsufficientHistory);
        }

        match tokio::time::timeout(
            self.recommender_timeout,
            recommender.recommend(current, history),
        )
        .await
        {
            Ok(Ok(recommendation)) => {
                info!(
                    completed,
                    pattern = %recommendation.pattern,
                    confidence = recommendation.confidence,
                    history = history.len(),
                    "recommendation adopted"
                );
                PatternSelection {
                    pattern: recommendation.pattern,
                    confidence: recommendation.confidence,
                    source: SelectionSource::Recommended,
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "recommender failed, using default");
                PatternSelection::fallback(FallbackReason::RecommenderUnavailable)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.recommender_timeout.as_millis() as u64,
                    "recommender timed out, using default"
                );
                PatternSelection::fallback(FallbackReason::RecommenderUnavailable)
            }
        }
    }
}
