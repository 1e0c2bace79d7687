//! Analysis collaborators
//!
//! Pattern recommendation and awakening metrics are computed outside the core
//! pipeline. This module defines both seams and provides:
//!
//! - `HttpRecommender` / `HttpMetricsCalculator`: clients for the analysis
//!   service (`/recommend-mixing`, `/calculate-awakening-metrics`)
//! - `LinearTrendCalculator`: in-process slope/variability over the post-wake
//!   series, for deployments without the analysis service

use crate::config::{Endpoints, FetchConfig};
use crate::error::EngineError;
use crate::features::compute_mean;
use crate::types::{AwakeningMetrics, HistoricalEvent, MixingPattern, PatternScore, Recommendation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Points of the post-wake series considered (first four minutes at 1 s)
pub const METRICS_MAX_POINTS: usize = 240;
/// Minimum points required for awakening metrics
pub const METRICS_MIN_POINTS: usize = 60;

/// Picks a mixing pattern from the user's most similar past events
#[async_trait]
pub trait SimilarityRecommender: Send + Sync {
    async fn recommend(
        &self,
        current: &[f64],
        history: &[HistoricalEvent],
    ) -> Result<Recommendation, EngineError>;
}

/// Computes slope and variability of the post-wake series
#[async_trait]
pub trait AwakeningMetricsCalculator: Send + Sync {
    async fn calculate(&self, series: &[f64]) -> Result<AwakeningMetrics, EngineError>;
}

/// Least-squares slope and population stddev over the leading window
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTrendCalculator;

impl LinearTrendCalculator {
    /// Metrics over the first [`METRICS_MAX_POINTS`] values.
    ///
    /// Slope is in units per sample (bpm/s on a 1 s grid).
    pub fn compute(series: &[f64]) -> Result<AwakeningMetrics, EngineError> {
        let window = &series[..series.len().min(METRICS_MAX_POINTS)];
        if window.len() < METRICS_MIN_POINTS {
            return Err(EngineError::MetricsUnavailable(format!(
                "at least {METRICS_MIN_POINTS} points needed, got {}",
                window.len()
            )));
        }

        let n = window.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = compute_mean(window);

        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (i, &y) in window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            let dy = y - mean_y;
            sxy += dx * dy;
            sxx += dx * dx;
            syy += dy * dy;
        }

        Ok(AwakeningMetrics {
            slope: sxy / sxx,
            stddev: (syy / n).sqrt(),
        })
    }
}

#[async_trait]
impl AwakeningMetricsCalculator for LinearTrendCalculator {
    async fn calculate(&self, series: &[f64]) -> Result<AwakeningMetrics, EngineError> {
        Self::compute(series)
    }
}

fn build_http(fetch: &FetchConfig) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(fetch.request_timeout())
        .build()
        .map_err(|e| EngineError::Config(format!("HTTP client: {e}")))
}

/// Client for the analysis service's recommendation endpoint
pub struct HttpRecommender {
    http: reqwest::Client,
    url: String,
}

impl HttpRecommender {
    pub fn new(endpoints: &Endpoints, fetch: &FetchConfig) -> Result<Self, EngineError> {
        Ok(Self {
            http: build_http(fetch)?,
            url: format!(
                "{}/recommend-mixing",
                endpoints.analysis_base_url.trim_end_matches('/')
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct RecommendRequest<'a> {
    current_pattern: &'a [f64],
    past_events: &'a [HistoricalEvent],
}

#[derive(Debug, Deserialize)]
struct RecommendResponse {
    recommended_mixing: String,
    confidence: f64,
    #[serde(default)]
    mixing_scores: HashMap<String, PatternScore>,
    #[serde(default)]
    similar_events_count: u32,
}

#[async_trait]
impl SimilarityRecommender for HttpRecommender {
    async fn recommend(
        &self,
        current: &[f64],
        history: &[HistoricalEvent],
    ) -> Result<Recommendation, EngineError> {
        debug!(url = %self.url, history = history.len(), "requesting recommendation");
        let unavailable = |e: reqwest::Error| EngineError::RecommenderUnavailable(e.to_string());

        let response = self
            .http
            .post(&self.url)
            .json(&RecommendRequest {
                current_pattern: current,
                past_events: history,
            })
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(EngineError::RecommenderUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: RecommendResponse = response.json().await.map_err(unavailable)?;
        if !(0.0..=1.0).contains(&body.confidence) {
            return Err(EngineError::RecommenderUnavailable(format!(
                "confidence out of range: {}",
                body.confidence
            )));
        }

        Ok(Recommendation {
            pattern: MixingPattern::new(body.recommended_mixing),
            confidence: body.confidence,
            pattern_scores: body.mixing_scores,
            similar_events_count: body.similar_events_count,
        })
    }
}

/// Client for the analysis service's awakening-metrics endpoint
pub struct HttpMetricsCalculator {
    http: reqwest::Client,
    url: String,
}

impl HttpMetricsCalculator {
    pub fn new(endpoints: &Endpoints, fetch: &FetchConfig) -> Result<Self, EngineError> {
        Ok(Self {
            http: build_http(fetch)?,
            url: format!(
                "{}/calculate-awakening-metrics",
                endpoints.analysis_base_url.trim_end_matches('/')
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct MetricsRequest<'a> {
    hr_values: &'a [f64],
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    awakening_hr_slope: f64,
    awakening_hr_stddev: f64,
}

#[async_trait]
impl AwakeningMetricsCalculator for HttpMetricsCalculator {
    async fn calculate(&self, series: &[f64]) -> Result<AwakeningMetrics, EngineError> {
        debug!(url = %self.url, points = series.len(), "requesting awakening metrics");
        let unavailable = |e: reqwest::Error| EngineError::MetricsUnavailable(e.to_string());

        let response = self
            .http
            .post(&self.url)
            .json(&MetricsRequest { hr_values: series })
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(EngineError::MetricsUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: MetricsResponse = response.json().await.map_err(unavailable)?;
        Ok(AwakeningMetrics {
            slope: body.awakening_hr_slope,
            stddev: body.awakening_hr_stddev,
        })
    }
}
