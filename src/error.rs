//! Error types for the BioMixer engine

use thiserror::Error;

/// Failures reported by a telemetry source.
///
/// Only `AuthExpired` and `RateLimited` are retriable; the resilient fetcher
/// turns everything else into [`EngineError::TelemetryUnavailable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Access token expired")]
    AuthExpired,

    #[error("Rate limited by telemetry source")]
    RateLimited,

    #[error("Wearable not linked for user {0}")]
    NotLinked(String),

    #[error("Credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Telemetry transport error: {0}")]
    Transport(String),

    #[error("Failed to parse telemetry payload: {0}")]
    Parse(String),
}

/// Errors raised by an event or credential store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the engine to its callers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("Insufficient history: {found} qualifying events, {required} required")]
    InsufficientHistory { found: usize, required: usize },

    #[error("Recommender unavailable: {0}")]
    RecommenderUnavailable(String),

    #[error("No post-wake heart rate data for event {0}")]
    NoPostWakeData(String),

    #[error("Awakening metrics unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("Alarm event not found: {0}")]
    EventNotFound(String),

    #[error("Invalid rating: {0}")]
    InvalidRating(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<FetchError> for EngineError {
    fn from(err: FetchError) -> Self {
        EngineError::TelemetryUnavailable(err.to_string())
    }
}
