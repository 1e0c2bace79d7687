//! Engine configuration
//!
//! Every field has a default matching the production behaviour, so an empty
//! JSON object (`{}`) is a valid configuration.

use crate::comfort::ComfortFormula;
use crate::error::EngineError;
use crate::resample::MAX_GRID_POINTS;
use crate::types::MixingPattern;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the OAuth client id
pub const ENV_CLIENT_ID: &str = "FITBIT_CLIENT_ID";
/// Environment variable overriding the OAuth client secret
pub const ENV_CLIENT_SECRET: &str = "FITBIT_CLIENT_SECRET";
/// Environment variable overriding the analysis service URL
pub const ENV_ANALYSIS_URL: &str = "BIOMIXER_ANALYSIS_URL";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pre_alarm: PreAlarmWindow,
    pub post_wake: PostWakeWindow,
    pub policy: PolicyConfig,
    pub fetch: FetchConfig,
    /// Upper bound on a metrics calculator call (ms)
    pub metrics_timeout_ms: u64,
    /// Formula applied when a mood submission recomputes the comfort score
    pub evaluation_formula: ComfortFormula,
    pub endpoints: Endpoints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pre_alarm: PreAlarmWindow::default(),
            post_wake: PostWakeWindow::default(),
            policy: PolicyConfig::default(),
            fetch: FetchConfig::default(),
            metrics_timeout_ms: 5_000,
            evaluation_formula: ComfortFormula::Processing,
            endpoints: Endpoints::default(),
        }
    }
}

/// Telemetry window read before the alarm rings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreAlarmWindow {
    /// Window start, minutes before alarm time
    pub start_minutes_before: i64,
    /// Window end, minutes before alarm time
    pub end_minutes_before: i64,
    /// Resampling step (seconds)
    pub step_seconds: f64,
}

impl Default for PreAlarmWindow {
    fn default() -> Self {
        Self {
            start_minutes_before: 30,
            end_minutes_before: 15,
            step_seconds: 5.0,
        }
    }
}

/// Telemetry window read after the alarm rings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostWakeWindow {
    /// Window length after alarm time (minutes)
    pub duration_minutes: i64,
    /// Resampling step (seconds)
    pub step_seconds: f64,
}

impl Default for PostWakeWindow {
    fn default() -> Self {
        Self {
            duration_minutes: 3,
            step_seconds: 1.0,
        }
    }
}

/// Pattern selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Fixed rotation walked during the first `rotation.len() * phase_length` events
    pub rotation: Vec<MixingPattern>,
    /// Completed events spent on each rotation entry
    pub phase_length: usize,
    /// Qualifying past events needed before the recommender is consulted
    pub min_history: usize,
    /// Upper bound on a recommender call (ms)
    pub recommender_timeout_ms: u64,
    /// History size for on-demand recommendations
    pub manual_history_limit: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rotation: vec![
                MixingPattern::A,
                MixingPattern::B,
                MixingPattern::C,
                MixingPattern::D,
                MixingPattern::E,
            ],
            phase_length: 7,
            min_history: 3,
            recommender_timeout_ms: 5_000,
            manual_history_limit: 50,
        }
    }
}

impl PolicyConfig {
    pub fn recommender_timeout(&self) -> Duration {
        Duration::from_millis(self.recommender_timeout_ms)
    }

    /// Completed-event count at which the recommendation phase starts
    pub fn rotation_events(&self) -> usize {
        self.rotation.len() * self.phase_length
    }
}

/// Telemetry fetch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Wait before the single retry after a rate-limit response (ms)
    pub rate_limit_backoff_ms: u64,
    /// Offset of the wearable's local clock from UTC (minutes)
    pub utc_offset_minutes: i32,
    /// Upper bound on a single HTTP request (ms)
    pub request_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            rate_limit_backoff_ms: 1_000,
            utc_offset_minutes: 0,
            request_timeout_ms: 10_000,
        }
    }
}

impl FetchConfig {
    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// External service locations and OAuth client identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub telemetry_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub analysis_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            telemetry_base_url: "https://api.fitbit.com".to_string(),
            token_url: "https://api.fitbit.com/oauth2/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            analysis_base_url: "http://localhost:8000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Override secrets and service URLs from the process environment
    pub fn apply_env(mut self) -> Self {
        if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
            self.endpoints.client_id = id;
        }
        if let Ok(secret) = std::env::var(ENV_CLIENT_SECRET) {
            self.endpoints.client_secret = secret;
        }
        if let Ok(url) = std::env::var(ENV_ANALYSIS_URL) {
            self.endpoints.analysis_base_url = url;
        }
        self
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_millis(self.metrics_timeout_ms)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = |step: f64| step > 0.0 && step.is_finite();
        if !positive(self.pre_alarm.step_seconds) || !positive(self.post_wake.step_seconds) {
            return Err(EngineError::Config(
                "resampling steps must be positive".to_string(),
            ));
        }
        if self.pre_alarm.start_minutes_before <= self.pre_alarm.end_minutes_before {
            return Err(EngineError::Config(
                "pre-alarm window must start before it ends".to_string(),
            ));
        }
        if self.post_wake.duration_minutes <= 0 {
            return Err(EngineError::Config(
                "post-wake window must be positive".to_string(),
            ));
        }
        let pre_secs = (self.pre_alarm.start_minutes_before - self.pre_alarm.end_minutes_before)
            as f64
            * 60.0;
        let post_secs = self.post_wake.duration_minutes as f64 * 60.0;
        if pre_secs / self.pre_alarm.step_seconds >= MAX_GRID_POINTS as f64
            || post_secs / self.post_wake.step_seconds >= MAX_GRID_POINTS as f64
        {
            return Err(EngineError::Config(format!(
                "resampling step too small: a window would exceed {MAX_GRID_POINTS} points"
            )));
        }
        if self.policy.rotation.is_empty() || self.policy.phase_length == 0 {
            return Err(EngineError::Config(
                "policy rotation and phase length must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
