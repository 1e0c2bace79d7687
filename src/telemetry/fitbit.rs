//! Fitbit telemetry adapter
//!
//! Fetches 1-second intraday heart rate from the Fitbit Web API and maps the
//! `activities-heart-intraday` dataset to time samples.

use crate::config::{Endpoints, FetchConfig};
use crate::error::{EngineError, FetchError};
use crate::types::{TimeSample, WearableCredentials};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, Timelike, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CredentialRefresher, TelemetrySource};

/// Fitbit intraday heart-rate client
pub struct FitbitClient {
    http: reqwest::Client,
    base_url: String,
    utc_offset: FixedOffset,
}

impl FitbitClient {
    pub fn new(endpoints: &Endpoints, fetch: &FetchConfig) -> Result<Self, EngineError> {
        let utc_offset = FixedOffset::east_opt(fetch.utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::Config(format!(
                "utc_offset_minutes out of range: {}",
                fetch.utc_offset_minutes
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(fetch.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: endpoints.telemetry_base_url.trim_end_matches('/').to_string(),
            utc_offset,
        })
    }

    /// Detail URL for the wearable-local window `[start, end]`.
    ///
    /// The API only serves one calendar day per request, so a window running
    /// past midnight is cut at 23:59:59 of the start date.
    fn intraday_url(&self, user: &str, start: NaiveDateTime, end: NaiveDateTime) -> String {
        let end_time = if end.date() != start.date() {
            warn!(
                start = %start,
                end = %end,
                "telemetry window crosses midnight, truncating to start date"
            );
            "23:59:59".to_string()
        } else {
            end.format("%H:%M:%S").to_string()
        };

        format!(
            "{}/1/user/{}/activities/heart/date/{}/1d/1sec/time/{}/{}.json",
            self.base_url,
            user,
            start.format("%Y-%m-%d"),
            start.format("%H:%M:%S"),
            end_time
        )
    }

    fn to_local(&self, time: DateTime<Utc>) -> NaiveDateTime {
        time.with_timezone(&self.utc_offset).naive_local()
    }
}

#[async_trait]
impl TelemetrySource for FitbitClient {
    async fn get_intraday_series(
        &self,
        credentials: &WearableCredentials,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSample>, FetchError> {
        let user = credentials.wearable_user_id.as_deref().unwrap_or("-");
        let url = self.intraday_url(user, self.to_local(start), self.to_local(end));
        debug!(%url, "fetching intraday heart rate");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(FetchError::AuthExpired),
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            status if !status.is_success() => {
                return Err(FetchError::Transport(format!("HTTP {status}")))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        parse_intraday(&body)
    }
}

/// Parse an intraday heart-rate response into samples.
///
/// Offsets are seconds since local midnight of the requested date. A response
/// without an intraday dataset yields no samples.
pub fn parse_intraday(raw_json: &str) -> Result<Vec<TimeSample>, FetchError> {
    let payload: IntradayPayload =
        serde_json::from_str(raw_json).map_err(|e| FetchError::Parse(e.to_string()))?;

    let dataset = payload.intraday.map(|i| i.dataset).unwrap_or_default();
    dataset
        .into_iter()
        .map(|point| {
            let time = NaiveTime::parse_from_str(&point.time, "%H:%M:%S")
                .map_err(|e| FetchError::Parse(format!("time {:?}: {e}", point.time)))?;
            Ok(TimeSample::new(
                f64::from(time.num_seconds_from_midnight()),
                point.value,
            ))
        })
        .collect()
}

/// OAuth refresh-token exchange against the Fitbit token endpoint
pub struct FitbitTokenRefresher {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl FitbitTokenRefresher {
    pub fn new(endpoints: &Endpoints, fetch: &FetchConfig) -> Result<Self, EngineError> {
        if endpoints.client_id.is_empty() {
            return Err(EngineError::Config("OAuth client_id is not set".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(fetch.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            token_url: endpoints.token_url.clone(),
            client_id: endpoints.client_id.clone(),
            client_secret: endpoints.client_secret.clone(),
        })
    }
}

#[async_trait]
impl CredentialRefresher for FitbitTokenRefresher {
    async fn refresh(
        &self,
        credentials: &WearableCredentials,
    ) -> Result<WearableCredentials, FetchError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::RefreshFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::RefreshFailed(e.to_string()))?;

        Ok(WearableCredentials {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            wearable_user_id: token
                .user_id
                .or_else(|| credentials.wearable_user_id.clone()),
        })
    }
}

// Fitbit API response structures

#[derive(Debug, Deserialize)]
struct IntradayPayload {
    #[serde(rename = "activities-heart-intraday")]
    intraday: Option<IntradaySeries>,
}

#[derive(Debug, Deserialize)]
struct IntradaySeries {
    #[serde(default)]
    dataset: Vec<IntradayPoint>,
}

#[derive(Debug, Deserialize)]
struct IntradayPoint {
    time: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    user_id: Option<String>,
}
