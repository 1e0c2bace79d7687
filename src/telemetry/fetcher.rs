//! Bounded-retry telemetry fetching
//!
//! A fetch makes at most two calls to the telemetry source. After a failed
//! first call exactly one recovery step may run (credential refresh or a fixed
//! backoff), followed by one final call whose result is returned as-is.

use crate::error::{EngineError, FetchError};
use crate::store::CredentialStore;
use crate::types::{TimeSample, WearableCredentials};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{CredentialRefresher, TelemetrySource};

/// Recovery step allowed before the single retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    RefreshCredentials,
    Backoff,
}

impl Recovery {
    fn for_error(err: &FetchError) -> Option<Self> {
        match err {
            FetchError::AuthExpired => Some(Recovery::RefreshCredentials),
            FetchError::RateLimited => Some(Recovery::Backoff),
            _ => None,
        }
    }
}

/// Telemetry fetcher with refresh-and-retry-once semantics
pub struct ResilientFetcher {
    source: Arc<dyn TelemetrySource>,
    refresher: Arc<dyn CredentialRefresher>,
    credentials: Arc<dyn CredentialStore>,
    backoff: Duration,
}

impl ResilientFetcher {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        refresher: Arc<dyn CredentialRefresher>,
        credentials: Arc<dyn CredentialStore>,
        backoff: Duration,
    ) -> Self {
        Self {
            source,
            refresher,
            credentials,
            backoff,
        }
    }

    /// Fetch the user's readings for `[start, end]`.
    ///
    /// Expired credentials are refreshed and persisted before the retry; a
    /// rate limit waits the configured backoff. Any other failure, or a failed
    /// retry, surfaces as [`EngineError::TelemetryUnavailable`].
    pub async fn fetch_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSample>, EngineError> {
        let credentials = self
            .credentials
            .load(user_id)
            .await?
            .ok_or_else(|| FetchError::NotLinked(user_id.to_string()))?;

        let err = match self.source.get_intraday_series(&credentials, start, end).await {
            Ok(samples) => return Ok(samples),
            Err(err) => err,
        };

        let retry_credentials = match Recovery::for_error(&err) {
            Some(Recovery::RefreshCredentials) => {
                info!(user_id, "access token expired, refreshing");
                self.refresh(user_id, &credentials).await?
            }
            Some(Recovery::Backoff) => {
                info!(user_id, backoff_ms = self.backoff.as_millis() as u64, "rate limited, backing off");
                tokio::time::sleep(self.backoff).await;
                credentials
            }
            None => {
                warn!(user_id, error = %err, "telemetry fetch failed");
                return Err(err.into());
            }
        };

        self.source
            .get_intraday_series(&retry_credentials, start, end)
            .await
            .map_err(|err| {
                warn!(user_id, error = %err, "telemetry retry failed");
                err.into()
            })
    }

    async fn refresh(
        &self,
        user_id: &str,
        stale: &WearableCredentials,
    ) -> Result<WearableCredentials, EngineError> {
        let fresh = self.refresher.refresh(stale).await?;
        self.credentials.save(user_id, &fresh).await?;
        Ok(fresh)
    }
}
