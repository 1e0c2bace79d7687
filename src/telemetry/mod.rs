//! Wearable telemetry access
//!
//! This module defines the seams to the wearable vendor (intraday series and
//! OAuth credential refresh), the Fitbit implementation of both, and the
//! resilient fetcher that wraps them with a bounded retry.

mod fetcher;
mod fitbit;

pub use fetcher::ResilientFetcher;
pub use fitbit::{parse_intraday, FitbitClient, FitbitTokenRefresher};

use crate::error::FetchError;
use crate::types::{TimeSample, WearableCredentials};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of intraday heart-rate readings
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Readings between `start` and `end` at native resolution, ordered by time.
    ///
    /// Fails with [`FetchError::AuthExpired`] or [`FetchError::RateLimited`]
    /// for the two retriable conditions; any other error is final.
    async fn get_intraday_series(
        &self,
        credentials: &WearableCredentials,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSample>, FetchError>;
}

/// Exchanges a refresh token for a new access/refresh pair
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(
        &self,
        credentials: &WearableCredentials,
    ) -> Result<WearableCredentials, FetchError>;
}
