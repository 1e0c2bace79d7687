//! Alarm event lifecycle
//!
//! `AlarmProcessor` drives one alarm firing through its two passes:
//!
//! 1. Pre-alarm: create the event, read the pre-wake window, resample at 5 s,
//!    summarize, select a mixing pattern, persist
//! 2. Post-wake: read the post-wake window, resample at 1 s, derive peak and
//!    intensity, obtain slope/stddev, persist, score comfort when mood exists
//!
//! Mood submission and metrics retry work from stored values only and never
//! contact the telemetry source.

use crate::analysis::{
    AwakeningMetricsCalculator, HttpMetricsCalculator, HttpRecommender, SimilarityRecommender,
};
use crate::comfort::{ComfortFormula, ComfortScorer};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features::Summarizer;
use crate::policy::{PatternPolicy, PolicyState};
use crate::resample::Resampler;
use crate::store::{CredentialStore, EventQuery, EventStore};
use crate::telemetry::{FitbitClient, FitbitTokenRefresher, ResilientFetcher};
use crate::types::{
    AlarmEvent, AwakeningMetrics, EvaluationReport, FallbackReason, HistoricalEvent, HrReport,
    MixingPattern, PatternSelection, PostWakeReport, PreAlarmReport, Recommendation,
    ResampledSeries,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Accepted mood and sound ratings
pub const RATING_RANGE: RangeInclusive<u8> = 1..=5;
/// Confidence reported by an on-demand recommendation that had to default
pub const MANUAL_DEFAULT_CONFIDENCE: f64 = 0.5;

/// Orchestrates pre-alarm and post-wake processing for alarm events
pub struct AlarmProcessor {
    config: EngineConfig,
    policy: PatternPolicy,
    events: Arc<dyn EventStore>,
    fetcher: ResilientFetcher,
    recommender: Arc<dyn SimilarityRecommender>,
    metrics: Arc<dyn AwakeningMetricsCalculator>,
}

impl AlarmProcessor {
    /// Create a processor from explicit collaborators
    pub fn new(
        config: EngineConfig,
        events: Arc<dyn EventStore>,
        fetcher: ResilientFetcher,
        recommender: Arc<dyn SimilarityRecommender>,
        metrics: Arc<dyn AwakeningMetricsCalculator>,
    ) -> Self {
        let policy = PatternPolicy::new(&config.policy);
        Self {
            config,
            policy,
            events,
            fetcher,
            recommender,
            metrics,
        }
    }

    /// Create a processor talking to Fitbit and the analysis service
    pub fn from_config(
        config: EngineConfig,
        events: Arc<dyn EventStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, EngineError> {
        let source = FitbitClient::new(&config.endpoints, &config.fetch)?;
        let refresher = FitbitTokenRefresher::new(&config.endpoints, &config.fetch)?;
        let fetcher = ResilientFetcher::new(
            Arc::new(source),
            Arc::new(refresher),
            credentials,
            config.fetch.rate_limit_backoff(),
        );
        let recommender = HttpRecommender::new(&config.endpoints, &config.fetch)?;
        let metrics = HttpMetricsCalculator::new(&config.endpoints, &config.fetch)?;

        Ok(Self::new(
            config,
            events,
            fetcher,
            Arc::new(recommender),
            Arc::new(metrics),
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Completed-event count and the policy state it implies
    pub async fn progression(&self, user_id: &str) -> Result<(usize, PolicyState), EngineError> {
        let completed = self.events.count_completed(user_id, None).await?;
        Ok((completed, self.policy.state_for(completed)))
    }

    /// Pre-alarm pass for an alarm ringing at `alarm_time`.
    ///
    /// Always yields a pattern once the event exists: missing telemetry or
    /// unreadable history degrades to the default pattern with confidence 0.
    /// Only failures to insert or update the event itself are returned.
    pub async fn pre_alarm(
        &self,
        user_id: &str,
        alarm_id: &str,
        alarm_time: DateTime<Utc>,
    ) -> Result<PreAlarmReport, EngineError> {
        let mut event = AlarmEvent::new(user_id, alarm_id, alarm_time);
        self.events.insert(&event).await?;
        info!(event_id = %event.id, alarm_id, "pre-alarm event created");

        let window = &self.config.pre_alarm;
        let start = alarm_time - Duration::minutes(window.start_minutes_before);
        let end = alarm_time - Duration::minutes(window.end_minutes_before);

        let series = self
            .fetch_series(user_id, start, end, window.step_seconds)
            .await;

        let mut hr = HrReport::default();
        let selection = match series {
            Some(series) => {
                let summary = Summarizer::summarize(series.values());
                hr = HrReport {
                    data_points: series.len(),
                    avg: summary.mean,
                    std: summary.stddev,
                };
                info!(
                    event_id = %event.id,
                    data_points = hr.data_points,
                    avg = summary.mean,
                    std = summary.stddev,
                    "pre-wake heart rate collected"
                );

                event.hr_avg_before = Some(summary.mean);
                event.hr_std_before = Some(summary.stddev);
                event.hr_pattern_before = Some(series);
                self.select_pattern(&event).await
            }
            None => {
                info!(event_id = %event.id, "no pre-wake heart rate, using default pattern");
                PatternSelection::fallback(FallbackReason::NoTelemetry)
            }
        };

        event.mixing_pattern = selection.pattern.clone();
        event.pattern_confidence = Some(selection.confidence);
        self.events.update(&event).await?;
        info!(
            event_id = %event.id,
            pattern = %selection.pattern,
            confidence = selection.confidence,
            "pre-alarm pattern stored"
        );

        Ok(PreAlarmReport {
            event_id: event.id,
            recommended_pattern: selection.pattern,
            confidence: selection.confidence,
            source: selection.source,
            hr,
        })
    }

    /// Post-wake pass for a previously created event
    pub async fn post_wake(
        &self,
        user_id: &str,
        event_id: Uuid,
    ) -> Result<PostWakeReport, EngineError> {
        let mut event = self.load_event(user_id, event_id).await?;
        info!(event_id = %event.id, "post-wake processing started");

        let window = &self.config.post_wake;
        let start = event.alarm_time;
        let end = start + Duration::minutes(window.duration_minutes);

        let samples = self.fetcher.fetch_range(user_id, start, end).await?;
        let series = Resampler::resample(&samples, window.step_seconds);
        let shape = Summarizer::awakening_shape(series.values())
            .ok_or_else(|| EngineError::NoPostWakeData(event_id.to_string()))?;

        let metrics = match self.calculate_metrics(series.values()).await {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                warn!(event_id = %event.id, error = %err, "awakening metrics unavailable");
                None
            }
        };

        let data_points = series.len();
        event.hr_pattern_after = Some(series);
        event.hr_peak = Some(shape.peak);
        event.intensity = shape.intensity;
        event.awakening_hr_slope = metrics.map(|m| m.slope);
        event.awakening_hr_stddev = metrics.map(|m| m.stddev);
        event.comfort_score = ComfortScorer::score_event(&event, ComfortFormula::Processing);
        self.events.update(&event).await?;

        info!(
            event_id = %event.id,
            data_points,
            hr_peak = shape.peak,
            slope = ?event.awakening_hr_slope,
            stddev = ?event.awakening_hr_stddev,
            comfort_score = ?event.comfort_score,
            "post-wake processing completed"
        );

        Ok(PostWakeReport {
            event_id: event.id,
            data_points,
            hr_peak: shape.peak,
            intensity: shape.intensity,
            awakening_hr_slope: event.awakening_hr_slope,
            awakening_hr_stddev: event.awakening_hr_stddev,
            comfort_score: event.comfort_score,
            window_start: start,
            window_end: end,
        })
    }

    /// Store the user's ratings and rescore from the stored metrics
    pub async fn submit_evaluation(
        &self,
        user_id: &str,
        event_id: Uuid,
        mood: u8,
        sound: Option<u8>,
    ) -> Result<EvaluationReport, EngineError> {
        check_rating("mood", mood)?;
        if let Some(sound) = sound {
            check_rating("sound", sound)?;
        }

        let mut event = self.load_event(user_id, event_id).await?;
        event.mood_rating = Some(mood);
        event.sound_rating = sound;
        if let Some(score) = ComfortScorer::score_event(&event, self.config.evaluation_formula) {
            event.comfort_score = Some(score);
        }
        self.events.update(&event).await?;

        info!(
            event_id = %event.id,
            mood,
            comfort_score = ?event.comfort_score,
            "evaluation stored"
        );

        Ok(EvaluationReport {
            event_id: event.id,
            mood_rating: mood,
            sound_rating: sound,
            comfort_score: event.comfort_score,
        })
    }

    /// Recompute slope/stddev from the stored post-wake series and rescore
    pub async fn retry_metrics(
        &self,
        user_id: &str,
        event_id: Uuid,
    ) -> Result<AwakeningMetrics, EngineError> {
        let mut event = self.load_event(user_id, event_id).await?;
        let series = event
            .hr_pattern_after
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::NoPostWakeData(event_id.to_string()))?;

        let metrics = self.calculate_metrics(series.values()).await?;
        event.awakening_hr_slope = Some(metrics.slope);
        event.awakening_hr_stddev = Some(metrics.stddev);
        if let Some(score) = ComfortScorer::score_event(&event, ComfortFormula::Processing) {
            event.comfort_score = Some(score);
        }
        self.events.update(&event).await?;

        info!(
            event_id = %event.id,
            slope = metrics.slope,
            stddev = metrics.stddev,
            "awakening metrics recomputed"
        );
        Ok(metrics)
    }

    /// On-demand recommendation for an arbitrary pre-wake series.
    ///
    /// Uses the most recently created qualifying events. With no history, or
    /// when the recommender fails, answers the default pattern at confidence
    /// 0.5.
    pub async fn recommend(
        &self,
        user_id: &str,
        current: &[f64],
    ) -> Result<Recommendation, EngineError> {
        let query = EventQuery::recent_history(self.config.policy.manual_history_limit);
        let history = self.history(user_id, &query).await?;
        if history.is_empty() {
            info!(user_id, "no past events, recommending default pattern");
            return Ok(default_recommendation());
        }

        match tokio::time::timeout(
            self.config.policy.recommender_timeout(),
            self.recommender.recommend(current, &history),
        )
        .await
        {
            Ok(Ok(recommendation)) => Ok(recommendation),
            Ok(Err(err)) => {
                warn!(user_id, error = %err, "recommender failed, recommending default pattern");
                Ok(default_recommendation())
            }
            Err(_) => {
                warn!(user_id, "recommender timed out, recommending default pattern");
                Ok(default_recommendation())
            }
        }
    }

    async fn load_event(&self, user_id: &str, event_id: Uuid) -> Result<AlarmEvent, EngineError> {
        self.events
            .get(user_id, event_id)
            .await?
            .ok_or_else(|| EngineError::EventNotFound(event_id.to_string()))
    }

    /// Resampled series for a window, `None` when nothing usable came back
    async fn fetch_series(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_seconds: f64,
    ) -> Option<ResampledSeries> {
        let samples = match self.fetcher.fetch_range(user_id, start, end).await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(user_id, error = %err, "telemetry fetch failed");
                return None;
            }
        };

        let series = Resampler::resample(&samples, step_seconds);
        (!series.is_empty()).then_some(series)
    }

    /// Run the policy for `event`; store read failures degrade to the default
    async fn select_pattern(&self, event: &AlarmEvent) -> PatternSelection {
        match self.try_select_pattern(event).await {
            Ok(selection) => selection,
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    error = %err,
                    "history unavailable, using default pattern"
                );
                PatternSelection::fallback(FallbackReason::HistoryUnavailable)
            }
        }
    }

    async fn try_select_pattern(
        &self,
        event: &AlarmEvent,
    ) -> Result<PatternSelection, EngineError> {
        let completed = self
            .events
            .count_completed(&event.user_id, Some(event.id))
            .await?;
        info!(event_id = %event.id, completed, "completed alarm events counted");

        let history = match self.policy.state_for(completed) {
            PolicyState::FixedRotation { .. } => Vec::new(),
            PolicyState::AiRecommendation => {
                let query = EventQuery::history(Some(event.id), None);
                self.history(&event.user_id, &query).await?
            }
        };
        let current = event
            .hr_pattern_before
            .as_ref()
            .map(|s| s.values())
            .unwrap_or_default();

        Ok(self
            .policy
            .select(completed, current, &history, self.recommender.as_ref())
            .await)
    }

    async fn history(
        &self,
        user_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<HistoricalEvent>, EngineError> {
        let events = self.events.query(user_id, query).await?;
        Ok(events.iter().filter_map(AlarmEvent::as_historical).collect())
    }

    async fn calculate_metrics(&self, series: &[f64]) -> Result<AwakeningMetrics, EngineError> {
        let timeout = self.config.metrics_timeout();
        match tokio::time::timeout(timeout, self.metrics.calculate(series)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::MetricsUnavailable(format!(
                "timed out after {} ms",
                timeout.as_millis()
            ))),
        }
    }
}

fn check_rating(name: &str, value: u8) -> Result<(), EngineError> {
    if RATING_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidRating(format!(
            "{name} rating must be between 1 and 5, got {value}"
        )))
    }
}

fn default_recommendation() -> Recommendation {
    Recommendation {
        pattern: MixingPattern::DEFAULT,
        confidence: MANUAL_DEFAULT_CONFIDENCE,
        pattern_scores: HashMap::new(),
        similar_events_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, StoreError};
    use crate::store::{MemoryCredentialStore, MemoryEventStore};
    use crate::telemetry::{CredentialRefresher, TelemetrySource};
    use crate::types::{SelectionSource, TimeSample, WearableCredentials};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    const USER: &str = "user-1";

    /// Telemetry source returning a fixed response and counting calls
    struct FixedSource {
        response: Mutex<Result<Vec<TimeSample>, FetchError>>,
        calls: Mutex<usize>,
    }

    impl FixedSource {
        fn new(response: Result<Vec<TimeSample>, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(response),
                calls: Mutex::new(0),
            })
        }

        fn set(&self, response: Result<Vec<TimeSample>, FetchError>) {
            *self.response.lock() = response;
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl TelemetrySource for FixedSource {
        async fn get_intraday_series(
            &self,
            _credentials: &WearableCredentials,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<TimeSample>, FetchError> {
            *self.calls.lock() += 1;
            self.response.lock().clone()
        }
    }

    struct NoRefresh;

    #[async_trait]
    impl CredentialRefresher for NoRefresh {
        async fn refresh(
            &self,
            _credentials: &WearableCredentials,
        ) -> Result<WearableCredentials, FetchError> {
            Err(FetchError::RefreshFailed("not expected".to_string()))
        }
    }

    struct StubRecommender {
        response: Option<(MixingPattern, f64)>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SimilarityRecommender for StubRecommender {
        async fn recommend(
            &self,
            _current: &[f64],
            _history: &[HistoricalEvent],
        ) -> Result<Recommendation, EngineError> {
            *self.calls.lock() += 1;
            match &self.response {
                Some((pattern, confidence)) => Ok(Recommendation {
                    pattern: pattern.clone(),
                    confidence: *confidence,
                    pattern_scores: HashMap::new(),
                    similar_events_count: 3,
                }),
                None => Err(EngineError::RecommenderUnavailable("down".to_string())),
            }
        }
    }

    /// Metrics calculator with a switchable result
    struct StubMetrics {
        result: Mutex<Option<AwakeningMetrics>>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl AwakeningMetricsCalculator for StubMetrics {
        async fn calculate(&self, _series: &[f64]) -> Result<AwakeningMetrics, EngineError> {
            *self.calls.lock() += 1;
            (*self.result.lock())
                .ok_or_else(|| EngineError::MetricsUnavailable("down".to_string()))
        }
    }

    /// Event store whose listing queries fail; single-event access works
    struct FailingReadStore {
        inner: MemoryEventStore,
    }

    #[async_trait]
    impl EventStore for FailingReadStore {
        async fn insert(&self, event: &AlarmEvent) -> Result<(), StoreError> {
            self.inner.insert(event).await
        }

        async fn get(
            &self,
            user_id: &str,
            event_id: Uuid,
        ) -> Result<Option<AlarmEvent>, StoreError> {
            self.inner.get(user_id, event_id).await
        }

        async fn update(&self, event: &AlarmEvent) -> Result<(), StoreError> {
            self.inner.update(event).await
        }

        async fn query(
            &self,
            _user_id: &str,
            _query: &EventQuery,
        ) -> Result<Vec<AlarmEvent>, StoreError> {
            Err(StoreError::Backend("read replica down".to_string()))
        }
    }

    /// Credential store that cannot be read
    struct BrokenCredentials;

    #[async_trait]
    impl CredentialStore for BrokenCredentials {
        async fn load(&self, _user_id: &str) -> Result<Option<WearableCredentials>, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn save(
            &self,
            _user_id: &str,
            _credentials: &WearableCredentials,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    fn linked_credentials() -> WearableCredentials {
        WearableCredentials {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            wearable_user_id: None,
        }
    }

    /// Processor over the given stores with a failing recommender and metrics
    fn processor_with_stores(
        events: Arc<dyn EventStore>,
        credentials: Arc<dyn CredentialStore>,
        source: Arc<FixedSource>,
    ) -> AlarmProcessor {
        let fetcher = ResilientFetcher::new(
            source,
            Arc::new(NoRefresh),
            credentials,
            std::time::Duration::from_millis(10),
        );
        AlarmProcessor::new(
            EngineConfig::default(),
            events,
            fetcher,
            Arc::new(StubRecommender {
                response: None,
                calls: Mutex::new(0),
            }),
            Arc::new(StubMetrics {
                result: Mutex::new(None),
                calls: Mutex::new(0),
            }),
        )
    }

    /// Assert a persisted default pattern with the given fallback reason
    async fn assert_default_stored(
        events: &dyn EventStore,
        report: &PreAlarmReport,
        reason: FallbackReason,
    ) {
        assert_eq!(report.recommended_pattern, MixingPattern::A);
        assert_eq!(report.confidence, 0.0);
        assert_eq!(report.source, SelectionSource::Fallback { reason });

        let stored = events.get(USER, report.event_id).await.unwrap().unwrap();
        assert_eq!(stored.mixing_pattern, MixingPattern::A);
        assert_eq!(stored.pattern_confidence, Some(0.0));
    }

    struct Harness {
        processor: AlarmProcessor,
        events: Arc<MemoryEventStore>,
        source: Arc<FixedSource>,
        recommender: Arc<StubRecommender>,
        metrics: Arc<StubMetrics>,
    }

    async fn harness_with(
        config: EngineConfig,
        telemetry: Result<Vec<TimeSample>, FetchError>,
        recommendation: Option<(MixingPattern, f64)>,
        metrics: Option<AwakeningMetrics>,
    ) -> Harness {
        let events = Arc::new(MemoryEventStore::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials
            .save(USER, &linked_credentials())
            .await
            .unwrap();

        let source = FixedSource::new(telemetry);
        let recommender = Arc::new(StubRecommender {
            response: recommendation,
            calls: Mutex::new(0),
        });
        let metrics = Arc::new(StubMetrics {
            result: Mutex::new(metrics),
            calls: Mutex::new(0),
        });
        let fetcher = ResilientFetcher::new(
            source.clone(),
            Arc::new(NoRefresh),
            credentials,
            std::time::Duration::from_millis(10),
        );

        Harness {
            processor: AlarmProcessor::new(
                config,
                events.clone(),
                fetcher,
                recommender.clone(),
                metrics.clone(),
            ),
            events,
            source,
            recommender,
            metrics,
        }
    }

    async fn harness(
        telemetry: Result<Vec<TimeSample>, FetchError>,
        recommendation: Option<(MixingPattern, f64)>,
        metrics: Option<AwakeningMetrics>,
    ) -> Harness {
        harness_with(EngineConfig::default(), telemetry, recommendation, metrics).await
    }

    fn alarm_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap()
    }

    fn irregular_readings() -> Vec<TimeSample> {
        vec![
            TimeSample::new(23_400.0, 58.0),
            TimeSample::new(23_407.0, 61.0),
            TimeSample::new(23_420.0, 59.0),
            TimeSample::new(23_431.0, 60.0),
        ]
    }

    /// 60, 62, ... 70 at one-second spacing
    fn rising_readings() -> Vec<TimeSample> {
        (0..6)
            .map(|i| TimeSample::new(25_200.0 + i as f64, 60.0 + 2.0 * i as f64))
            .collect()
    }

    fn stub_metrics() -> AwakeningMetrics {
        AwakeningMetrics {
            slope: 0.05,
            stddev: 3.0,
        }
    }

    /// Seed `n` scored events with pre-wake series on consecutive earlier days
    async fn seed_completed(events: &MemoryEventStore, n: usize) {
        for day in 0..n {
            let time = alarm_time() - Duration::days(day as i64 + 1);
            let mut event = AlarmEvent::new(USER, "alarm-1", time);
            event.mixing_pattern = MixingPattern::C;
            event.hr_pattern_before = Some(ResampledSeries {
                step_seconds: 5.0,
                values: vec![60.0, 61.0, 62.0],
            });
            event.comfort_score = Some(70.0);
            events.insert(&event).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_pre_alarm_rotation_phase_one() {
        let h = harness(Ok(irregular_readings()), None, None).await;
        seed_completed(&h.events, 10).await;

        let report = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(report.recommended_pattern, MixingPattern::B);
        assert_eq!(report.confidence, 1.0);
        assert_eq!(report.source, SelectionSource::FixedRotation { phase: 1 });
        // 31 s at a 5 s step
        assert_eq!(report.hr.data_points, 7);

        let stored = h.events.get(USER, report.event_id).await.unwrap().unwrap();
        assert_eq!(stored.mixing_pattern, MixingPattern::B);
        assert_eq!(stored.pattern_confidence, Some(1.0));
        assert!(stored.has_pre_wake_series());
        assert_eq!(stored.hr_avg_before, Some(report.hr.avg));
        assert_eq!(*h.recommender.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_rotation_ignores_telemetry_shape() {
        let h = harness(Ok(irregular_readings()), None, None).await;
        seed_completed(&h.events, 10).await;
        let first = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        h.source.set(Ok(vec![
            TimeSample::new(0.0, 120.0),
            TimeSample::new(300.0, 45.0),
        ]));
        let second = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(first.recommended_pattern, MixingPattern::B);
        assert_eq!(second.recommended_pattern, MixingPattern::B);
        assert_eq!(second.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_pre_alarm_without_telemetry_uses_default() {
        let h = harness(
            Err(FetchError::Transport("HTTP 503".to_string())),
            None,
            None,
        )
        .await;
        seed_completed(&h.events, 10).await;

        let report = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(report.recommended_pattern, MixingPattern::A);
        assert_eq!(report.confidence, 0.0);
        assert_eq!(
            report.source,
            SelectionSource::Fallback {
                reason: FallbackReason::NoTelemetry
            }
        );
        assert_eq!(report.hr, HrReport::default());

        let stored = h.events.get(USER, report.event_id).await.unwrap().unwrap();
        assert_eq!(stored.mixing_pattern, MixingPattern::A);
        assert_eq!(stored.pattern_confidence, Some(0.0));
        assert!(!stored.has_pre_wake_series());
    }

    #[tokio::test]
    async fn test_pre_alarm_with_empty_telemetry_uses_default() {
        let h = harness(Ok(Vec::new()), None, None).await;

        let report = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(report.recommended_pattern, MixingPattern::A);
        assert_eq!(report.confidence, 0.0);
        assert_eq!(h.events.len(), 1);
    }

    #[tokio::test]
    async fn test_pre_alarm_recommendation_phase() {
        let h = harness(
            Ok(irregular_readings()),
            Some((MixingPattern::B, 0.8)),
            None,
        )
        .await;
        seed_completed(&h.events, 35).await;

        let report = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(report.recommended_pattern, MixingPattern::B);
        assert_eq!(report.confidence, 0.8);
        assert_eq!(report.source, SelectionSource::Recommended);
        assert_eq!(*h.recommender.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_pre_alarm_recommender_down_uses_default() {
        let h = harness(Ok(irregular_readings()), None, None).await;
        seed_completed(&h.events, 36).await;

        let report = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(report.recommended_pattern, MixingPattern::A);
        assert_eq!(report.confidence, 0.0);
        assert_eq!(
            report.source,
            SelectionSource::Fallback {
                reason: FallbackReason::RecommenderUnavailable
            }
        );
    }

    #[tokio::test]
    async fn test_pre_alarm_history_read_failure_uses_default() {
        let events = Arc::new(FailingReadStore {
            inner: MemoryEventStore::new(),
        });
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials.save(USER, &linked_credentials()).await.unwrap();
        let source = FixedSource::new(Ok(irregular_readings()));
        let processor = processor_with_stores(events.clone(), credentials, source.clone());

        let report = processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(report.hr.data_points, 7);
        assert_eq!(source.calls(), 1);
        assert_default_stored(
            events.as_ref(),
            &report,
            FallbackReason::HistoryUnavailable,
        )
        .await;
    }

    #[tokio::test]
    async fn test_pre_alarm_credential_load_failure_uses_default() {
        let events = Arc::new(MemoryEventStore::new());
        let source = FixedSource::new(Ok(irregular_readings()));
        let processor =
            processor_with_stores(events.clone(), Arc::new(BrokenCredentials), source.clone());

        let report = processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(source.calls(), 0);
        assert_default_stored(events.as_ref(), &report, FallbackReason::NoTelemetry).await;
    }

    #[tokio::test]
    async fn test_pre_alarm_unlinked_user_uses_default() {
        let events = Arc::new(MemoryEventStore::new());
        let source = FixedSource::new(Ok(irregular_readings()));
        let processor = processor_with_stores(
            events.clone(),
            Arc::new(MemoryCredentialStore::new()),
            source.clone(),
        );

        let report = processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(source.calls(), 0);
        assert_default_stored(events.as_ref(), &report, FallbackReason::NoTelemetry).await;
    }

    #[tokio::test]
    async fn test_pre_alarm_refresh_failure_uses_default() {
        let h = harness(Err(FetchError::AuthExpired), None, None).await;
        seed_completed(&h.events, 3).await;

        let report = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        assert_eq!(h.source.calls(), 1);
        assert_default_stored(h.events.as_ref(), &report, FallbackReason::NoTelemetry).await;
    }

    #[tokio::test]
    async fn test_post_wake_then_mood_uses_stored_metrics() {
        let h = harness(Ok(irregular_readings()), None, Some(stub_metrics())).await;
        let pre = h
            .processor
            .pre_alarm(USER, "alarm-1", alarm_time())
            .await
            .unwrap();

        h.source.set(Ok(rising_readings()));
        let post = h.processor.post_wake(USER, pre.event_id).await.unwrap();

        let intensity = (70.0 - 65.0) / 65.0;
        assert_eq!(post.data_points, 6);
        assert_eq!(post.hr_peak, 70.0);
        assert_eq!(post.intensity, Some(intensity));
        assert!(post.awakening_hr_slope.unwrap() > 0.0);
        assert!(post.awakening_hr_stddev.unwrap() > 0.0);
        assert_eq!(post.comfort_score, None);
        assert_eq!(post.window_start, alarm_time());
        assert_eq!(post.window_end, alarm_time() + Duration::minutes(3));

        let stored = h.events.get(USER, pre.event_id).await.unwrap().unwrap();
        assert_eq!(
            stored.hr_pattern_after.as_ref().map(|s| s.values().to_vec()),
            Some(vec![60.0, 62.0, 64.0, 66.0, 68.0, 70.0])
        );

        let fetches = h.source.calls();
        let metric_calls = *h.metrics.calls.lock();
        let evaluation = h
            .processor
            .submit_evaluation(USER, pre.event_id, 5, Some(4))
            .await
            .unwrap();

        assert_eq!(
            evaluation.comfort_score,
            Some(ComfortScorer::processing_score(0.05, 3.0, intensity, Some(5)))
        );
        assert_eq!(h.source.calls(), fetches);
        assert_eq!(*h.metrics.calls.lock(), metric_calls);

        let stored = h.events.get(USER, pre.event_id).await.unwrap().unwrap();
        assert_eq!(stored.mood_rating, Some(5));
        assert_eq!(stored.sound_rating, Some(4));
        assert_eq!(stored.comfort_score, evaluation.comfort_score);
    }

    #[tokio::test]
    async fn test_post_wake_scores_when_mood_already_present() {
        let h = harness(Ok(rising_readings()), None, Some(stub_metrics())).await;
        let mut event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        event.mood_rating = Some(2);
        h.events.insert(&event).await.unwrap();

        let post = h.processor.post_wake(USER, event.id).await.unwrap();

        assert_eq!(
            post.comfort_score,
            Some(ComfortScorer::processing_score(
                0.05,
                3.0,
                (70.0 - 65.0) / 65.0,
                Some(2)
            ))
        );
    }

    #[tokio::test]
    async fn test_post_wake_without_data() {
        let h = harness(Ok(Vec::new()), None, Some(stub_metrics())).await;
        let event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        h.events.insert(&event).await.unwrap();

        let result = h.processor.post_wake(USER, event.id).await;

        assert!(matches!(result, Err(EngineError::NoPostWakeData(_))));
        assert_eq!(*h.metrics.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_post_wake_unknown_event() {
        let h = harness(Ok(rising_readings()), None, Some(stub_metrics())).await;
        let event = AlarmEvent::new("someone-else", "alarm-1", alarm_time());
        h.events.insert(&event).await.unwrap();

        let result = h.processor.post_wake(USER, event.id).await;

        assert!(matches!(result, Err(EngineError::EventNotFound(_))));
    }

    #[tokio::test]
    async fn test_metrics_failure_then_retry() {
        let h = harness(Ok(rising_readings()), None, None).await;
        let mut event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        event.mood_rating = Some(4);
        h.events.insert(&event).await.unwrap();

        let post = h.processor.post_wake(USER, event.id).await.unwrap();
        assert_eq!(post.awakening_hr_slope, None);
        assert_eq!(post.awakening_hr_stddev, None);
        assert_eq!(post.comfort_score, None);

        let stored = h.events.get(USER, event.id).await.unwrap().unwrap();
        assert_eq!(stored.hr_peak, Some(70.0));
        assert!(stored.hr_pattern_after.is_some());

        *h.metrics.result.lock() = Some(stub_metrics());
        let fetches = h.source.calls();
        let metrics = h.processor.retry_metrics(USER, event.id).await.unwrap();

        assert_eq!(metrics, stub_metrics());
        assert_eq!(h.source.calls(), fetches);
        let stored = h.events.get(USER, event.id).await.unwrap().unwrap();
        assert_eq!(
            stored.comfort_score,
            Some(ComfortScorer::processing_score(
                0.05,
                3.0,
                (70.0 - 65.0) / 65.0,
                Some(4)
            ))
        );
    }

    #[tokio::test]
    async fn test_retry_metrics_needs_post_wake_series() {
        let h = harness(Ok(rising_readings()), None, Some(stub_metrics())).await;
        let event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        h.events.insert(&event).await.unwrap();

        let result = h.processor.retry_metrics(USER, event.id).await;

        assert!(matches!(result, Err(EngineError::NoPostWakeData(_))));
    }

    #[tokio::test]
    async fn test_evaluation_rejects_out_of_range_ratings() {
        let h = harness(Ok(rising_readings()), None, None).await;
        let event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        h.events.insert(&event).await.unwrap();

        for (mood, sound) in [(0, None), (6, None), (3, Some(9))] {
            let result = h
                .processor
                .submit_evaluation(USER, event.id, mood, sound)
                .await;
            assert!(matches!(result, Err(EngineError::InvalidRating(_))));
        }
    }

    #[tokio::test]
    async fn test_evaluation_without_metrics_leaves_score_empty() {
        let h = harness(Ok(rising_readings()), None, None).await;
        let event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        h.events.insert(&event).await.unwrap();

        let report = h
            .processor
            .submit_evaluation(USER, event.id, 4, None)
            .await
            .unwrap();

        assert_eq!(report.comfort_score, None);
    }

    #[tokio::test]
    async fn test_evaluation_formula_is_configurable() {
        let config = EngineConfig {
            evaluation_formula: ComfortFormula::Evaluation,
            ..EngineConfig::default()
        };
        let h = harness_with(config, Ok(rising_readings()), None, Some(stub_metrics())).await;
        let event = AlarmEvent::new(USER, "alarm-1", alarm_time());
        h.events.insert(&event).await.unwrap();
        h.processor.post_wake(USER, event.id).await.unwrap();

        let report = h
            .processor
            .submit_evaluation(USER, event.id, 5, None)
            .await
            .unwrap();

        assert_eq!(
            report.comfort_score,
            Some(ComfortScorer::evaluation_score(Some(0.05), Some(3.0), Some(5)))
        );
    }

    #[tokio::test]
    async fn test_manual_recommendation_defaults() {
        let h = harness(Ok(rising_readings()), None, None).await;

        let empty = h.processor.recommend(USER, &[60.0, 61.0]).await.unwrap();
        assert_eq!(empty, default_recommendation());
        assert_eq!(*h.recommender.calls.lock(), 0);

        seed_completed(&h.events, 2).await;
        let failed = h.processor.recommend(USER, &[60.0, 61.0]).await.unwrap();
        assert_eq!(failed.pattern, MixingPattern::A);
        assert_eq!(failed.confidence, MANUAL_DEFAULT_CONFIDENCE);
        assert_eq!(*h.recommender.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_manual_recommendation_passthrough() {
        let h = harness(
            Ok(rising_readings()),
            Some((MixingPattern::new("B+C"), 0.72)),
            None,
        )
        .await;
        seed_completed(&h.events, 1).await;

        let recommendation = h.processor.recommend(USER, &[60.0]).await.unwrap();

        assert_eq!(recommendation.pattern.as_str(), "B+C");
        assert_eq!(recommendation.confidence, 0.72);
    }

    #[tokio::test]
    async fn test_manual_recommendation_uses_latest_created_events() {
        let mut config = EngineConfig::default();
        config.policy.manual_history_limit = 1;
        let h = harness_with(config, Ok(rising_readings()), Some((MixingPattern::D, 0.9)), None)
            .await;
        seed_completed(&h.events, 1).await;

        // Earlier alarm time, but the most recently created event
        let mut latest = AlarmEvent::new(USER, "alarm-1", alarm_time() - Duration::days(30));
        latest.created_at = Utc::now() + Duration::hours(1);
        latest.mixing_pattern = MixingPattern::E;
        latest.hr_pattern_before = Some(ResampledSeries {
            step_seconds: 5.0,
            values: vec![70.0, 71.0],
        });
        latest.comfort_score = Some(90.0);
        h.events.insert(&latest).await.unwrap();

        let history = h
            .processor
            .history(USER, &EventQuery::recent_history(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_id, latest.id);

        let recommendation = h.processor.recommend(USER, &[60.0]).await.unwrap();
        assert_eq!(recommendation.pattern, MixingPattern::D);
    }

    #[tokio::test]
    async fn test_progression_reports_state() {
        let h = harness(Ok(rising_readings()), None, None).await;
        seed_completed(&h.events, 15).await;

        let (completed, state) = h.processor.progression(USER).await.unwrap();

        assert_eq!(completed, 15);
        assert_eq!(state, PolicyState::FixedRotation { phase: 2 });
    }
}
