//! Event and credential persistence
//!
//! The engine reads and writes alarm events and wearable credentials through
//! the traits below. In-memory implementations are provided for embedding and
//! tests; the event store can be snapshotted to JSON and restored.

use crate::error::StoreError;
use crate::types::{AlarmEvent, WearableCredentials};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sort key for [`EventQuery`] results, newest first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventOrder {
    #[default]
    AlarmTime,
    CreatedAt,
}

/// Filter for listing a user's events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Leave this event out (the one currently being processed)
    pub exclude: Option<Uuid>,
    /// Only events with a non-empty pre-wake series
    pub require_pre_wake_series: bool,
    /// Only events with a comfort score
    pub require_comfort_score: bool,
    /// Keep at most this many, most recent first
    pub limit: Option<usize>,
    pub order: EventOrder,
}

impl EventQuery {
    /// Events that count as completed progression steps
    pub fn completed(exclude: Option<Uuid>) -> Self {
        Self {
            exclude,
            require_comfort_score: true,
            ..Self::default()
        }
    }

    /// Events usable as recommender history
    pub fn history(exclude: Option<Uuid>, limit: Option<usize>) -> Self {
        Self {
            exclude,
            require_pre_wake_series: true,
            require_comfort_score: true,
            limit,
            order: EventOrder::AlarmTime,
        }
    }

    /// Recommender history by most recently created event
    pub fn recent_history(limit: usize) -> Self {
        Self {
            order: EventOrder::CreatedAt,
            ..Self::history(None, Some(limit))
        }
    }

    fn matches(&self, event: &AlarmEvent) -> bool {
        self.exclude != Some(event.id)
            && (!self.require_pre_wake_series || event.has_pre_wake_series())
            && (!self.require_comfort_score || event.is_completed())
    }
}

/// Persistent store of alarm events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a new event
    async fn insert(&self, event: &AlarmEvent) -> Result<(), StoreError>;

    /// Fetch an event owned by `user_id`
    async fn get(&self, user_id: &str, event_id: Uuid) -> Result<Option<AlarmEvent>, StoreError>;

    /// Overwrite an existing event (last write wins)
    async fn update(&self, event: &AlarmEvent) -> Result<(), StoreError>;

    /// List a user's events matching `query`, newest first by `query.order`
    async fn query(&self, user_id: &str, query: &EventQuery)
        -> Result<Vec<AlarmEvent>, StoreError>;

    /// Number of the user's events with a comfort score, excluding `exclude`
    async fn count_completed(
        &self,
        user_id: &str,
        exclude: Option<Uuid>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .query(user_id, &EventQuery::completed(exclude))
            .await?
            .len())
    }
}

/// Persistent store of wearable credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials for `user_id`; `None` when no wearable is linked
    async fn load(&self, user_id: &str) -> Result<Option<WearableCredentials>, StoreError>;

    /// Replace the user's credentials
    async fn save(&self, user_id: &str, credentials: &WearableCredentials)
        -> Result<(), StoreError>;
}

/// In-memory event store
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<Uuid, AlarmEvent>>,
}

/// Serialized form of [`MemoryEventStore`]
#[derive(Debug, Serialize, Deserialize)]
struct EventSnapshot {
    events: Vec<AlarmEvent>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events across all users
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Load store contents from JSON
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: EventSnapshot = serde_json::from_str(json)?;
        let events = snapshot.events.into_iter().map(|e| (e.id, e)).collect();
        Ok(Self {
            events: RwLock::new(events),
        })
    }

    /// Serialize store contents to JSON, ordered by creation time
    pub fn to_json(&self) -> Result<String, StoreError> {
        let mut events: Vec<AlarmEvent> = self.events.read().values().cloned().collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(serde_json::to_string(&EventSnapshot { events })?)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &AlarmEvent) -> Result<(), StoreError> {
        let mut events = self.events.write();
        if events.contains_key(&event.id) {
            return Err(StoreError::Backend(format!("duplicate event id {}", event.id)));
        }
        events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get(&self, user_id: &str, event_id: Uuid) -> Result<Option<AlarmEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .get(&event_id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn update(&self, event: &AlarmEvent) -> Result<(), StoreError> {
        let mut events = self.events.write();
        match events.get_mut(&event.id) {
            Some(stored) if stored.user_id == event.user_id => {
                *stored = event.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(event.id.to_string())),
        }
    }

    async fn query(
        &self,
        user_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<AlarmEvent>, StoreError> {
        let mut matching: Vec<AlarmEvent> = self
            .events
            .read()
            .values()
            .filter(|e| e.user_id == user_id && query.matches(e))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let newest = match query.order {
                EventOrder::AlarmTime => b.alarm_time.cmp(&a.alarm_time),
                EventOrder::CreatedAt => b.created_at.cmp(&a.created_at),
            };
            newest.then(b.id.cmp(&a.id))
        });
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

/// In-memory credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, WearableCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, user_id: &str) -> Result<Option<WearableCredentials>, StoreError> {
        Ok(self.credentials.read().get(user_id).cloned())
    }

    async fn save(
        &self,
        user_id: &str,
        credentials: &WearableCredentials,
    ) -> Result<(), StoreError> {
        self.credentials
            .write()
            .insert(user_id.to_string(), credentials.clone());
        Ok(())
    }
}
