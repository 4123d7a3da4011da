//! Learning Store - event and personality persistence seams
//!
//! The twin only ever talks to storage through these traits. Events are
//! append-only; the one mutation allowed is flipping `applied` once the
//! derivation pipeline has finished with an event.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::twin::autonomy::{AutonomySettings, AutonomySettingsStore};
use crate::twin::facts::{Fact, FactStore};
use crate::types::{clamp_unit, EventType, LearningEvent, Payload, PersonalityProfile};

/// Restricts which events a query returns
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only these event types (all when `None`)
    pub event_types: Option<Vec<EventType>>,
    /// Only events from this module/context
    pub module: Option<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Events recorded from user activity, excluding derived artifacts
    pub fn primary() -> Self {
        Self {
            event_types: Some(EventType::PRIMARY.to_vec()),
            module: None,
        }
    }

    pub fn of_type(event_type: EventType) -> Self {
        Self {
            event_types: Some(vec![event_type]),
            module: None,
        }
    }

    pub fn matches(&self, event: &LearningEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        match &self.module {
            Some(module) => event.context.eq_ignore_ascii_case(module),
            None => true,
        }
    }
}

/// Append/query interface over time-ordered per-user events
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Persist an event, returning its id
    async fn append(&self, event: &LearningEvent) -> Result<String>;

    /// Events for a user inside `window`, newest first, at most `limit`
    async fn query(
        &self,
        user_id: &str,
        filter: &EventFilter,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<LearningEvent>>;

    /// Mark an event as fully processed
    async fn mark_applied(&self, event_id: &str) -> Result<()>;
}

/// Per-user trait vector storage
#[async_trait::async_trait]
pub trait PersonalityStore: Send + Sync {
    async fn get_traits(&self, user_id: &str) -> Result<Option<PersonalityProfile>>;

    async fn put_traits(
        &self,
        user_id: &str,
        traits: &BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// Build a derived artifact event (pattern, prediction, insight)
pub fn derived_event(
    user_id: &str,
    event_type: EventType,
    context: &str,
    confidence: f64,
    payload: Payload,
) -> LearningEvent {
    let mut event = LearningEvent::new(user_id, event_type, context, confidence);
    event.payload = payload;
    event.applied = true;
    event
}

/// Serialize a value into an event payload object
pub fn to_payload<T: serde::Serialize>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value).context("Failed to serialize payload")? {
        Value::Object(map) => Ok(map),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

/// In-process store for all three persistence seams
#[derive(Default)]
pub struct MemoryLearningStore {
    events: RwLock<Vec<LearningEvent>>,
    profiles: RwLock<HashMap<String, PersonalityProfile>>,
    autonomy: RwLock<HashMap<String, AutonomySettings>>,
    facts: RwLock<Vec<Fact>>,
}

impl MemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a default profile for a user (profile creation lives outside the adapter)
    pub async fn create_profile(&self, user_id: &str) {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), PersonalityProfile::with_defaults(user_id));
    }

    pub async fn set_profile(&self, profile: PersonalityProfile) {
        self.profiles.write().await.insert(profile.user_id.clone(), profile);
    }

    pub async fn set_autonomy(&self, user_id: &str, settings: AutonomySettings) {
        self.autonomy.write().await.insert(user_id.to_string(), settings);
    }

    /// Every stored event for a user, oldest first
    pub async fn events_for(&self, user_id: &str) -> Vec<LearningEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn get_event(&self, event_id: &str) -> Option<LearningEvent> {
        self.events.read().await.iter().find(|e| e.id == event_id).cloned()
    }
}

#[async_trait::async_trait]
impl EventStore for MemoryLearningStore {
    async fn append(&self, event: &LearningEvent) -> Result<String> {
        let mut events = self.events.write().await;
        if events.iter().any(|e| e.id == event.id) {
            anyhow::bail!("Event {} already persisted", event.id);
        }
        let mut stored = event.clone();
        stored.confidence = clamp_unit(stored.confidence);
        events.push(stored);
        Ok(event.id.clone())
    }

    async fn query(
        &self,
        user_id: &str,
        filter: &EventFilter,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<LearningEvent>> {
        let since = Utc::now() - window;
        let events = self.events.read().await;
        let mut matching: Vec<LearningEvent> = events
            .iter()
            .filter(|e| e.user_id == user_id && e.timestamp >= since && filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn mark_applied(&self, event_id: &str) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .with_context(|| format!("Event not found: {}", event_id))?;
        event.applied = true;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersonalityStore for MemoryLearningStore {
    async fn get_traits(&self, user_id: &str) -> Result<Option<PersonalityProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn put_traits(
        &self,
        user_id: &str,
        traits: &BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.profiles.write().await.insert(
            user_id.to_string(),
            PersonalityProfile {
                user_id: user_id.to_string(),
                traits: traits.clone(),
                last_updated: timestamp,
            },
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl AutonomySettingsStore for MemoryLearningStore {
    async fn get_autonomy(&self, user_id: &str) -> Result<Option<AutonomySettings>> {
        Ok(self.autonomy.read().await.get(user_id).cloned())
    }
}

#[async_trait::async_trait]
impl FactStore for MemoryLearningStore {
    async fn put_fact(&self, fact: &Fact) -> Result<bool> {
        let mut facts = self.facts.write().await;
        let known = facts
            .iter()
            .any(|f| f.user_id == fact.user_id && f.statement.eq_ignore_ascii_case(&fact.statement));
        if !known {
            facts.push(fact.clone());
        }
        Ok(!known)
    }

    async fn facts_for(&self, user_id: &str, limit: usize) -> Result<Vec<Fact>> {
        let facts = self.facts.read().await;
        let mut matching: Vec<Fact> = facts.iter().filter(|f| f.user_id == user_id).cloned().collect();
        matching.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matching.truncate(limit);
        Ok(matching)
    }
}
