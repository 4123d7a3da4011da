//! Shared types used across modules
//!
//! Learning events and every artifact derived from them (patterns,
//! predictions, insights, personality profiles) live here so that the
//! `learning` and `twin` modules can both depend on them without cycles.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::TwinError;

/// JSON object payload carried by events and derived artifacts
pub type Payload = Map<String, Value>;

/// Trait value used when a profile has no entry for a trait
pub const DEFAULT_TRAIT_VALUE: f64 = 0.5;

/// Clamp a score into [0, 1]. NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Bring an externally supplied confidence onto the canonical 0-1 scale.
///
/// Values above 1 are read as percentages (0-100). Only provider and
/// event-submission boundaries call this; everything inside the crate is 0-1.
pub fn normalize_confidence(value: f64) -> f64 {
    if value > 1.0 {
        clamp_unit(value / 100.0)
    } else {
        clamp_unit(value)
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp: Utc::now() }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Convert to OpenAI-style role string
    pub fn to_openai_string(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
            Role::System => write!(f, "System"),
        }
    }
}

// ============ Learning events ============

/// Kind of learning event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Interaction,
    Feedback,
    Correction,
    Pattern,
    Prediction,
    Insight,
}

impl EventType {
    /// Event types recorded directly from user activity
    pub const PRIMARY: [EventType; 3] = [EventType::Interaction, EventType::Feedback, EventType::Correction];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Interaction => "interaction",
            EventType::Feedback => "feedback",
            EventType::Correction => "correction",
            EventType::Pattern => "pattern",
            EventType::Prediction => "prediction",
            EventType::Insight => "insight",
        }
    }

    /// Whether this event was written back by the derivation pipeline
    pub fn is_derived(&self) -> bool {
        matches!(self, EventType::Pattern | EventType::Prediction | EventType::Insight)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interaction" => Ok(EventType::Interaction),
            "feedback" => Ok(EventType::Feedback),
            "correction" => Ok(EventType::Correction),
            "pattern" => Ok(EventType::Pattern),
            "prediction" => Ok(EventType::Prediction),
            "insight" => Ok(EventType::Insight),
            other => Err(TwinError::validation(format!("unknown event type '{}'", other))),
        }
    }
}

/// Impact level of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Low => "low",
            Impact::Medium => "medium",
            Impact::High => "high",
            Impact::Critical => "critical",
        }
    }

    /// Lenient parse: anything unrecognized is medium
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Impact::Low,
            "high" => Impact::High,
            "critical" => Impact::Critical,
            _ => Impact::Medium,
        }
    }
}

impl<'de> Deserialize<'de> for Impact {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| Impact::parse_lenient(&s)).unwrap_or_default())
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of a user interaction or a derived artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    pub id: String,
    pub user_id: String,
    pub event_type: EventType,
    /// Module or context the event happened in (e.g. "calendar", "chat")
    pub context: String,
    #[serde(default)]
    pub payload: Payload,
    pub confidence: f64,
    #[serde(default)]
    pub impact: Impact,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub applied: bool,
}

impl LearningEvent {
    pub fn new(user_id: &str, event_type: EventType, context: &str, confidence: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_type,
            context: context.to_string(),
            payload: Payload::new(),
            confidence: clamp_unit(confidence),
            impact: Impact::Medium,
            timestamp: Utc::now(),
            applied: false,
        }
    }

    pub fn with_impact(mut self, impact: Impact) -> Self {
        self.impact = impact;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_payload(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    /// `actionType` from the payload, if present and a string
    pub fn action_type(&self) -> Option<&str> {
        self.payload.get("actionType").and_then(Value::as_str)
    }
}

// ============ Patterns ============

/// Family of a derived pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Behavioral,
    Temporal,
    Preference,
    Communication,
    Decision,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Behavioral => "behavioral",
            PatternType::Temporal => "temporal",
            PatternType::Preference => "preference",
            PatternType::Communication => "communication",
            PatternType::Decision => "decision",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistical summary derived from a window of events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPattern {
    pub id: String,
    pub user_id: String,
    pub pattern_type: PatternType,
    pub confidence: f64,
    pub strength: f64,
    pub frequency: u32,
    pub last_observed: DateTime<Utc>,
    pub data: Payload,
    #[serde(default)]
    pub predictions: Vec<String>,
}

impl LearningPattern {
    pub fn new(
        user_id: &str,
        pattern_type: PatternType,
        confidence: f64,
        strength: f64,
        frequency: u32,
        last_observed: DateTime<Utc>,
        data: Payload,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            pattern_type,
            confidence: clamp_unit(confidence),
            strength: clamp_unit(strength),
            frequency: frequency.max(1),
            last_observed,
            data,
            predictions: Vec::new(),
        }
    }

    /// The `kind` discriminator inside the data payload
    pub fn kind(&self) -> &str {
        self.data.get("kind").and_then(Value::as_str).unwrap_or("")
    }

    /// Numeric field from the data payload, zero when missing or malformed
    pub fn number(&self, key: &str) -> f64 {
        self.data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// String field from the data payload, empty when missing or malformed
    pub fn text(&self, key: &str) -> &str {
        self.data.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

// ============ Predictions ============

/// How far ahead a prediction looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Immediate,
    ShortTerm,
    LongTerm,
}

impl Timeframe {
    /// How long a prediction in this timeframe stays valid
    pub fn validity(&self) -> Duration {
        match self {
            Timeframe::Immediate | Timeframe::ShortTerm => Duration::hours(24),
            Timeframe::LongTerm => Duration::days(7),
        }
    }
}

/// Time-bounded, confidence-scored forecast derived from a pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: String,
    pub user_id: String,
    pub prediction_type: String,
    pub confidence: f64,
    pub probability: f64,
    pub timeframe: Timeframe,
    pub description: String,
    pub data: Payload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub validated: bool,
}

impl Prediction {
    /// Build a prediction expiring after the timeframe's validity window
    pub fn new(
        user_id: &str,
        prediction_type: &str,
        confidence: f64,
        probability: f64,
        timeframe: Timeframe,
        description: String,
        data: Payload,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            prediction_type: prediction_type.to_string(),
            confidence: clamp_unit(confidence),
            probability: clamp_unit(probability),
            timeframe,
            description,
            data,
            created_at,
            expires_at: created_at + timeframe.validity(),
            validated: false,
        }
    }

    /// Override the expiry. Fails unless it lies after `created_at`.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Result<Self, TwinError> {
        if expires_at <= self.created_at {
            return Err(TwinError::validation(format!(
                "prediction {} would expire at {} which is not after {}",
                self.id, expires_at, self.created_at
            )));
        }
        self.expires_at = expires_at;
        Ok(self)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============ Insights ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    BehaviorChange,
    PreferenceShift,
    PatternEmergence,
    AnomalyDetection,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::BehaviorChange => "behavior_change",
            InsightType::PreferenceShift => "preference_shift",
            InsightType::PatternEmergence => "pattern_emergence",
            InsightType::AnomalyDetection => "anomaly_detection",
        }
    }
}

/// Derived observation about a change, emergence or anomaly in behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub user_id: String,
    pub insight_type: InsightType,
    pub confidence: f64,
    pub significance: f64,
    pub description: String,
    pub recommendations: Vec<String>,
    pub data: Payload,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn new(
        user_id: &str,
        insight_type: InsightType,
        confidence: f64,
        significance: f64,
        description: String,
        recommendations: Vec<String>,
        data: Payload,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            insight_type,
            confidence: clamp_unit(confidence),
            significance: clamp_unit(significance),
            description,
            recommendations,
            data,
            created_at: Utc::now(),
        }
    }

    /// Module the insight was observed in, if recorded
    pub fn module(&self) -> Option<&str> {
        self.data.get("module").and_then(Value::as_str)
    }
}

// ============ Personality ============

/// Per-user adaptive trait vector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityProfile {
    pub user_id: String,
    pub traits: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl PersonalityProfile {
    /// Profile with every base trait at the default value
    pub fn with_defaults(user_id: &str) -> Self {
        let traits = BASE_TRAITS
            .iter()
            .map(|t| (t.to_string(), DEFAULT_TRAIT_VALUE))
            .collect();
        Self { user_id: user_id.to_string(), traits, last_updated: Utc::now() }
    }

    /// Trait value, defaulting to 0.5 when absent
    pub fn get(&self, name: &str) -> f64 {
        trait_value(&self.traits, name)
    }
}

/// Traits tracked for every user
pub const BASE_TRAITS: [&str; 5] = [
    "openness",
    "conscientiousness",
    "extraversion",
    "agreeableness",
    "neuroticism",
];

/// Look up a trait in a raw map, defaulting to 0.5
pub fn trait_value(traits: &BTreeMap<String, f64>, name: &str) -> f64 {
    traits.get(name).copied().map(clamp_unit).unwrap_or(DEFAULT_TRAIT_VALUE)
}

/// A single materialized trait change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityAdjustment {
    pub trait_name: String,
    pub current_value: f64,
    pub new_value: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub evidence: Vec<String>,
}

/// Truncate a string on a char boundary, appending "..." when shortened
pub fn truncate_safe(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
