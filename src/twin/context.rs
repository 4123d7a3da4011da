//! Cross-module user context
//!
//! Assembly tries the query-filtered smart context first, then the full
//! context, then a static default so a query never blocks on a missing
//! collaborator.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use super::classifier::modules_mentioned;
use crate::config::LearningConfig;
use crate::error::TwinError;
use crate::learning::store::{EventFilter, EventStore, PersonalityStore};
use crate::types::{
    EventType, Insight, LearningEvent, LearningPattern, PersonalityProfile, BASE_TRAITS, DEFAULT_TRAIT_VALUE,
};

/// Derived-artifact rows loaded into a context
const RECENT_ARTIFACTS: usize = 10;

/// Which assembly tier produced the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Smart,
    Full,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleActivity {
    pub module: String,
    pub event_count: usize,
    pub last_active: Option<DateTime<Utc>>,
}

/// Coarse life-state scores, each in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeState {
    pub productivity: f64,
    pub social: f64,
    pub organization: f64,
    pub wellbeing: f64,
}

impl Default for LifeState {
    fn default() -> Self {
        Self {
            productivity: 0.5,
            social: 0.5,
            organization: 0.5,
            wellbeing: 0.5,
        }
    }
}

impl LifeState {
    /// Scores from the share of recent primary events per module family
    pub fn from_events(events: &[LearningEvent]) -> Self {
        if events.is_empty() {
            return Self::default();
        }
        let total = events.len() as f64;
        let share = |modules: &[&str]| {
            events
                .iter()
                .filter(|e| modules.iter().any(|m| e.context.eq_ignore_ascii_case(m)))
                .count() as f64
                / total
        };
        let corrections = events.iter().filter(|e| e.event_type == EventType::Correction).count() as f64;
        Self {
            productivity: share(&["calendar", "tasks"]),
            social: share(&["chat"]),
            organization: share(&["drive"]),
            wellbeing: 1.0 - corrections / total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub traits: BTreeMap<String, f64>,
    pub life_state: LifeState,
    pub modules: Vec<ModuleActivity>,
    pub recent_patterns: Vec<LearningPattern>,
    pub recent_insights: Vec<Insight>,
    pub semantic_hints: Vec<String>,
}

impl UserContext {
    /// Static fallback: neutral traits, neutral life state, nothing recent
    pub fn default_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            traits: BASE_TRAITS.iter().map(|t| (t.to_string(), DEFAULT_TRAIT_VALUE)).collect(),
            life_state: LifeState::default(),
            modules: Vec::new(),
            recent_patterns: Vec::new(),
            recent_insights: Vec::new(),
            semantic_hints: vec!["No stored context is available; answer from the query alone".to_string()],
        }
    }

    pub fn trait_value(&self, name: &str) -> f64 {
        crate::types::trait_value(&self.traits, name)
    }
}

/// Query-filtered context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartContext {
    pub full_context: UserContext,
    pub relevant_module_count: usize,
    pub analysis: String,
}

#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    async fn get_smart_context(&self, user_id: &str, query: &str) -> Result<SmartContext>;

    async fn get_full_context(&self, user_id: &str) -> Result<UserContext>;
}

/// Smart, then full, then the static default. Returns warnings for each failed tier.
pub async fn assemble_context(
    provider: &dyn ContextProvider,
    user_id: &str,
    query: &str,
) -> (UserContext, ContextSource, Vec<String>) {
    let mut warnings = Vec::new();

    match provider.get_smart_context(user_id, query).await {
        Ok(smart) => return (smart.full_context, ContextSource::Smart, warnings),
        Err(e) => {
            let err = TwinError::provider("smart context", &e);
            warn!("{}", err);
            warnings.push(err.to_string());
        }
    }

    match provider.get_full_context(user_id).await {
        Ok(full) => (full, ContextSource::Full, warnings),
        Err(e) => {
            let err = TwinError::provider("full context", &e);
            warn!("{}, using default context", err);
            warnings.push(err.to_string());
            (UserContext::default_for(user_id), ContextSource::Default, warnings)
        }
    }
}

/// Context built from the twin's own stores
pub struct StoreContextProvider {
    events: Arc<dyn EventStore>,
    profiles: Arc<dyn PersonalityStore>,
    config: LearningConfig,
}

impl StoreContextProvider {
    pub fn new(events: Arc<dyn EventStore>, profiles: Arc<dyn PersonalityStore>, config: LearningConfig) -> Self {
        Self { events, profiles, config }
    }

    async fn recent_artifacts<T: serde::de::DeserializeOwned>(
        &self,
        user_id: &str,
        event_type: EventType,
    ) -> Result<Vec<T>> {
        let rows = self
            .events
            .query(user_id, &EventFilter::of_type(event_type), self.config.window(), RECENT_ARTIFACTS)
            .await?;
        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value(Value::Object(row.payload)) {
                Ok(artifact) => parsed.push(artifact),
                Err(e) => warn!("{}", TwinError::data_integrity(&row.id, "payload", e.to_string())),
            }
        }
        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl ContextProvider for StoreContextProvider {
    async fn get_smart_context(&self, user_id: &str, query: &str) -> Result<SmartContext> {
        let mut context = self.get_full_context(user_id).await?;
        let mentioned: HashSet<String> = modules_mentioned(query).into_iter().collect();
        if mentioned.is_empty() {
            return Ok(SmartContext {
                full_context: context,
                relevant_module_count: 0,
                analysis: "No module named in the query; using full context".to_string(),
            });
        }

        context.modules.retain(|m| mentioned.contains(&m.module));
        context
            .recent_insights
            .retain(|i| i.module().map_or(true, |m| mentioned.contains(m)));
        let mut names: Vec<&String> = mentioned.iter().collect();
        names.sort();
        Ok(SmartContext {
            relevant_module_count: mentioned.len(),
            analysis: format!(
                "Query touches {}",
                names.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
            full_context: context,
        })
    }

    async fn get_full_context(&self, user_id: &str) -> Result<UserContext> {
        let profile = self
            .profiles
            .get_traits(user_id)
            .await?
            .unwrap_or_else(|| PersonalityProfile::with_defaults(user_id));
        let events = self
            .events
            .query(user_id, &EventFilter::primary(), self.config.window(), self.config.window_limit)
            .await?;

        let mut activity: BTreeMap<String, ModuleActivity> = BTreeMap::new();
        for event in &events {
            let module = event.context.trim().to_lowercase();
            let entry = activity.entry(module.clone()).or_insert(ModuleActivity {
                module,
                event_count: 0,
                last_active: None,
            });
            entry.event_count += 1;
            if entry.last_active.map_or(true, |t| event.timestamp > t) {
                entry.last_active = Some(event.timestamp);
            }
        }
        let mut modules: Vec<ModuleActivity> = activity.into_values().collect();
        modules.sort_by(|a, b| b.event_count.cmp(&a.event_count).then(a.module.cmp(&b.module)));

        let recent_patterns: Vec<LearningPattern> = self.recent_artifacts(user_id, EventType::Pattern).await?;
        let recent_insights: Vec<Insight> = self.recent_artifacts(user_id, EventType::Insight).await?;

        let mut semantic_hints = Vec::new();
        if let Some(top) = modules.first() {
            semantic_hints.push(format!("Most active in {} ({} recent events)", top.module, top.event_count));
        }
        if let Some(peaks) = recent_patterns
            .iter()
            .find(|p| p.kind() == "hourly_activity")
            .and_then(|p| p.data.get("peakHours"))
            .and_then(Value::as_array)
        {
            let hours: Vec<String> = peaks
                .iter()
                .filter_map(|p| p.get("hour").and_then(Value::as_u64))
                .map(|h| format!("{:02}:00", h))
                .collect();
            if !hours.is_empty() {
                semantic_hints.push(format!("Usually active around {}", hours.join(", ")));
            }
        }

        Ok(UserContext {
            user_id: user_id.to_string(),
            traits: profile.traits,
            life_state: LifeState::from_events(&events),
            modules,
            recent_patterns,
            recent_insights,
            semantic_hints,
        })
    }
}
