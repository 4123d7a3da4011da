//! Personality Adapter - nudges a user's trait vector from single events
//!
//! Two rule tables map the event type and the module an event happened in
//! to per-trait base deltas. Deltas from both tables are summed, scaled by
//! the event's confidence (canonical 0-1 scale, used as-is) and an impact
//! multiplier, then applied with clamping. Only changes larger than the
//! adjustment threshold are materialized.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::store::PersonalityStore;
use crate::types::{clamp_unit, trait_value, EventType, Impact, LearningEvent, PersonalityAdjustment};

/// Confidence attached to every adjustment
const ADJUSTMENT_CONFIDENCE: f64 = 0.7;

/// Modules with their own rule table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Calendar,
    Chat,
    Drive,
    Tasks,
    Analytics,
    Other,
}

impl ModuleKind {
    pub fn from_context(context: &str) -> Self {
        match context.trim().to_lowercase().as_str() {
            "calendar" | "scheduling" | "schedule" => ModuleKind::Calendar,
            "chat" | "communication" | "email" | "messages" => ModuleKind::Chat,
            "drive" | "files" | "documents" => ModuleKind::Drive,
            "tasks" | "projects" | "todo" => ModuleKind::Tasks,
            "analytics" | "dashboard" | "reports" => ModuleKind::Analytics,
            _ => ModuleKind::Other,
        }
    }
}

/// Base deltas keyed by event type
pub fn event_type_deltas(event_type: EventType) -> &'static [(&'static str, f64)] {
    match event_type {
        EventType::Interaction => &[("extraversion", 0.02), ("openness", 0.01)],
        EventType::Feedback => &[("agreeableness", 0.05), ("conscientiousness", 0.03)],
        EventType::Correction => &[("conscientiousness", 0.04), ("neuroticism", 0.03)],
        EventType::Insight => &[("openness", 0.02)],
        EventType::Pattern | EventType::Prediction => &[],
    }
}

/// Base deltas keyed by module
pub fn module_deltas(module: ModuleKind) -> &'static [(&'static str, f64)] {
    match module {
        ModuleKind::Calendar => &[("conscientiousness", 0.03)],
        ModuleKind::Chat => &[("extraversion", 0.03), ("agreeableness", 0.02)],
        ModuleKind::Drive => &[("conscientiousness", 0.02), ("openness", 0.01)],
        ModuleKind::Tasks => &[("conscientiousness", 0.04), ("neuroticism", -0.01)],
        ModuleKind::Analytics => &[("openness", 0.03)],
        ModuleKind::Other => &[],
    }
}

pub fn impact_multiplier(impact: Impact) -> f64 {
    match impact {
        Impact::Low => 0.5,
        Impact::Medium => 1.0,
        Impact::High => 1.5,
        Impact::Critical => 2.0,
    }
}

/// Event confidence is stored on the 0-1 scale and used directly
pub fn confidence_multiplier(event: &LearningEvent) -> f64 {
    clamp_unit(event.confidence)
}

/// Summed base delta per trait for an event
pub fn summed_deltas(event: &LearningEvent) -> BTreeMap<&'static str, f64> {
    let mut sums = BTreeMap::new();
    let module = ModuleKind::from_context(&event.context);
    for (name, delta) in event_type_deltas(event.event_type).iter().chain(module_deltas(module)) {
        *sums.entry(*name).or_insert(0.0) += *delta;
    }
    sums
}

/// Pure adjustment step: returns materialized adjustments and the updated trait map
pub fn compute_adjustments(
    event: &LearningEvent,
    traits: &BTreeMap<String, f64>,
    threshold: f64,
) -> (Vec<PersonalityAdjustment>, BTreeMap<String, f64>) {
    let scale = confidence_multiplier(event) * impact_multiplier(event.impact);
    let mut updated = traits.clone();
    let mut adjustments = Vec::new();

    for (name, base) in summed_deltas(event) {
        let current = trait_value(traits, name);
        let final_delta = base * scale;
        let new_value = clamp_unit(current + final_delta);
        if (new_value - current).abs() <= threshold {
            continue;
        }
        updated.insert(name.to_string(), new_value);
        adjustments.push(PersonalityAdjustment {
            trait_name: name.to_string(),
            current_value: current,
            new_value,
            confidence: ADJUSTMENT_CONFIDENCE,
            reasoning: format!(
                "{} event in '{}' moved {} by {:+.3}",
                event.event_type, event.context, name, new_value - current
            ),
            evidence: vec![
                format!("event {} ({})", event.id, event.event_type),
                format!("confidence {:.2}, impact {}", event.confidence, event.impact),
            ],
        });
    }

    (adjustments, updated)
}

pub struct PersonalityAdapter {
    store: Arc<dyn PersonalityStore>,
    threshold: f64,
}

impl PersonalityAdapter {
    pub fn new(store: Arc<dyn PersonalityStore>, threshold: f64) -> Self {
        Self { store, threshold }
    }

    /// Apply one event to the user's profile. Users without a profile are skipped.
    pub async fn adapt(&self, event: &LearningEvent) -> Result<Vec<PersonalityAdjustment>> {
        let Some(profile) = self.store.get_traits(&event.user_id).await? else {
            debug!("No personality profile for {}, skipping adaptation", event.user_id);
            return Ok(Vec::new());
        };

        let (adjustments, updated) = compute_adjustments(event, &profile.traits, self.threshold);
        if adjustments.is_empty() {
            return Ok(adjustments);
        }

        self.store.put_traits(&event.user_id, &updated, Utc::now()).await?;
        info!("Adjusted {} traits for {}", adjustments.len(), event.user_id);
        Ok(adjustments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::store::MemoryLearningStore;
    use crate::types::PersonalityProfile;

    fn find<'a>(adjustments: &'a [PersonalityAdjustment], name: &str) -> Option<&'a PersonalityAdjustment> {
        adjustments.iter().find(|a| a.trait_name == name)
    }

    #[test]
    fn test_tables_sum_per_trait() {
        let event = LearningEvent::new("u1", EventType::Correction, "tasks", 1.0);
        let sums = summed_deltas(&event);
        assert!((sums["conscientiousness"] - 0.08).abs() < 1e-9);
        assert!((sums["neuroticism"] - 0.02).abs() < 1e-9);
    }

    // Confidence 0.9 on the 0-1 scale with critical impact scales deltas by 0.9 * 2.0 = 1.8
    #[test]
    fn test_high_confidence_critical_feedback() {
        let event = LearningEvent::new("u1", EventType::Feedback, "chat", 0.9).with_impact(Impact::Critical);
        let (adjustments, updated) = compute_adjustments(&event, &BTreeMap::new(), 0.05);
        assert_eq!(adjustments.len(), 3);

        let agreeableness = find(&adjustments, "agreeableness").unwrap();
        assert_eq!(agreeableness.current_value, 0.5);
        assert!((agreeableness.new_value - 0.626).abs() < 1e-9);
        assert_eq!(agreeableness.confidence, 0.7);
        assert!((find(&adjustments, "conscientiousness").unwrap().new_value - 0.554).abs() < 1e-9);
        assert!((find(&adjustments, "extraversion").unwrap().new_value - 0.554).abs() < 1e-9);
        assert!((updated["agreeableness"] - 0.626).abs() < 1e-9);
    }

    #[test]
    fn test_medium_impact_only_materializes_large_changes() {
        let event = LearningEvent::new("u1", EventType::Feedback, "chat", 0.9);
        let (adjustments, updated) = compute_adjustments(&event, &BTreeMap::new(), 0.05);
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].trait_name, "agreeableness");
        assert!(!updated.contains_key("conscientiousness"));
    }

    #[test]
    fn test_zero_net_delta_yields_nothing() {
        let event = LearningEvent::new("u1", EventType::Pattern, "somewhere", 1.0).with_impact(Impact::Critical);
        let (adjustments, _) = compute_adjustments(&event, &BTreeMap::new(), 0.05);
        assert!(adjustments.is_empty());
    }

    #[test]
    fn test_values_clamp_at_one() {
        let mut traits = BTreeMap::new();
        traits.insert("agreeableness".to_string(), 0.98);
        let event = LearningEvent::new("u1", EventType::Feedback, "chat", 1.0).with_impact(Impact::Critical);
        let (adjustments, _) = compute_adjustments(&event, &traits, 0.0);
        assert_eq!(find(&adjustments, "agreeableness").unwrap().new_value, 1.0);
    }

    #[tokio::test]
    async fn test_adapt_persists_only_when_adjusted() {
        let store = Arc::new(MemoryLearningStore::new());
        let profile = PersonalityProfile::with_defaults("u1");
        let before = profile.last_updated;
        store.set_profile(profile).await;
        let adapter = PersonalityAdapter::new(store.clone(), 0.05);

        let quiet = LearningEvent::new("u1", EventType::Prediction, "other", 1.0);
        assert!(adapter.adapt(&quiet).await.unwrap().is_empty());
        assert_eq!(store.get_traits("u1").await.unwrap().unwrap().last_updated, before);

        let loud = LearningEvent::new("u1", EventType::Feedback, "chat", 0.9).with_impact(Impact::Critical);
        assert_eq!(adapter.adapt(&loud).await.unwrap().len(), 3);
        let saved = store.get_traits("u1").await.unwrap().unwrap();
        assert!((saved.get("agreeableness") - 0.626).abs() < 1e-9);
        assert!(saved.last_updated >= before);
    }

    #[tokio::test]
    async fn test_missing_profile_returns_no_adjustments() {
        let store = Arc::new(MemoryLearningStore::new());
        let adapter = PersonalityAdapter::new(store.clone(), 0.05);
        let event = LearningEvent::new("ghost", EventType::Feedback, "chat", 1.0).with_impact(Impact::Critical);
        assert!(adapter.adapt(&event).await.unwrap().is_empty());
        assert!(store.get_traits("ghost").await.unwrap().is_none());
    }
}
