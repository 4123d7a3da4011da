//! Insight Detector - compares a live event against the user's patterns
//!
//! Detects behavior changes, preference shifts, emerging patterns and
//! anomalies. Anomalies use a per-pattern-type pair of accessors: one for
//! the value the pattern expects, one for the value the event shows.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::store::{derived_event, to_payload, EventStore};
use crate::types::{EventType, Insight, InsightType, LearningEvent, LearningPattern, Payload, PatternType};

const PREFERENCE_SHIFT_THRESHOLD: f64 = 0.2;
const ANOMALY_THRESHOLD: f64 = 0.3;
const EMERGENCE_MIN_CONFIDENCE: f64 = 0.8;
const EMERGENCE_MIN_STRENGTH: f64 = 0.6;

pub struct InsightDetector {
    store: Arc<dyn EventStore>,
}

impl InsightDetector {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Detect insights for the triggering event and persist them
    pub async fn detect(&self, event: &LearningEvent, patterns: &[LearningPattern]) -> Result<Vec<Insight>> {
        let insights = detect_insights(event, patterns);
        for insight in &insights {
            let payload = to_payload(insight)?;
            let record = derived_event(
                &event.user_id,
                EventType::Insight,
                insight.insight_type.as_str(),
                insight.confidence,
                payload,
            );
            self.store.append(&record).await?;
        }
        debug!("Detected {} insights for {}", insights.len(), event.user_id);
        Ok(insights)
    }
}

/// Pure detection over a pattern set
pub fn detect_insights(event: &LearningEvent, patterns: &[LearningPattern]) -> Vec<Insight> {
    let mut insights = Vec::new();
    insights.extend(behavior_change(event, patterns));
    insights.extend(preference_shift(event, patterns));
    insights.extend(patterns.iter().filter_map(|p| pattern_emergence(event, p)));
    insights.extend(patterns.iter().filter_map(|p| anomaly(event, p)));
    insights
}

/// Module-usage pattern with the highest confidence, then strength
fn most_relevant_module_pattern(patterns: &[LearningPattern]) -> Option<&LearningPattern> {
    patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::Behavioral && p.kind() == "module_usage")
        .max_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then(a.strength.total_cmp(&b.strength))
        })
}

fn behavior_change(event: &LearningEvent, patterns: &[LearningPattern]) -> Option<Insight> {
    let pattern = most_relevant_module_pattern(patterns)?;
    let dominant = pattern.text("dominantModule");
    let current = event.context.trim().to_lowercase();
    if dominant.is_empty() || current.is_empty() || dominant == current {
        return None;
    }

    let mut data = base_data(event, pattern);
    data.insert("previousModule".to_string(), json!(dominant));
    data.insert("currentModule".to_string(), json!(current));
    Some(Insight::new(
        &event.user_id,
        InsightType::BehaviorChange,
        0.8,
        0.7,
        format!("Activity moved from {} to {}", dominant, current),
        vec![
            "Surface shortcuts for the newly used module".to_string(),
            "Check whether the usual workflow still fits".to_string(),
        ],
        data,
    ))
}

fn preference_shift(event: &LearningEvent, patterns: &[LearningPattern]) -> Option<Insight> {
    let pattern = patterns
        .iter()
        .find(|p| p.pattern_type == PatternType::Preference && p.kind() == "confidence_profile")?;
    let average = pattern.number("averageConfidence");
    let shift = event.confidence - average;
    if shift.abs() <= PREFERENCE_SHIFT_THRESHOLD {
        return None;
    }

    let mut data = base_data(event, pattern);
    data.insert("averageConfidence".to_string(), json!(average));
    data.insert("eventConfidence".to_string(), json!(event.confidence));
    data.insert("shift".to_string(), json!(shift));
    Some(Insight::new(
        &event.user_id,
        InsightType::PreferenceShift,
        0.7,
        0.6,
        format!(
            "Confidence {} from the usual {:.2} to {:.2}",
            if shift > 0.0 { "rose" } else { "dropped" },
            average,
            event.confidence
        ),
        vec![
            "Revisit defaults that were tuned to the old preference".to_string(),
            "Ask for explicit feedback on the next suggestion".to_string(),
        ],
        data,
    ))
}

fn pattern_emergence(event: &LearningEvent, pattern: &LearningPattern) -> Option<Insight> {
    if pattern.confidence <= EMERGENCE_MIN_CONFIDENCE || pattern.strength <= EMERGENCE_MIN_STRENGTH {
        return None;
    }
    let data = base_data(event, pattern);
    Some(Insight::new(
        &event.user_id,
        InsightType::PatternEmergence,
        pattern.confidence,
        pattern.strength,
        format!("A strong {} pattern ({}) has emerged", pattern.pattern_type, pattern.kind()),
        vec!["Automate or pre-fill the recurring step".to_string()],
        data,
    ))
}

/// Value the pattern expects for this event
fn expected_value(pattern: &LearningPattern, event: &LearningEvent) -> Option<f64> {
    match pattern.pattern_type {
        PatternType::Preference if pattern.kind() == "confidence_profile" => {
            Some(pattern.number("averageConfidence"))
        }
        PatternType::Behavioral if pattern.kind() == "action_types" => {
            let action = event.action_type()?.trim().to_lowercase();
            let count = pattern
                .data
                .get("actionTypes")
                .and_then(|h| h.get(action.as_str()))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some(count / pattern.frequency as f64)
        }
        _ => None,
    }
}

/// Value the event actually shows
fn actual_value(pattern: &LearningPattern, event: &LearningEvent) -> Option<f64> {
    match pattern.pattern_type {
        PatternType::Preference if pattern.kind() == "confidence_profile" => Some(event.confidence),
        // the action occurred
        PatternType::Behavioral if pattern.kind() == "action_types" => Some(1.0),
        _ => None,
    }
}

fn anomaly(event: &LearningEvent, pattern: &LearningPattern) -> Option<Insight> {
    let expected = expected_value(pattern, event)?;
    let actual = actual_value(pattern, event)?;
    let deviation = (actual - expected).abs();
    if deviation <= ANOMALY_THRESHOLD {
        return None;
    }

    let mut data = base_data(event, pattern);
    data.insert("expected".to_string(), json!(expected));
    data.insert("actual".to_string(), json!(actual));
    data.insert("deviation".to_string(), json!(deviation));
    Some(Insight::new(
        &event.user_id,
        InsightType::AnomalyDetection,
        0.9,
        0.8,
        format!(
            "Unusual {} activity: expected {:.2}, observed {:.2}",
            pattern.pattern_type, expected, actual
        ),
        vec![
            "Confirm the activity was intentional".to_string(),
            "Hold back autonomous actions until the pattern settles".to_string(),
        ],
        data,
    ))
}

fn base_data(event: &LearningEvent, pattern: &LearningPattern) -> Payload {
    let mut data = Payload::new();
    data.insert("module".to_string(), json!(event.context.trim().to_lowercase()));
    data.insert("eventId".to_string(), json!(event.id));
    data.insert("patternId".to_string(), json!(pattern.id));
    data.insert("patternKind".to_string(), json!(pattern.kind()));
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::store::MemoryLearningStore;
    use chrono::Utc;

    fn pattern(pattern_type: PatternType, confidence: f64, strength: f64, frequency: u32, data: Value) -> LearningPattern {
        let Value::Object(map) = data else { panic!("object expected") };
        LearningPattern::new("u1", pattern_type, confidence, strength, frequency, Utc::now(), map)
    }

    fn module_usage(dominant: &str, strength: f64) -> LearningPattern {
        pattern(PatternType::Behavioral, 0.9, strength, 10, json!({"kind": "module_usage", "dominantModule": dominant}))
    }

    fn confidence_profile(average: f64) -> LearningPattern {
        pattern(PatternType::Preference, 0.7, average, 10, json!({"kind": "confidence_profile", "averageConfidence": average}))
    }

    fn of_type(insights: &[Insight], t: InsightType) -> Vec<&Insight> {
        insights.iter().filter(|i| i.insight_type == t).collect()
    }

    #[test]
    fn test_behavior_change_names_both_modules() {
        let event = LearningEvent::new("u1", EventType::Interaction, "Drive", 0.5);
        let insights = detect_insights(&event, &[module_usage("calendar", 0.5)]);
        let change = of_type(&insights, InsightType::BehaviorChange);
        assert_eq!(change.len(), 1);
        assert_eq!(change[0].confidence, 0.8);
        assert_eq!(change[0].significance, 0.7);
        assert_eq!(change[0].recommendations.len(), 2);
        assert_eq!(change[0].data["previousModule"], json!("calendar"));
        assert_eq!(change[0].data["currentModule"], json!("drive"));
    }

    #[test]
    fn test_same_module_is_not_a_change() {
        let event = LearningEvent::new("u1", EventType::Interaction, "calendar", 0.5);
        let insights = detect_insights(&event, &[module_usage("calendar", 0.5)]);
        assert!(of_type(&insights, InsightType::BehaviorChange).is_empty());
    }

    #[test]
    fn test_preference_shift_threshold() {
        let event = LearningEvent::new("u1", EventType::Feedback, "chat", 0.75);
        let insights = detect_insights(&event, &[confidence_profile(0.5)]);
        assert_eq!(of_type(&insights, InsightType::PreferenceShift).len(), 1);
        // 0.25 deviation is a shift but not an anomaly
        assert!(of_type(&insights, InsightType::AnomalyDetection).is_empty());

        let event = LearningEvent::new("u1", EventType::Feedback, "chat", 0.6);
        let insights = detect_insights(&event, &[confidence_profile(0.5)]);
        assert!(of_type(&insights, InsightType::PreferenceShift).is_empty());
    }

    #[test]
    fn test_emergence_requires_both_bounds() {
        let event = LearningEvent::new("u1", EventType::Interaction, "calendar", 0.5);
        let strong = module_usage("calendar", 0.7);
        let weak = module_usage("calendar", 0.6);
        let insights = detect_insights(&event, &[strong.clone()]);
        let emergence = of_type(&insights, InsightType::PatternEmergence);
        assert_eq!(emergence.len(), 1);
        assert_eq!(emergence[0].confidence, 0.9);
        assert_eq!(emergence[0].significance, 0.7);
        assert!(of_type(&detect_insights(&event, &[weak]), InsightType::PatternEmergence).is_empty());
    }

    #[test]
    fn test_preference_anomaly() {
        let event = LearningEvent::new("u1", EventType::Feedback, "chat", 0.95);
        let insights = detect_insights(&event, &[confidence_profile(0.4)]);
        let anomalies = of_type(&insights, InsightType::AnomalyDetection);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].confidence, 0.9);
        assert_eq!(anomalies[0].significance, 0.8);
    }

    #[test]
    fn test_rare_action_is_anomalous() {
        let actions = pattern(
            PatternType::Behavioral,
            0.8,
            0.9,
            10,
            json!({"kind": "action_types", "actionTypes": {"schedule": 9, "delete": 1}}),
        );
        let rare = LearningEvent::new("u1", EventType::Interaction, "drive", 0.5).with_payload("actionType", json!("delete"));
        assert_eq!(of_type(&detect_insights(&rare, &[actions.clone()]), InsightType::AnomalyDetection).len(), 1);

        let usual = LearningEvent::new("u1", EventType::Interaction, "calendar", 0.5).with_payload("actionType", json!("schedule"));
        assert!(of_type(&detect_insights(&usual, &[actions.clone()]), InsightType::AnomalyDetection).is_empty());

        let unlabeled = LearningEvent::new("u1", EventType::Interaction, "calendar", 0.5);
        assert!(of_type(&detect_insights(&unlabeled, &[actions]), InsightType::AnomalyDetection).is_empty());
    }

    #[tokio::test]
    async fn test_detect_persists_insight_events() {
        let store = Arc::new(MemoryLearningStore::new());
        let detector = InsightDetector::new(store.clone());
        let event = LearningEvent::new("u1", EventType::Interaction, "drive", 0.95);
        let insights = detector
            .detect(&event, &[module_usage("calendar", 0.7), confidence_profile(0.4)])
            .await
            .unwrap();
        assert!(!insights.is_empty());
        let stored = store
            .events_for("u1")
            .await
            .into_iter()
            .filter(|e| e.event_type == EventType::Insight)
            .count();
        assert_eq!(stored, insights.len());
    }
}
