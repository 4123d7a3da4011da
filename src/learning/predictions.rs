//! Prediction Generator - turns patterns into time-bounded forecasts
//!
//! Every qualifying pattern yields its own prediction, so several
//! predictions of the same type can coexist.

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::store::{derived_event, to_payload, EventStore};
use crate::types::{EventType, LearningEvent, LearningPattern, Payload, PatternType, Prediction, Timeframe};

pub struct PredictionGenerator {
    store: Arc<dyn EventStore>,
}

impl PredictionGenerator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Derive predictions for the triggering event and persist them
    pub async fn generate(&self, event: &LearningEvent, patterns: &[LearningPattern]) -> Result<Vec<Prediction>> {
        let predictions = derive_predictions(&event.user_id, patterns, event.timestamp);
        for prediction in &predictions {
            let payload = to_payload(prediction)?;
            let record = derived_event(
                &event.user_id,
                EventType::Prediction,
                &prediction.prediction_type,
                prediction.confidence,
                payload,
            );
            self.store.append(&record).await?;
        }
        debug!("Generated {} predictions for {}", predictions.len(), event.user_id);
        Ok(predictions)
    }
}

/// Pure derivation. `now` anchors the "next peak hour" lookup.
pub fn derive_predictions(user_id: &str, patterns: &[LearningPattern], now: DateTime<Utc>) -> Vec<Prediction> {
    patterns
        .iter()
        .filter_map(|pattern| match pattern.pattern_type {
            PatternType::Behavioral => predict_next_action(user_id, pattern),
            PatternType::Preference => predict_confidence_level(user_id, pattern),
            PatternType::Temporal => predict_peak_hour(user_id, pattern, now),
            PatternType::Communication => predict_interaction_rate(user_id, pattern),
            PatternType::Decision => None,
        })
        .collect()
}

fn predict_next_action(user_id: &str, pattern: &LearningPattern) -> Option<Prediction> {
    let Some(Value::Object(histogram)) = pattern.data.get("actionTypes") else {
        return None;
    };
    let (action, count) = histogram
        .iter()
        .filter_map(|(k, v)| v.as_u64().map(|c| (k.clone(), c)))
        .fold(None, |best: Option<(String, u64)>, (k, c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((k, c)),
        })?;
    let probability = count as f64 / pattern.frequency as f64;

    let mut data = source(pattern);
    data.insert("action".to_string(), json!(action));
    data.insert("count".to_string(), json!(count));
    Some(Prediction::new(
        user_id,
        "next_action",
        pattern.confidence * 0.8,
        probability,
        Timeframe::ShortTerm,
        format!("Next likely action: {} ({:.0}% of recent actions)", action, probability * 100.0),
        data,
    ))
}

fn predict_confidence_level(user_id: &str, pattern: &LearningPattern) -> Option<Prediction> {
    let average = pattern.data.get("averageConfidence")?.as_f64()?;
    let mut data = source(pattern);
    data.insert("expectedConfidence".to_string(), json!(average));
    Some(Prediction::new(
        user_id,
        "confidence_level",
        pattern.confidence * 0.7,
        average,
        Timeframe::LongTerm,
        format!("Expected confidence level around {:.2}", average),
        data,
    ))
}

fn predict_peak_hour(user_id: &str, pattern: &LearningPattern, now: DateTime<Utc>) -> Option<Prediction> {
    let peaks: Vec<(u32, u64)> = pattern
        .data
        .get("peakHours")?
        .as_array()?
        .iter()
        .filter_map(|p| {
            let hour = p.get("hour")?.as_u64()?;
            let count = p.get("count")?.as_u64()?;
            (hour < 24).then_some((hour as u32, count))
        })
        .collect();
    let &(top_hour, top_count) = peaks.first()?;

    let current = now.hour();
    let next_hour = peaks
        .iter()
        .map(|(h, _)| *h)
        .min_by_key(|h| (h + 24 - current - 1) % 24)
        .unwrap_or(top_hour);
    let probability = top_count as f64 / pattern.frequency as f64;

    let mut data = source(pattern);
    data.insert("hour".to_string(), json!(next_hour));
    data.insert("topHour".to_string(), json!(top_hour));
    Some(Prediction::new(
        user_id,
        "peak_hour",
        pattern.confidence * 0.6,
        probability,
        Timeframe::Immediate,
        format!("Next peak activity expected around {:02}:00 UTC", next_hour),
        data,
    ))
}

fn predict_interaction_rate(user_id: &str, pattern: &LearningPattern) -> Option<Prediction> {
    let rate = pattern.data.get("interactionRate")?.as_f64()?;
    let mut data = source(pattern);
    data.insert("expectedRate".to_string(), json!(rate));
    Some(Prediction::new(
        user_id,
        "interaction_rate",
        pattern.confidence * 0.8,
        rate,
        Timeframe::ShortTerm,
        format!("Expected interaction rate around {:.0}%", rate * 100.0),
        data,
    ))
}

fn source(pattern: &LearningPattern) -> Payload {
    let mut data = Payload::new();
    data.insert("patternId".to_string(), json!(pattern.id));
    data.insert("patternKind".to_string(), json!(pattern.kind()));
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::patterns::derive_patterns;
    use crate::learning::store::MemoryLearningStore;
    use chrono::{Duration, TimeZone};

    fn window() -> Vec<LearningEvent> {
        let base = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        vec![
            LearningEvent::new("u1", EventType::Interaction, "calendar", 0.9)
                .with_timestamp(base)
                .with_payload("actionType", json!("schedule")),
            LearningEvent::new("u1", EventType::Interaction, "calendar", 0.7)
                .with_timestamp(base + Duration::hours(5))
                .with_payload("actionType", json!("schedule")),
            LearningEvent::new("u1", EventType::Feedback, "chat", 0.5)
                .with_timestamp(base + Duration::minutes(10))
                .with_payload("actionType", json!("reply")),
        ]
    }

    fn by_type<'a>(predictions: &'a [Prediction], t: &str) -> Vec<&'a Prediction> {
        predictions.iter().filter(|p| p.prediction_type == t).collect()
    }

    #[test]
    fn test_next_action_prediction() {
        let patterns = derive_patterns("u1", &window());
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let predictions = derive_predictions("u1", &patterns, now);
        let next = by_type(&predictions, "next_action");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].data["action"], json!("schedule"));
        assert!((next[0].probability - 2.0 / 3.0).abs() < 1e-9);
        assert!((next[0].confidence - 0.64).abs() < 1e-9);
        assert_eq!(next[0].timeframe, Timeframe::ShortTerm);
        assert!(!next[0].validated);
    }

    #[test]
    fn test_peak_hour_picks_next_upcoming() {
        let patterns = derive_patterns("u1", &window());
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let predictions = derive_predictions("u1", &patterns, now);
        let peak = by_type(&predictions, "peak_hour");
        assert_eq!(peak.len(), 1);
        // peaks at 09 (2 events) and 14 (1 event); after 12:00 the next is 14
        assert_eq!(peak[0].data["hour"], json!(14));
        assert_eq!(peak[0].data["topHour"], json!(9));
        assert!((peak[0].probability - 2.0 / 3.0).abs() < 1e-9);
        assert!((peak[0].confidence - 0.48).abs() < 1e-9);
        assert_eq!(peak[0].timeframe, Timeframe::Immediate);
        assert_eq!(peak[0].expires_at - peak[0].created_at, Duration::hours(24));
    }

    #[test]
    fn test_long_term_confidence_prediction() {
        let patterns = derive_patterns("u1", &window());
        let predictions = derive_predictions("u1", &patterns, Utc::now());
        let level = by_type(&predictions, "confidence_level");
        assert_eq!(level.len(), 1);
        assert!((level[0].confidence - 0.49).abs() < 1e-9);
        assert_eq!(level[0].expires_at - level[0].created_at, Duration::days(7));
    }

    #[test]
    fn test_every_prediction_expires_after_creation() {
        let patterns = derive_patterns("u1", &window());
        let predictions = derive_predictions("u1", &patterns, Utc::now());
        assert!(predictions.len() >= 4);
        for p in &predictions {
            assert!(p.expires_at > p.created_at);
            assert!((0.0..=1.0).contains(&p.probability));
        }
    }

    #[test]
    fn test_patterns_without_expected_fields_are_skipped() {
        let bare = LearningPattern::new("u1", PatternType::Temporal, 0.8, 0.5, 3, Utc::now(), Payload::new());
        assert!(derive_predictions("u1", &[bare], Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_generate_persists_unvalidated_prediction_events() {
        let store = Arc::new(MemoryLearningStore::new());
        let generator = PredictionGenerator::new(store.clone());
        let trigger = LearningEvent::new("u1", EventType::Interaction, "calendar", 0.8);
        let patterns = derive_patterns("u1", &window());
        let predictions = generator.generate(&trigger, &patterns).await.unwrap();
        let stored: Vec<_> = store
            .events_for("u1")
            .await
            .into_iter()
            .filter(|e| e.event_type == EventType::Prediction)
            .collect();
        assert_eq!(stored.len(), predictions.len());
        assert!(stored.iter().all(|e| e.payload["validated"] == json!(false)));
    }
}
