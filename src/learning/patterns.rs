//! Pattern Analyzer - mines temporal, behavioral, preference and
//! communication patterns from a bounded window of recent events.
//!
//! Derivation is pure and deterministic over the window; persistence writes
//! each pattern back as a `pattern` event so the history can be replayed.

use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::store::{derived_event, to_payload, EventFilter, EventStore};
use crate::config::LearningConfig;
use crate::error::TwinError;
use crate::types::{EventType, LearningEvent, LearningPattern, Payload, PatternType};

/// Number of peak hours kept in the hourly pattern
const PEAK_HOURS: usize = 3;
/// Width of a confidence histogram bucket
const HISTOGRAM_STEP: f64 = 0.2;

pub struct PatternAnalyzer {
    store: Arc<dyn EventStore>,
    config: LearningConfig,
}

impl PatternAnalyzer {
    pub fn new(store: Arc<dyn EventStore>, config: LearningConfig) -> Self {
        Self { store, config }
    }

    /// Analyze the user's recent window and persist every emitted pattern
    pub async fn analyze_user(&self, user_id: &str) -> Result<Vec<LearningPattern>> {
        let window = self
            .store
            .query(user_id, &EventFilter::primary(), self.config.window(), self.config.window_limit)
            .await?;

        let patterns = derive_patterns(user_id, &window);
        if patterns.is_empty() {
            debug!("No events in window for {}, nothing to analyze", user_id);
            return Ok(patterns);
        }

        for pattern in &patterns {
            let mut payload = to_payload(pattern)?;
            payload.insert("validated".to_string(), Value::Bool(true));
            let event = derived_event(
                user_id,
                EventType::Pattern,
                pattern.pattern_type.as_str(),
                pattern.confidence,
                payload,
            );
            self.store.append(&event).await?;
        }

        info!("Derived {} patterns for {} from {} events", patterns.len(), user_id, window.len());
        Ok(patterns)
    }

    /// Derive patterns from the current window without persisting them
    pub async fn snapshot(&self, user_id: &str) -> Result<Vec<LearningPattern>> {
        let window = self
            .store
            .query(user_id, &EventFilter::primary(), self.config.window(), self.config.window_limit)
            .await?;
        Ok(derive_patterns(user_id, &window))
    }
}

/// Derive all patterns from a newest-first window. Empty window, empty result.
pub fn derive_patterns(user_id: &str, events: &[LearningEvent]) -> Vec<LearningPattern> {
    if events.is_empty() {
        return Vec::new();
    }
    let last_observed = events.iter().map(|e| e.timestamp).max().unwrap_or_else(Utc::now);

    let mut patterns = Vec::new();
    patterns.extend(temporal_patterns(user_id, events, last_observed));
    patterns.extend(behavioral_patterns(user_id, events, last_observed));
    patterns.extend(preference_patterns(user_id, events, last_observed));
    patterns.extend(communication_pattern(user_id, events, last_observed));
    patterns
}

fn temporal_patterns(user_id: &str, events: &[LearningEvent], last_observed: DateTime<Utc>) -> Vec<LearningPattern> {
    let total = events.len() as u32;
    let mut out = Vec::new();

    let by_hour = tally(events.iter().map(|e| e.timestamp.hour()));
    let mut ranked: Vec<(u32, u32)> = by_hour.iter().map(|(h, c)| (*h, *c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(PEAK_HOURS);
    if let Some(&(_, busiest)) = ranked.first() {
        let mut data = Payload::new();
        data.insert("kind".to_string(), json!("hourly_activity"));
        data.insert(
            "peakHours".to_string(),
            Value::Array(ranked.iter().map(|(h, c)| json!({ "hour": h, "count": c })).collect()),
        );
        data.insert("distribution".to_string(), distribution(&by_hour));
        out.push(LearningPattern::new(
            user_id,
            PatternType::Temporal,
            0.8,
            ratio(busiest, total),
            total,
            last_observed,
            data,
        ));
    }

    let by_day = tally(events.iter().map(|e| e.timestamp.weekday().num_days_from_monday()));
    if let Some((day, count)) = top(&by_day) {
        let named: BTreeMap<String, u32> = by_day
            .iter()
            .map(|(d, c)| (weekday_name(*d).to_string(), *c))
            .collect();
        let mut data = Payload::new();
        data.insert("kind".to_string(), json!("weekly_activity"));
        data.insert("peakDay".to_string(), json!(weekday_name(day)));
        data.insert("distribution".to_string(), json!(named));
        out.push(LearningPattern::new(
            user_id,
            PatternType::Temporal,
            0.7,
            ratio(count, total),
            total,
            last_observed,
            data,
        ));
    }

    out
}

fn behavioral_patterns(user_id: &str, events: &[LearningEvent], last_observed: DateTime<Utc>) -> Vec<LearningPattern> {
    let total = events.len() as u32;
    let mut out = Vec::new();

    let by_module = tally(events.iter().map(|e| module_label(&e.context)));
    if let Some((module, count)) = top(&by_module) {
        let mut data = Payload::new();
        data.insert("kind".to_string(), json!("module_usage"));
        data.insert("dominantModule".to_string(), json!(module));
        data.insert("distribution".to_string(), distribution(&by_module));
        out.push(LearningPattern::new(
            user_id,
            PatternType::Behavioral,
            0.9,
            ratio(count, total),
            total,
            last_observed,
            data,
        ));
    }

    let by_action = tally(events.iter().filter_map(read_action_type));
    let with_action: u32 = by_action.values().sum();
    if let Some((action, count)) = top(&by_action) {
        let mut data = Payload::new();
        data.insert("kind".to_string(), json!("action_types"));
        data.insert("topAction".to_string(), json!(action));
        data.insert("topCount".to_string(), json!(count));
        data.insert("actionTypes".to_string(), distribution(&by_action));
        out.push(LearningPattern::new(
            user_id,
            PatternType::Behavioral,
            0.8,
            ratio(count, with_action),
            with_action,
            last_observed,
            data,
        ));
    }

    out
}

fn preference_patterns(user_id: &str, events: &[LearningEvent], last_observed: DateTime<Utc>) -> Vec<LearningPattern> {
    let total = events.len() as u32;
    let mut out = Vec::new();

    let average = mean(events.iter().map(|e| e.confidence));
    let mut histogram = [0u32; 5];
    for event in events {
        histogram[histogram_bucket(event.confidence)] += 1;
    }
    let mut data = Payload::new();
    data.insert("kind".to_string(), json!("confidence_profile"));
    data.insert("averageConfidence".to_string(), json!(average));
    data.insert("histogram".to_string(), json!(histogram));
    out.push(LearningPattern::new(
        user_id,
        PatternType::Preference,
        0.7,
        average,
        total,
        last_observed,
        data,
    ));

    let by_impact = tally(events.iter().map(|e| e.impact.as_str().to_string()));
    if let Some((impact, count)) = top(&by_impact) {
        let mut data = Payload::new();
        data.insert("kind".to_string(), json!("impact_profile"));
        data.insert("dominantImpact".to_string(), json!(impact));
        data.insert("distribution".to_string(), distribution(&by_impact));
        out.push(LearningPattern::new(
            user_id,
            PatternType::Preference,
            0.6,
            ratio(count, total),
            total,
            last_observed,
            data,
        ));
    }

    out
}

/// Share of interactions in the window. A window without interactions has
/// nothing to measure, so no pattern is emitted rather than one with a zero
/// frequency.
fn communication_pattern(user_id: &str, events: &[LearningEvent], last_observed: DateTime<Utc>) -> Option<LearningPattern> {
    let interactions: Vec<&LearningEvent> = events
        .iter()
        .filter(|e| e.event_type == EventType::Interaction)
        .collect();
    if interactions.is_empty() {
        return None;
    }
    let count = interactions.len() as u32;
    let rate = ratio(count, events.len() as u32);

    let mut data = Payload::new();
    data.insert("kind".to_string(), json!("interaction_rate"));
    data.insert("interactionCount".to_string(), json!(count));
    data.insert("interactionRate".to_string(), json!(rate));
    data.insert(
        "averageConfidence".to_string(),
        json!(mean(interactions.iter().map(|e| e.confidence))),
    );
    Some(LearningPattern::new(
        user_id,
        PatternType::Communication,
        0.8,
        rate,
        count,
        last_observed,
        data,
    ))
}

/// `actionType` from an event payload; a present but non-string value is
/// logged and treated as absent.
fn read_action_type(event: &LearningEvent) -> Option<String> {
    match event.payload.get("actionType") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_lowercase()),
        Some(Value::String(_)) => None,
        Some(other) => {
            let err = TwinError::data_integrity(&event.id, "actionType", format!("expected string, got {}", other));
            warn!("{}", err);
            None
        }
    }
}

fn module_label(context: &str) -> String {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        "general".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

fn histogram_bucket(confidence: f64) -> usize {
    let c = crate::types::clamp_unit(confidence);
    ((c / HISTOGRAM_STEP) as usize).min(4)
}

fn weekday_name(day: u32) -> &'static str {
    match day {
        0 => "monday",
        1 => "tuesday",
        2 => "wednesday",
        3 => "thursday",
        4 => "friday",
        5 => "saturday",
        _ => "sunday",
    }
}

fn tally<K: Ord>(keys: impl Iterator<Item = K>) -> BTreeMap<K, u32> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// Highest count; ties go to the smallest key so results are deterministic
fn top<K: Ord + Clone>(counts: &BTreeMap<K, u32>) -> Option<(K, u32)> {
    let mut best: Option<(K, u32)> = None;
    for (key, count) in counts {
        match &best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((key.clone(), *count)),
        }
    }
    best
}

fn distribution<K: ToString>(counts: &BTreeMap<K, u32>) -> Value {
    let map: serde_json::Map<String, Value> = counts
        .iter()
        .map(|(k, c)| (k.to_string(), json!(c)))
        .collect();
    Value::Object(map)
}

fn ratio(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0u32), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::store::MemoryLearningStore;
    use crate::types::Impact;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        // 2026-10-19 is a Monday
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 15, 0).unwrap()
    }

    fn event(module: &str, hour: u32, confidence: f64) -> LearningEvent {
        LearningEvent::new("u1", EventType::Interaction, module, confidence).with_timestamp(at(hour))
    }

    fn sample_window() -> Vec<LearningEvent> {
        vec![
            event("calendar", 9, 0.9).with_payload("actionType", json!("schedule")),
            event("calendar", 9, 0.8).with_payload("actionType", json!("schedule")),
            event("chat", 14, 0.3).with_payload("actionType", json!("reply")),
            event("calendar", 9, 0.7).with_impact(Impact::High),
            LearningEvent::new("u1", EventType::Feedback, "drive", 0.5).with_timestamp(at(20)),
        ]
    }

    fn find<'a>(patterns: &'a [LearningPattern], kind: &str) -> &'a LearningPattern {
        patterns.iter().find(|p| p.kind() == kind).unwrap()
    }

    #[test]
    fn test_empty_window_yields_nothing() {
        assert!(derive_patterns("u1", &[]).is_empty());
    }

    #[test]
    fn test_hourly_peak() {
        let patterns = derive_patterns("u1", &sample_window());
        let hourly = find(&patterns, "hourly_activity");
        assert_eq!(hourly.confidence, 0.8);
        assert!((hourly.strength - 0.6).abs() < 1e-9);
        let peaks = hourly.data["peakHours"].as_array().unwrap();
        assert_eq!(peaks.len(), 3);
        assert_eq!(peaks[0]["hour"], json!(9));
        assert_eq!(peaks[0]["count"], json!(3));
    }

    #[test]
    fn test_weekly_peak() {
        let patterns = derive_patterns("u1", &sample_window());
        let weekly = find(&patterns, "weekly_activity");
        assert_eq!(weekly.confidence, 0.7);
        assert_eq!(weekly.text("peakDay"), "monday");
        assert_eq!(weekly.strength, 1.0);
    }

    #[test]
    fn test_module_and_action_types() {
        let patterns = derive_patterns("u1", &sample_window());
        let modules = find(&patterns, "module_usage");
        assert_eq!(modules.confidence, 0.9);
        assert_eq!(modules.text("dominantModule"), "calendar");
        assert!((modules.strength - 0.6).abs() < 1e-9);

        let actions = find(&patterns, "action_types");
        assert_eq!(actions.confidence, 0.8);
        assert_eq!(actions.frequency, 3);
        assert_eq!(actions.text("topAction"), "schedule");
        assert!((actions.strength - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_preference_profiles() {
        let patterns = derive_patterns("u1", &sample_window());
        let profile = find(&patterns, "confidence_profile");
        assert!((profile.number("averageConfidence") - 0.64).abs() < 1e-9);
        assert_eq!(profile.data["histogram"], json!([0, 1, 1, 1, 2]));

        let impact = find(&patterns, "impact_profile");
        assert_eq!(impact.confidence, 0.6);
        assert_eq!(impact.text("dominantImpact"), "medium");
        assert!((impact.strength - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_communication_rate() {
        let patterns = derive_patterns("u1", &sample_window());
        let comm = find(&patterns, "interaction_rate");
        assert_eq!(comm.frequency, 4);
        assert!((comm.strength - 0.8).abs() < 1e-9);
        assert!((comm.number("averageConfidence") - 0.675).abs() < 1e-9);
    }

    #[test]
    fn test_no_interactions_means_no_communication_pattern() {
        let window = vec![
            LearningEvent::new("u1", EventType::Feedback, "chat", 0.6).with_timestamp(at(10)),
            LearningEvent::new("u1", EventType::Correction, "drive", 0.4).with_timestamp(at(11)),
        ];
        let patterns = derive_patterns("u1", &window);
        assert!(!patterns.is_empty());
        assert!(patterns.iter().all(|p| p.pattern_type != PatternType::Communication));
        assert!(patterns.iter().all(|p| p.frequency >= 1));
    }

    #[test]
    fn test_malformed_action_type_is_skipped() {
        let window = vec![
            event("chat", 10, 0.5).with_payload("actionType", json!(42)),
            event("chat", 10, 0.5).with_payload("actionType", json!(null)),
        ];
        let patterns = derive_patterns("u1", &window);
        assert!(patterns.iter().all(|p| p.kind() != "action_types"));
    }

    #[test]
    fn test_bounds_hold_for_every_pattern() {
        let patterns = derive_patterns("u1", &sample_window());
        assert!(!patterns.is_empty());
        for p in &patterns {
            assert!((0.0..=1.0).contains(&p.strength), "{} strength", p.kind());
            assert!((0.0..=1.0).contains(&p.confidence), "{} confidence", p.kind());
            assert!(p.frequency >= 1);
        }
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let window = sample_window();
        let summarize = |ps: Vec<LearningPattern>| {
            let mut v: Vec<(String, u32, u64)> = ps
                .iter()
                .map(|p| (p.kind().to_string(), p.frequency, (p.strength * 1e9) as u64))
                .collect();
            v.sort();
            v
        };
        assert_eq!(
            summarize(derive_patterns("u1", &window)),
            summarize(derive_patterns("u1", &window))
        );
    }

    #[tokio::test]
    async fn test_analyze_user_persists_pattern_events() {
        let store = Arc::new(MemoryLearningStore::new());
        for i in 0..4 {
            let e = LearningEvent::new("u1", EventType::Interaction, "chat", 0.6)
                .with_timestamp(Utc::now() - Duration::minutes(i));
            store.append(&e).await.unwrap();
        }
        let analyzer = PatternAnalyzer::new(store.clone(), LearningConfig::default());
        let patterns = analyzer.analyze_user("u1").await.unwrap();

        let stored: Vec<LearningEvent> = store
            .events_for("u1")
            .await
            .into_iter()
            .filter(|e| e.event_type == EventType::Pattern)
            .collect();
        assert_eq!(stored.len(), patterns.len());
        assert!(stored.iter().all(|e| e.applied));
        assert!(stored.iter().all(|e| e.payload["validated"] == json!(true)));

        // pattern events never feed the next analysis
        let again = analyzer.analyze_user("u1").await.unwrap();
        assert_eq!(again.len(), patterns.len());
    }

    #[tokio::test]
    async fn test_analyze_user_without_events_writes_nothing() {
        let store = Arc::new(MemoryLearningStore::new());
        let analyzer = PatternAnalyzer::new(store.clone(), LearningConfig::default());
        assert!(analyzer.analyze_user("nobody").await.unwrap().is_empty());
        assert!(store.events_for("nobody").await.is_empty());
    }
}
