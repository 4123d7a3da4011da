//! Learning engine - runs the derivation pipeline for each triggering event
//!
//! persist -> patterns -> predictions + insights -> personality -> central sink,
//! then the event is marked applied. A failing stage stops the pipeline and
//! leaves the event unapplied; the event itself stays persisted.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::PatternCache;
use super::insights::InsightDetector;
use super::patterns::PatternAnalyzer;
use super::personality::PersonalityAdapter;
use super::predictions::PredictionGenerator;
use super::store::{EventStore, PersonalityStore};
use crate::config::TwinConfig;
use crate::error::TwinError;
use crate::types::{
    normalize_confidence, EventType, Insight, LearningEvent, LearningPattern, PersonalityAdjustment, Prediction,
};

/// Summary forwarded to a platform-wide learning service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSummary {
    pub user_id: String,
    pub event_id: String,
    pub event_type: EventType,
    pub module: String,
    pub pattern_count: usize,
    pub prediction_count: usize,
    pub insight_count: usize,
    pub adjustments: Vec<PersonalityAdjustment>,
}

/// Receiver for per-event learning summaries (the centralized learning feed)
#[async_trait::async_trait]
pub trait CentralLearningSink: Send + Sync {
    async fn submit(&self, summary: &LearningSummary) -> Result<()>;
}

/// Everything one event produced
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    pub event_id: String,
    pub patterns: Vec<LearningPattern>,
    pub predictions: Vec<Prediction>,
    pub insights: Vec<Insight>,
    pub adjustments: Vec<PersonalityAdjustment>,
    pub applied: bool,
    pub warnings: Vec<String>,
}

pub struct LearningEngine {
    events: Arc<dyn EventStore>,
    analyzer: PatternAnalyzer,
    predictions: PredictionGenerator,
    insights: InsightDetector,
    personality: PersonalityAdapter,
    cache: PatternCache,
    central: Option<Arc<dyn CentralLearningSink>>,
}

impl LearningEngine {
    pub fn new(events: Arc<dyn EventStore>, profiles: Arc<dyn PersonalityStore>, config: &TwinConfig) -> Self {
        Self {
            analyzer: PatternAnalyzer::new(events.clone(), config.learning.clone()),
            predictions: PredictionGenerator::new(events.clone()),
            insights: InsightDetector::new(events.clone()),
            personality: PersonalityAdapter::new(profiles, config.learning.adjustment_threshold),
            cache: PatternCache::from_config(&config.cache),
            central: None,
            events,
        }
    }

    pub fn with_central_sink(mut self, sink: Arc<dyn CentralLearningSink>) -> Self {
        self.central = Some(sink);
        self
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.events.clone()
    }

    pub fn cache(&self) -> &PatternCache {
        &self.cache
    }

    /// Persist an event and run the derivation pipeline over it.
    ///
    /// Errors only when the event is invalid or cannot be persisted. Later
    /// stage failures are reported through `warnings` with `applied = false`.
    pub async fn process_event(&self, mut event: LearningEvent) -> Result<ProcessingOutcome> {
        if event.user_id.trim().is_empty() {
            return Err(TwinError::validation("learning event has no user id").into());
        }
        event.confidence = normalize_confidence(event.confidence);
        event.applied = false;
        self.events.append(&event).await?;

        let mut outcome = ProcessingOutcome {
            event_id: event.id.clone(),
            ..Default::default()
        };

        match self.derive(&event, &mut outcome).await {
            Ok(()) => match self.events.mark_applied(&event.id).await {
                Ok(()) => outcome.applied = true,
                Err(e) => {
                    warn!("Could not mark event {} applied: {:#}", event.id, e);
                    outcome.warnings.push(format!("mark applied failed: {}", e));
                }
            },
            Err(e) => {
                let err = TwinError::provider("learning pipeline", &e);
                warn!("{} (event {})", err, event.id);
                outcome.warnings.push(err.to_string());
            }
        }

        info!(
            "Processed {} event {} for {}: {} patterns, {} predictions, {} insights, {} adjustments",
            event.event_type,
            event.id,
            event.user_id,
            outcome.patterns.len(),
            outcome.predictions.len(),
            outcome.insights.len(),
            outcome.adjustments.len()
        );
        Ok(outcome)
    }

    async fn derive(&self, event: &LearningEvent, outcome: &mut ProcessingOutcome) -> Result<()> {
        let patterns = self.analyzer.analyze_user(&event.user_id).await?;
        // new pattern rows replace whatever was cached
        self.cache.insert(&event.user_id, patterns.clone()).await;
        outcome.patterns = patterns;

        outcome.predictions = self.predictions.generate(event, &outcome.patterns).await?;
        outcome.insights = self.insights.detect(event, &outcome.patterns).await?;
        outcome.adjustments = self.personality.adapt(event).await?;

        if let Some(sink) = &self.central {
            let summary = LearningSummary {
                user_id: event.user_id.clone(),
                event_id: event.id.clone(),
                event_type: event.event_type,
                module: event.context.clone(),
                pattern_count: outcome.patterns.len(),
                prediction_count: outcome.predictions.len(),
                insight_count: outcome.insights.len(),
                adjustments: outcome.adjustments.clone(),
            };
            sink.submit(&summary).await?;
            debug!("Submitted learning summary for event {}", event.id);
        }
        Ok(())
    }

    /// Current patterns for a user, computed from the event window on a cache miss
    pub async fn patterns_for(&self, user_id: &str) -> Result<Vec<LearningPattern>> {
        self.cache
            .get_or_compute(user_id, || self.analyzer.snapshot(user_id))
            .await
    }
}
