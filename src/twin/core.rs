//! Digital Twin Core - the per-query pipeline
//!
//! ReceivedQuery -> ContextAssembled -> QueryAnalyzed -> ResponseGenerated
//! -> ActionsDetermined -> Finalized. Only missing required input ends in
//! FailedFallback; every collaborator failure after that degrades a single
//! field of the response and is recorded as a warning.

use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::actions::{ActionPlanner, ActionSink, LifeTwinAction};
use super::autonomy::{load_settings, AutonomySettingsStore, AutonomyThresholds};
use super::classifier::{tokens, KeywordClassifier, QueryClassifier};
use super::connections::detect_connections;
use super::context::{assemble_context, ContextProvider, UserContext};
use super::facts::{FactExtractionQueue, FactJob};
use super::providers::{build_prompt, select_provider, GenerationOptions, ProviderSet};
use super::query::{LifeTwinQuery, LifeTwinResponse, PipelineStage, QueryAnalysis, ResponseMetadata};
use crate::error::TwinError;
use crate::learning::LearningEngine;
use crate::types::{clamp_unit, normalize_confidence, EventType, Insight, LearningEvent};

/// Confidence of the canned response for invalid input
pub const FALLBACK_CONFIDENCE: f64 = 0.3;
/// Confidence when text generation failed and a template answered instead
pub const DEGRADED_CONFIDENCE: f64 = 0.4;
const MAX_INSIGHTS: usize = 3;
const BASE_ALIGNMENT: f64 = 0.5;
/// Trait level above which a trait counts as pronounced
const PRONOUNCED_TRAIT: f64 = 0.6;

const FALLBACK_RESPONSE: &str =
    "I'm sorry, I couldn't process that request. Please include your question and try again.";

/// Bonus per pronounced trait when the response reads in its style
const ALIGNMENT_BONUSES: &[(&str, f64, &[&str])] = &[
    ("openness", 0.1, &["idea", "explore", "alternative", "consider", "new"]),
    ("conscientiousness", 0.15, &["plan", "schedule", "step", "deadline", "organize", "priorit"]),
    ("extraversion", 0.1, &["team", "meet", "share", "together", "call"]),
    ("agreeableness", 0.1, &["please", "thank", "happy to", "glad"]),
    ("neuroticism", 0.1, &["don't worry", "no rush", "calm", "reassur"]),
];

pub struct DigitalTwinCore {
    engine: Arc<LearningEngine>,
    context: Arc<dyn ContextProvider>,
    classifier: Box<dyn QueryClassifier>,
    providers: ProviderSet,
    autonomy: Arc<dyn AutonomySettingsStore>,
    planner: ActionPlanner,
    sinks: Vec<Arc<dyn ActionSink>>,
    facts: Option<FactExtractionQueue>,
    options: GenerationOptions,
}

impl DigitalTwinCore {
    pub fn new(
        engine: Arc<LearningEngine>,
        context: Arc<dyn ContextProvider>,
        providers: ProviderSet,
        autonomy: Arc<dyn AutonomySettingsStore>,
        thresholds: AutonomyThresholds,
    ) -> Self {
        Self {
            engine,
            context,
            classifier: Box::new(KeywordClassifier),
            providers,
            autonomy,
            planner: ActionPlanner::new(thresholds),
            sinks: Vec::new(),
            facts: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_action_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_fact_queue(mut self, queue: FactExtractionQueue) -> Self {
        self.facts = Some(queue);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Answer a query as the user's digital twin. Never fails: invalid input
    /// yields a low-confidence apology, collaborator failures degrade fields.
    pub async fn process_as_digital_twin(&self, query: LifeTwinQuery) -> LifeTwinResponse {
        let started = Instant::now();
        if let Err(e) = query.validate() {
            warn!("Rejecting query: {}", e);
            return fallback_response(&e, started);
        }

        let mut meta = ResponseMetadata::default();
        let user_id = query.user_id.as_str();

        // context
        let (context, source, warnings) = assemble_context(self.context.as_ref(), user_id, &query.query).await;
        meta.context_source = Some(source);
        meta.warnings.extend(warnings);
        meta.stage = PipelineStage::ContextAssembled;

        // analysis
        let patterns = match self.engine.patterns_for(user_id).await {
            Ok(patterns) => patterns,
            Err(e) => {
                degrade(&mut meta, TwinError::provider("patterns", &e));
                Vec::new()
            }
        };
        let analysis = self.classifier.classify(&query, &patterns);
        meta.query_type = Some(analysis.query_type);
        meta.scope = Some(analysis.scope.clone());
        meta.urgency = Some(analysis.urgency);
        meta.complexity = Some(analysis.complexity);
        meta.stage = PipelineStage::QueryAnalyzed;
        debug!(
            "Query for {} classified as {} ({:?} complexity, {} urgency)",
            user_id, analysis.query_type, analysis.complexity, analysis.urgency
        );

        // response
        let route = select_provider(&query.query, analysis.complexity);
        meta.provider = Some(route);
        let request = build_prompt(&query, &analysis, &context);
        let (response, confidence, reasoning) =
            match self.providers.get(route).process(&request, &context, &self.options).await {
                Ok(generated) => (
                    generated.response,
                    normalize_confidence(generated.confidence),
                    generated.reasoning,
                ),
                Err(e) => {
                    degrade(&mut meta, TwinError::provider("text generation", &e));
                    (
                        degraded_response(&analysis, &context),
                        DEGRADED_CONFIDENCE,
                        "Text generation unavailable; answered from stored context".to_string(),
                    )
                }
            };
        meta.stage = PipelineStage::ResponseGenerated;

        // actions
        let (settings, warning) = load_settings(self.autonomy.as_ref(), user_id).await;
        meta.warnings.extend(warning);
        let actions = self.planner.determine_actions(&query, &analysis, &settings);
        self.emit_actions(user_id, &actions, &mut meta).await;
        meta.stage = PipelineStage::ActionsDetermined;

        let cross_module_connections = detect_connections(&analysis, &actions, &patterns);
        let insights = relevant_insights(&context.recent_insights, &query);
        let personality_alignment = personality_alignment(&context, &response);

        // feedback loop, awaited before responding
        let event = feedback_event(&query, &analysis, confidence, actions.len());
        match self.engine.process_event(event).await {
            Ok(outcome) => {
                meta.feedback_event_id = Some(outcome.event_id);
                meta.warnings.extend(outcome.warnings);
            }
            Err(e) => degrade(&mut meta, TwinError::provider("feedback", &e)),
        }

        if let Some(queue) = &self.facts {
            queue.enqueue(FactJob {
                user_id: user_id.to_string(),
                module: analysis.scope.primary().to_string(),
                query: query.query.clone(),
                response: response.clone(),
                created_at: Utc::now(),
            });
        }

        meta.stage = PipelineStage::Finalized;
        meta.processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Answered {} query for {} via {} in {}ms ({} actions, {} warnings)",
            analysis.query_type,
            user_id,
            route.as_str(),
            meta.processing_time_ms,
            actions.len(),
            meta.warnings.len()
        );

        LifeTwinResponse {
            response,
            confidence,
            actions,
            insights,
            reasoning,
            personality_alignment,
            cross_module_connections,
            metadata: meta,
        }
    }

    async fn emit_actions(&self, user_id: &str, actions: &[LifeTwinAction], meta: &mut ResponseMetadata) {
        for sink in &self.sinks {
            for action in actions {
                if let Err(e) = sink.emit(user_id, action).await {
                    degrade(meta, TwinError::provider("action sink", &e));
                }
            }
        }
    }
}

fn degrade(meta: &mut ResponseMetadata, err: TwinError) {
    warn!("{}", err);
    meta.warnings.push(err.to_string());
}

fn fallback_response(err: &TwinError, started: Instant) -> LifeTwinResponse {
    LifeTwinResponse {
        response: FALLBACK_RESPONSE.to_string(),
        confidence: FALLBACK_CONFIDENCE,
        actions: Vec::new(),
        insights: Vec::new(),
        reasoning: err.to_string(),
        personality_alignment: BASE_ALIGNMENT,
        cross_module_connections: Vec::new(),
        metadata: ResponseMetadata {
            stage: PipelineStage::FailedFallback,
            warnings: vec![err.to_string()],
            processing_time_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        },
    }
}

/// Template answer used when no provider could respond
fn degraded_response(analysis: &QueryAnalysis, context: &UserContext) -> String {
    let mut response = format!(
        "I can't reach my reasoning service right now, but I've noted your {} request",
        analysis.query_type
    );
    if !analysis.scope.modules.is_empty() {
        response.push_str(&format!(" for {}", analysis.scope.modules.join(" and ")));
    }
    response.push('.');
    if let Some(hint) = context.semantic_hints.first() {
        response.push_str(&format!(" {}.", hint.trim_end_matches('.')));
    }
    response
}

/// Insights from the current module or sharing a word with the query, at most three
pub fn relevant_insights(insights: &[Insight], query: &LifeTwinQuery) -> Vec<Insight> {
    let module = query.context.module.trim().to_lowercase();
    let words: HashSet<String> = tokens(&query.query).into_iter().filter(|w| w.len() > 3).collect();
    insights
        .iter()
        .filter(|insight| {
            let same_module = !module.is_empty() && insight.module().is_some_and(|m| m.eq_ignore_ascii_case(&module));
            same_module || tokens(&insight.description).iter().any(|w| words.contains(w))
        })
        .take(MAX_INSIGHTS)
        .cloned()
        .collect()
}

/// 0.5 plus a bonus for each pronounced trait the response reflects, capped at 1
pub fn personality_alignment(context: &UserContext, response: &str) -> f64 {
    let text = response.to_lowercase();
    let bonus: f64 = ALIGNMENT_BONUSES
        .iter()
        .filter(|(name, _, cues)| {
            context.trait_value(name) > PRONOUNCED_TRAIT && cues.iter().any(|cue| text.contains(cue))
        })
        .map(|(_, bonus, _)| bonus)
        .sum();
    (BASE_ALIGNMENT + bonus).min(1.0)
}

fn feedback_event(query: &LifeTwinQuery, analysis: &QueryAnalysis, confidence: f64, action_count: usize) -> LearningEvent {
    let module = if query.context.module.trim().is_empty() {
        analysis.scope.primary().to_string()
    } else {
        query.context.module.trim().to_lowercase()
    };
    LearningEvent::new(&query.user_id, EventType::Interaction, &module, clamp_unit(confidence))
        .with_payload("actionType", json!(analysis.query_type.as_str()))
        .with_payload("query", json!(query.query))
        .with_payload("urgency", json!(analysis.urgency))
        .with_payload("complexity", json!(analysis.complexity))
        .with_payload("actionCount", json!(action_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TwinConfig;
    use crate::learning::MemoryLearningStore;
    use crate::twin::context::StoreContextProvider;
    use crate::twin::providers::{GenerationResponse, MockTextGenerationProvider};
    use crate::types::InsightType;
    use serde_json::Map;

    fn core_with(provider: MockTextGenerationProvider) -> (Arc<MemoryLearningStore>, DigitalTwinCore) {
        let store = Arc::new(MemoryLearningStore::new());
        let config = TwinConfig::default();
        let engine = Arc::new(LearningEngine::new(store.clone(), store.clone(), &config));
        let context = Arc::new(StoreContextProvider::new(store.clone(), store.clone(), config.learning.clone()));
        let core = DigitalTwinCore::new(
            engine,
            context,
            ProviderSet::uniform(Arc::new(provider)),
            store.clone(),
            config.autonomy.clone(),
        );
        (store, core)
    }

    fn answering(text: &'static str) -> MockTextGenerationProvider {
        let mut provider = MockTextGenerationProvider::new();
        provider.expect_process().returning(move |_, _, _| {
            Ok(GenerationResponse {
                response: text.to_string(),
                confidence: 85.0,
                reasoning: "mock".to_string(),
            })
        });
        provider
    }

    #[tokio::test]
    async fn test_empty_query_gets_canned_apology() {
        let mut provider = MockTextGenerationProvider::new();
        provider.expect_process().times(0);
        let (store, core) = core_with(provider);
        let response = core.process_as_digital_twin(LifeTwinQuery::new("u1", "  ")).await;
        assert_eq!(response.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(response.metadata.stage, PipelineStage::FailedFallback);
        assert!(store.events_for("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_confidence_is_normalized_and_feedback_recorded() {
        let (store, core) = core_with(answering("Booked it."));
        let response = core
            .process_as_digital_twin(LifeTwinQuery::new("u1", "schedule a meeting tomorrow"))
            .await;
        assert!((response.confidence - 0.85).abs() < 1e-9);
        assert_eq!(response.metadata.stage, PipelineStage::Finalized);

        let feedback_id = response.metadata.feedback_event_id.unwrap();
        let feedback = store.get_event(&feedback_id).await.unwrap();
        assert_eq!(feedback.event_type, EventType::Interaction);
        assert_eq!(feedback.context, "calendar");
        assert_eq!(feedback.action_type(), Some("scheduling"));
        assert!(feedback.applied);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_response() {
        let mut provider = MockTextGenerationProvider::new();
        provider
            .expect_process()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));
        let (_, core) = core_with(provider);
        let response = core.process_as_digital_twin(LifeTwinQuery::new("u1", "organize my files")).await;
        assert_eq!(response.confidence, DEGRADED_CONFIDENCE);
        assert!(response.response.contains("organization"));
        assert_eq!(response.metadata.stage, PipelineStage::Finalized);
        assert!(response.metadata.warnings.iter().any(|w| w.contains("text generation")));
    }

    #[test]
    fn test_alignment_bonuses_and_cap() {
        let mut context = UserContext::default_for("u1");
        assert_eq!(personality_alignment(&context, "Here's a plan"), 0.5);
        context.traits.insert("conscientiousness".to_string(), 0.8);
        assert!((personality_alignment(&context, "Here's a plan") - 0.65).abs() < 1e-9);
        for name in ["openness", "extraversion", "agreeableness", "neuroticism"] {
            context.traits.insert(name.to_string(), 0.9);
        }
        let text = "Glad to help! Here's a plan to explore with the team, no rush.";
        assert_eq!(personality_alignment(&context, text), 1.0);
    }

    #[test]
    fn test_insight_extraction_caps_at_three() {
        let mut data = Map::new();
        data.insert("module".to_string(), json!("calendar"));
        let insights: Vec<Insight> = (0..5)
            .map(|i| {
                Insight::new("u1", InsightType::BehaviorChange, 0.8, 0.7, format!("shift {}", i), Vec::new(), data.clone())
            })
            .collect();
        let query = LifeTwinQuery::new("u1", "anything new?").with_module("calendar");
        assert_eq!(relevant_insights(&insights, &query).len(), 3);

        let unrelated = LifeTwinQuery::new("u1", "anything new?").with_module("drive");
        assert!(relevant_insights(&insights, &unrelated).is_empty());

        let by_keyword = LifeTwinQuery::new("u1", "why the shift lately?").with_module("drive");
        assert_eq!(relevant_insights(&insights, &by_keyword).len(), 3);
    }
}
