//! Digital twin query orchestration
//!
//! Context assembly, intent classification, provider routing, autonomy-gated
//! actions, cross-module connections and the feedback loop into learning.

pub mod query;
pub mod autonomy;
pub mod classifier;
pub mod context;
pub mod providers;
pub mod actions;
pub mod connections;
pub mod facts;
pub mod core;

pub use query::{
    Complexity, LifeTwinQuery, LifeTwinResponse, PipelineStage, QueryAnalysis, QueryContext, QueryScope, QueryType,
    ResponseMetadata, Urgency,
};
pub use autonomy::{AutonomyCategory, AutonomySettings, AutonomySettingsStore, AutonomyThresholds, Gate, GateDecision};
pub use classifier::{KeywordClassifier, QueryClassifier};
pub use context::{ContextProvider, ContextSource, SmartContext, StoreContextProvider, UserContext};
pub use providers::{
    select_provider, GenerationOptions, GenerationRequest, GenerationResponse, OpenAiCompatibleProvider, ProviderRoute,
    ProviderSet, TextGenerationProvider,
};
pub use actions::{ActionPlanner, ActionSink, ActionType, ChannelActionSink, LifeTwinAction, LoggingActionSink, Priority};
pub use connections::{ConnectionKind, CrossModuleConnection};
pub use facts::{Fact, FactExtractionQueue, FactExtractor, FactJob, FactQueueConfig, FactStore, StatementFactExtractor};
pub use self::core::DigitalTwinCore;
