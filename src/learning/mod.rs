//! Adaptive learning system
//!
//! Ingests per-user events, mines temporal/behavioral/preference/communication
//! patterns from a bounded recent window, adapts the personality trait vector
//! and derives time-bounded predictions and insights. Every derived artifact
//! is written back to the event store as a typed event so it can be replayed.

pub mod store;
pub mod sqlite;
pub mod patterns;
pub mod personality;
pub mod predictions;
pub mod insights;
pub mod cache;
pub mod engine;

pub use store::{EventFilter, EventStore, MemoryLearningStore, PersonalityStore};
pub use sqlite::SqliteLearningStore;
pub use patterns::PatternAnalyzer;
pub use personality::PersonalityAdapter;
pub use predictions::PredictionGenerator;
pub use insights::InsightDetector;
pub use cache::PatternCache;
pub use engine::{CentralLearningSink, LearningEngine, LearningSummary, ProcessingOutcome};
