//! Life Twin - adaptive personalization engine
//!
//! A per-user digital twin that:
//! - Records interaction events and mines temporal, behavioral, preference
//!   and communication patterns from a bounded recent window
//! - Adapts a personality trait vector from individual events
//! - Derives time-bounded predictions and behavior insights
//! - Answers queries with assembled context, routed text generation,
//!   autonomy-gated actions and cross-module connections
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use life_twin::{config::TwinConfig, learning::{LearningEngine, SqliteLearningStore}};
//! use life_twin::twin::{DigitalTwinCore, LifeTwinQuery, ProviderSet, StoreContextProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TwinConfig::load()?;
//!     let store = Arc::new(SqliteLearningStore::new(config.storage.resolve_database_path()?).await?);
//!     let engine = Arc::new(LearningEngine::new(store.clone(), store.clone(), &config));
//!     let context = Arc::new(StoreContextProvider::new(store.clone(), store.clone(), config.learning.clone()));
//!     let core = DigitalTwinCore::new(engine, context, ProviderSet::from_config(&config.providers)?,
//!         store, config.autonomy.clone());
//!     let response = core.process_as_digital_twin(LifeTwinQuery::new("me", "schedule a meeting tomorrow")).await;
//!     println!("{}", response.response);
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod error;
pub mod config;
pub mod learning;
pub mod twin;
pub mod cli;

// Re-export commonly used types for convenience
pub use types::{
    EventType,
    Impact,
    Insight,
    LearningEvent,
    LearningPattern,
    PersonalityProfile,
    Prediction,
};

pub use error::TwinError;

pub use config::TwinConfig;

pub use learning::{
    LearningEngine,
    MemoryLearningStore,
    SqliteLearningStore,
};

pub use twin::{
    DigitalTwinCore,
    LifeTwinQuery,
    LifeTwinResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Adaptive personalization engine", NAME, VERSION)
}
