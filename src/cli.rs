//! CLI interface for life-twin

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::{self, TwinConfig};
use crate::error::TwinError;
use crate::learning::predictions::derive_predictions;
use crate::learning::{LearningEngine, PersonalityStore, SqliteLearningStore};
use crate::twin::{
    DigitalTwinCore, FactExtractionQueue, FactStore, LifeTwinQuery, LoggingActionSink, ProviderSet,
    StatementFactExtractor, StoreContextProvider, Urgency,
};
use crate::types::{EventType, Impact, LearningEvent};

#[derive(Parser)]
#[command(name = "life-twin")]
#[command(about = "Adaptive personal digital twin: learns from your activity and answers as you would", long_about = None)]
#[command(version)]
struct Cli {
    /// User the command acts for
    #[arg(short, long, global = true, env = "LIFE_TWIN_USER", default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the digital twin something
    Query {
        /// Query text
        text: String,
        /// Module the query is asked from (calendar, chat, drive, tasks, analytics)
        #[arg(short, long, default_value = "")]
        module: String,
        /// Explicit urgency (low, medium, high)
        #[arg(long)]
        urgency: Option<Urgency>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a learning event and run the learning pipeline
    Event {
        /// Event type (interaction, feedback, correction)
        #[arg(short = 't', long = "type", default_value = "interaction", value_parser = parse_primary_event_type)]
        event_type: EventType,
        /// Module the event happened in
        #[arg(short, long)]
        module: String,
        /// Confidence, 0-1 or 0-100
        #[arg(short, long, default_value = "0.5")]
        confidence: f64,
        /// Impact (low, medium, high, critical)
        #[arg(short, long, default_value = "medium")]
        impact: String,
        /// Action performed, recorded as the payload's actionType
        #[arg(short, long)]
        action: Option<String>,
    },
    /// Show current patterns and the predictions they imply
    Analyze,
    /// Show or create the personality profile
    Profile {
        /// Create a default profile if none exists
        #[arg(long)]
        init: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Derived types (pattern, prediction, insight) are only written by the pipeline
fn parse_primary_event_type(raw: &str) -> Result<EventType, String> {
    let event_type: EventType = raw.parse().map_err(|e: TwinError| e.to_string())?;
    if EventType::PRIMARY.contains(&event_type) {
        Ok(event_type)
    } else {
        Err(format!("'{}' events are derived by the learning pipeline; use interaction, feedback or correction", raw))
    }
}

/// Facts listed by `profile`
const PROFILE_FACTS: usize = 20;

/// Stores and engine shared by the commands
struct Twin {
    config: TwinConfig,
    store: Arc<SqliteLearningStore>,
    engine: Arc<LearningEngine>,
}

impl Twin {
    async fn open() -> Result<Self> {
        let config = TwinConfig::load()?;
        let path = config.storage.resolve_database_path()?;
        let store = Arc::new(SqliteLearningStore::new(&path).await?);
        let engine = Arc::new(LearningEngine::new(store.clone(), store.clone(), &config));
        Ok(Self { config, store, engine })
    }

    /// The twin plus its fact extraction worker, which finishes once the twin is dropped
    fn core(&self) -> Result<(DigitalTwinCore, JoinHandle<()>)> {
        let context = Arc::new(StoreContextProvider::new(
            self.store.clone(),
            self.store.clone(),
            self.config.learning.clone(),
        ));
        let providers = ProviderSet::from_config(&self.config.providers)?;
        let extractor = Arc::new(StatementFactExtractor::new(self.store.clone()));
        let (facts, worker) = FactExtractionQueue::spawn(extractor, self.config.facts.clone());
        let core = DigitalTwinCore::new(
            self.engine.clone(),
            context,
            providers,
            self.store.clone(),
            self.config.autonomy.clone(),
        )
        .with_action_sink(Arc::new(LoggingActionSink))
        .with_fact_queue(facts);
        Ok((core, worker))
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Query { text, module, urgency, json } => {
            let twin = Twin::open().await?;
            let mut query = LifeTwinQuery::new(&cli.user, &text).with_module(&module);
            query.urgency = urgency;
            let (core, facts) = twin.core()?;
            let response = core.process_as_digital_twin(query).await;
            drop(core);
            if let Err(e) = facts.await {
                warn!("Fact extraction worker failed: {}", e);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            println!("{}", response.response);
            println!();
            println!("confidence {:.2} | alignment {:.2}", response.confidence, response.personality_alignment);
            for action in &response.actions {
                println!(
                    "  action: {} [{}]{}",
                    action.description,
                    action.module,
                    if action.requires_approval { " (needs approval)" } else { "" }
                );
            }
            for connection in &response.cross_module_connections {
                println!("  link: {} -> {}: {}", connection.source_module, connection.target_module, connection.description);
            }
            for insight in &response.insights {
                println!("  insight: {}", insight.description);
            }
            for warning in &response.metadata.warnings {
                eprintln!("warning: {}", warning);
            }
        }
        Commands::Event { event_type, module, confidence, impact, action } => {
            let twin = Twin::open().await?;
            let mut event = LearningEvent::new(&cli.user, event_type, &module, 0.0)
                .with_impact(Impact::parse_lenient(&impact));
            // normalized by the engine
            event.confidence = confidence;
            if let Some(action) = action {
                event = event.with_payload("actionType", serde_json::Value::String(action));
            }
            let outcome = twin.engine.process_event(event).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Analyze => {
            let twin = Twin::open().await?;
            let patterns = twin.engine.patterns_for(&cli.user).await?;
            if patterns.is_empty() {
                println!("No activity recorded for {} in the last {} days.", cli.user, twin.config.learning.window_days);
                return Ok(());
            }
            println!("Patterns:");
            for p in &patterns {
                println!(
                    "  {:<14} {:<20} strength {:.2}  confidence {:.2}  frequency {}",
                    p.pattern_type.as_str(),
                    p.kind(),
                    p.strength,
                    p.confidence,
                    p.frequency
                );
            }
            println!();
            println!("Predictions:");
            for prediction in derive_predictions(&cli.user, &patterns, chrono::Utc::now()) {
                println!("  {} (p={:.2})", prediction.description, prediction.probability);
            }
            println!();
            println!("Stored events by type: {:?}", twin.store.count_by_type(&cli.user).await?);
        }
        Commands::Profile { init } => {
            let twin = Twin::open().await?;
            if init {
                twin.store.create_profile(&cli.user).await?;
            }
            let profile = twin
                .store
                .get_traits(&cli.user)
                .await?
                .with_context(|| format!("No profile for {} (run with --init to create one)", cli.user))?;
            println!("Personality of {} (updated {}):", profile.user_id, profile.last_updated.to_rfc3339());
            for (name, value) in &profile.traits {
                println!("  {:<18} {:.3}", name, value);
            }
            let facts = twin.store.facts_for(&cli.user, PROFILE_FACTS).await?;
            if !facts.is_empty() {
                println!();
                println!("Known facts:");
                for fact in &facts {
                    println!("  [{}] {}", fact.module, fact.statement);
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = TwinConfig::load()?;
                config::show_config(&config)?;
            }
            ConfigCommands::Path => {
                println!("{}", config::config_path()?.display());
            }
            ConfigCommands::Init { force } => {
                let path = config::config_path()?;
                if path.exists() && !force {
                    println!("Config already exists at {} (use --force to overwrite)", path.display());
                } else {
                    TwinConfig::default().save()?;
                    println!("Wrote default config to {}", path.display());
                }
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accepts_primary_types_only() {
        let cli = Cli::try_parse_from(["life-twin", "event", "--type", "feedback", "--module", "chat"]).unwrap();
        match cli.command {
            Commands::Event { event_type, .. } => assert_eq!(event_type, EventType::Feedback),
            _ => panic!("expected event command"),
        }
        for derived in ["pattern", "prediction", "insight"] {
            assert!(Cli::try_parse_from(["life-twin", "event", "--type", derived, "--module", "chat"]).is_err());
        }
        assert!(Cli::try_parse_from(["life-twin", "event", "--type", "bogus", "--module", "chat"]).is_err());
    }
}
