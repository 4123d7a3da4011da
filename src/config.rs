//! Configuration management
//!
//! Manages twin configuration: learning window, pattern cache, autonomy
//! thresholds, text-generation providers, storage and fact extraction.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::twin::autonomy::AutonomyThresholds;
use crate::twin::facts::FactQueueConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwinConfig {
    /// Event window and adaptation settings
    #[serde(default)]
    pub learning: LearningConfig,
    /// Per-user pattern cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Floor/ceiling per autonomy category
    #[serde(default)]
    pub autonomy: AutonomyThresholds,
    /// The three named text-generation providers
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Persistent storage
    #[serde(default)]
    pub storage: StorageConfig,
    /// Background fact extraction queue
    #[serde(default)]
    pub facts: FactQueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Oldest event considered by the pattern analyzer, in days
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Maximum number of events considered by the pattern analyzer
    #[serde(default = "default_window_limit")]
    pub window_limit: usize,
    /// Minimum trait change that materializes an adjustment
    #[serde(default = "default_adjustment_threshold")]
    pub adjustment_threshold: f64,
}

fn default_window_days() -> i64 {
    30
}

fn default_window_limit() -> usize {
    100
}

fn default_adjustment_threshold() -> f64 {
    0.05
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            window_limit: default_window_limit(),
            adjustment_threshold: default_adjustment_threshold(),
        }
    }
}

impl LearningConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of users kept in the pattern cache
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Seconds before a cached pattern set is recomputed
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// An OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key (none for local endpoints)
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Confidence reported for responses from this endpoint (0-1 or 0-100)
    #[serde(default = "default_provider_confidence")]
    pub confidence: f64,
}

fn default_provider_confidence() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider")]
    pub default: ProviderEndpoint,
    #[serde(default = "high_capability_provider")]
    pub high_capability: ProviderEndpoint,
    /// Local endpoint used for sensitive queries
    #[serde(default = "private_provider")]
    pub private: ProviderEndpoint,
}

fn default_provider() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://openrouter.ai/api/v1".to_string(),
        model: "meta-llama/llama-3.1-8b-instruct".to_string(),
        api_key_env: Some("OPENROUTER_API_KEY".to_string()),
        confidence: default_provider_confidence(),
    }
}

fn high_capability_provider() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://openrouter.ai/api/v1".to_string(),
        model: "anthropic/claude-3.5-sonnet".to_string(),
        api_key_env: Some("OPENROUTER_API_KEY".to_string()),
        confidence: 0.9,
    }
}

fn private_provider() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "http://127.0.0.1:11434/v1".to_string(),
        model: "llama3.1".to_string(),
        api_key_env: None,
        confidence: 0.75,
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            high_capability: high_capability_provider(),
            private: private_provider(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path (defaults to the data directory)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("life-twin.db")),
        }
    }
}

impl TwinConfig {
    /// Load configuration from the default location, writing defaults if absent
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = TwinConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: TwinConfig = toml::from_str(&contents)
            .context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "life-twin", "life-twin")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "life-twin", "life-twin")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config(config: &TwinConfig) -> Result<()> {
    println!("Learning window:  {} days / {} events", config.learning.window_days, config.learning.window_limit);
    println!("Adjustment floor: {}", config.learning.adjustment_threshold);
    println!("Pattern cache:    {} users, ttl {}s", config.cache.capacity, config.cache.ttl_secs);
    println!("Database:         {}", config.storage.resolve_database_path()?.display());
    println!();
    println!("Providers:");
    println!("  default:         {} @ {}", config.providers.default.model, config.providers.default.base_url);
    println!("  high_capability: {} @ {}", config.providers.high_capability.model, config.providers.high_capability.base_url);
    println!("  private:         {} @ {}", config.providers.private.model, config.providers.private.base_url);
    println!();
    println!("Autonomy thresholds (floor / ceiling):");
    for (category, gate) in config.autonomy.iter() {
        println!("  {:<20} {:>3} / {:>3}", category.as_str(), gate.floor, gate.ceiling);
    }
    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = TwinConfig::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::autonomy::AutonomyCategory;

    #[test]
    fn test_defaults() {
        let config = TwinConfig::default();
        assert_eq!(config.learning.window_limit, 100);
        assert_eq!(config.learning.window_days, 30);
        assert_eq!(config.learning.adjustment_threshold, 0.05);
        assert!(config.providers.private.api_key_env.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TwinConfig = toml::from_str(
            r#"
            [learning]
            window_limit = 50

            [autonomy.scheduling]
            floor = 25
            ceiling = 65
            "#,
        )
        .unwrap();
        assert_eq!(config.learning.window_limit, 50);
        assert_eq!(config.learning.window_days, 30);
        let gate = config.autonomy.get(AutonomyCategory::Scheduling);
        assert_eq!((gate.floor, gate.ceiling), (25, 65));
        let gate = config.autonomy.get(AutonomyCategory::Communication);
        assert_eq!((gate.floor, gate.ceiling), (40, 80));
    }

    #[test]
    fn test_default_toml_round_trips() {
        let text = default_config_toml();
        let parsed: TwinConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cache.capacity, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nttl_secs = 60\n").unwrap();
        let config = TwinConfig::load_from(&path).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.capacity, 1000);
    }
}
