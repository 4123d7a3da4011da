//! Query and response types for the digital twin entry point

use serde::{Deserialize, Serialize};
use std::fmt;

use super::actions::LifeTwinAction;
use super::connections::CrossModuleConnection;
use super::context::ContextSource;
use super::providers::ProviderRoute;
use crate::error::TwinError;
use crate::types::{Insight, Message};

/// How soon the user needs an answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Urgency {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "medium" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            other => Err(TwinError::validation(format!("unknown urgency '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Scheduling,
    Communication,
    Organization,
    Analysis,
    TaskManagement,
    Question,
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Scheduling => "scheduling",
            QueryType::Communication => "communication",
            QueryType::Organization => "organization",
            QueryType::Analysis => "analysis",
            QueryType::TaskManagement => "task_management",
            QueryType::Question => "question",
            QueryType::General => "general",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Map a weighted signal sum onto a level
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 5 => Complexity::High,
            s if s >= 3 => Complexity::Medium,
            _ => Complexity::Low,
        }
    }
}

/// Stages of the per-query pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    ReceivedQuery,
    ContextAssembled,
    QueryAnalyzed,
    ResponseGenerated,
    ActionsDetermined,
    Finalized,
    FailedFallback,
}

/// Where the query was asked from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub dashboard: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeTwinQuery {
    pub user_id: String,
    pub query: String,
    #[serde(default)]
    pub context: QueryContext,
    /// Caller-supplied urgency; wins over inferred urgency
    #[serde(default)]
    pub urgency: Option<Urgency>,
    /// Oldest first
    #[serde(default)]
    pub conversation_history: Vec<Message>,
}

impl LifeTwinQuery {
    pub fn new(user_id: &str, query: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            query: query.to_string(),
            context: QueryContext::default(),
            urgency: None,
            conversation_history: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: &str) -> Self {
        self.context.module = module.to_string();
        self
    }

    pub fn with_dashboard(mut self, dashboard: &str) -> Self {
        self.context.dashboard = Some(dashboard.to_string());
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    /// Reject queries missing required input
    pub fn validate(&self) -> Result<(), TwinError> {
        if self.user_id.trim().is_empty() {
            return Err(TwinError::validation("query has no user id"));
        }
        if self.query.trim().is_empty() {
            return Err(TwinError::validation("query text is empty"));
        }
        Ok(())
    }
}

/// Modules a query touches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryScope {
    pub modules: Vec<String>,
    pub cross_module: bool,
}

impl QueryScope {
    pub fn new(modules: Vec<String>) -> Self {
        let cross_module = modules.len() > 1;
        Self { modules, cross_module }
    }

    pub fn includes(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m.eq_ignore_ascii_case(module))
    }

    /// First module in scope, "general" when none
    pub fn primary(&self) -> &str {
        self.modules.first().map(String::as_str).unwrap_or("general")
    }
}

/// Classifier output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub scope: QueryScope,
    pub urgency: Urgency,
    pub complexity: Complexity,
    pub relevant_patterns: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub stage: PipelineStage,
    pub query_type: Option<QueryType>,
    pub scope: Option<QueryScope>,
    pub urgency: Option<Urgency>,
    pub complexity: Option<Complexity>,
    pub provider: Option<ProviderRoute>,
    pub context_source: Option<ContextSource>,
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
    pub feedback_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeTwinResponse {
    pub response: String,
    pub confidence: f64,
    pub actions: Vec<LifeTwinAction>,
    pub insights: Vec<Insight>,
    pub reasoning: String,
    pub personality_alignment: f64,
    pub cross_module_connections: Vec<CrossModuleConnection>,
    pub metadata: ResponseMetadata,
}
