//! Autonomy-gated action proposals
//!
//! Each builder fires on its own keywords and checks the user's score for
//! its category against the central threshold table. Proposed actions are
//! handed to `ActionSink`s for execution or approval downstream.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use super::autonomy::{AutonomyCategory, AutonomySettings, AutonomyThresholds, GateDecision};
use super::classifier::{mentions, tokens};
use super::query::{LifeTwinQuery, QueryAnalysis, Urgency};
use crate::types::Payload;

const SCHEDULE_TRIGGERS: &[&str] = &["schedule", "reschedule", "meeting", "appointment", "book", "calendar"];
const COMMUNICATE_TRIGGERS: &[&str] = &["email", "message", "send", "reply", "notify"];
const ORGANIZE_TRIGGERS: &[&str] = &["organize", "organise", "sort", "file", "folder", "clean", "archive"];
const TASK_TRIGGERS: &[&str] = &["task", "todo", "to-do", "deadline", "assign", "follow", "remind"];
const ANALYZE_TRIGGERS: &[&str] = &["analyze", "analyse", "analysis", "report", "trend", "summary", "summarize", "insight"];

static NAMED_PEOPLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:with|to|for|cc|and)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)").expect("valid people regex")
});
/// "tell" only asks for a message when a person follows it ("tell Dana ...")
static TELL_SOMEONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i:\btell)\s+(@[\w.-]+|[A-Z][\w.-]*)").expect("valid tell regex"));
/// Capitalised words after "with"/"for"/... that name a time or nobody
const NOT_PEOPLE: &[&str] = &[
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December", "Today", "Tomorrow", "Tonight", "Yesterday", "Next", "This",
    "That", "The", "A", "An", "Me", "Him", "Her", "Them", "Us", "You", "It", "Everyone", "All",
];
static MENTIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z][\w.-]*)").expect("valid mention regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Schedule,
    Communicate,
    Organize,
    Analyze,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Base priority raised by urgency
    fn for_urgency(base: Priority, urgency: Urgency) -> Priority {
        match urgency {
            Urgency::High => Priority::Urgent.max(base),
            Urgency::Medium => Priority::High.max(base),
            Urgency::Low => base,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeTwinAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub module: String,
    pub description: String,
    pub data: Payload,
    pub requires_approval: bool,
    pub confidence: f64,
    pub priority: Priority,
    /// Minutes
    pub estimated_time: u32,
    pub people_affected: Vec<String>,
    pub consequences: Vec<String>,
}

/// People named in the text ("with Dana", "@sam"), deduplicated in order
pub fn extract_people(text: &str) -> Vec<String> {
    let mut people: Vec<String> = Vec::new();
    let named = NAMED_PEOPLE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| person_name(m.as_str()));
    let mentioned = MENTIONS.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str().to_string());
    for person in named.chain(mentioned) {
        if !people.iter().any(|p| p.eq_ignore_ascii_case(&person)) {
            people.push(person);
        }
    }
    people
}

/// Leading words of a capture up to the first word that is not a name
fn person_name(capture: &str) -> Option<String> {
    let words: Vec<&str> = capture
        .split_whitespace()
        .take_while(|w| !NOT_PEOPLE.contains(w))
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}

fn tells_someone(text: &str) -> bool {
    TELL_SOMEONE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .any(|m| m.as_str().starts_with('@') || person_name(m.as_str()).is_some())
}

/// Static part of an action a builder fills in
struct Draft {
    category: AutonomyCategory,
    action_type: ActionType,
    module: &'static str,
    description: String,
    base_priority: Priority,
    estimated_time: u32,
    consequences: Vec<String>,
}

pub struct ActionPlanner {
    thresholds: AutonomyThresholds,
}

impl ActionPlanner {
    pub fn new(thresholds: AutonomyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AutonomyThresholds {
        &self.thresholds
    }

    /// Run every builder whose keywords appear in the query
    pub fn determine_actions(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
    ) -> Vec<LifeTwinAction> {
        let tokens = tokens(&query.query);
        let mut actions = Vec::new();
        if mentions(&tokens, SCHEDULE_TRIGGERS) {
            actions.extend(self.create_schedule_action(query, analysis, settings));
        }
        if mentions(&tokens, COMMUNICATE_TRIGGERS) || tells_someone(&query.query) {
            actions.extend(self.create_communication_action(query, analysis, settings));
        }
        if mentions(&tokens, ORGANIZE_TRIGGERS) {
            actions.extend(self.create_organize_action(query, analysis, settings));
        }
        if mentions(&tokens, TASK_TRIGGERS) {
            actions.extend(self.create_task_action(query, analysis, settings));
        }
        if mentions(&tokens, ANALYZE_TRIGGERS) {
            actions.extend(self.create_analysis_action(query, analysis, settings));
        }
        actions
    }

    pub fn create_schedule_action(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
    ) -> Option<LifeTwinAction> {
        self.build(
            query,
            analysis,
            settings,
            Draft {
                category: AutonomyCategory::Scheduling,
                action_type: ActionType::Schedule,
                module: "calendar",
                description: format!("Schedule: {}", query.query.trim()),
                base_priority: Priority::Medium,
                estimated_time: 15,
                consequences: vec![
                    "A calendar event will be created".to_string(),
                    "Invitations go to everyone named".to_string(),
                ],
            },
        )
    }

    pub fn create_communication_action(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
    ) -> Option<LifeTwinAction> {
        self.build(
            query,
            analysis,
            settings,
            Draft {
                category: AutonomyCategory::Communication,
                action_type: ActionType::Communicate,
                module: "chat",
                description: format!("Send message: {}", query.query.trim()),
                base_priority: Priority::Medium,
                estimated_time: 5,
                consequences: vec!["A message will be sent on your behalf".to_string()],
            },
        )
    }

    pub fn create_organize_action(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
    ) -> Option<LifeTwinAction> {
        self.build(
            query,
            analysis,
            settings,
            Draft {
                category: AutonomyCategory::FileManagement,
                action_type: ActionType::Organize,
                module: "drive",
                description: format!("Organize files: {}", query.query.trim()),
                base_priority: Priority::Low,
                estimated_time: 20,
                consequences: vec![
                    "Files may be moved or renamed".to_string(),
                    "Shared links keep working".to_string(),
                ],
            },
        )
    }

    pub fn create_task_action(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
    ) -> Option<LifeTwinAction> {
        self.build(
            query,
            analysis,
            settings,
            Draft {
                category: AutonomyCategory::TaskCreation,
                action_type: ActionType::Create,
                module: "tasks",
                description: format!("Create task: {}", query.query.trim()),
                base_priority: Priority::Medium,
                estimated_time: 10,
                consequences: vec!["A task will be added to your list".to_string()],
            },
        )
    }

    pub fn create_analysis_action(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
    ) -> Option<LifeTwinAction> {
        self.build(
            query,
            analysis,
            settings,
            Draft {
                category: AutonomyCategory::DataAnalysis,
                action_type: ActionType::Analyze,
                module: "analytics",
                description: format!("Analyze: {}", query.query.trim()),
                base_priority: Priority::Low,
                estimated_time: 30,
                consequences: vec!["A report will be generated from your data".to_string()],
            },
        )
    }

    fn build(
        &self,
        query: &LifeTwinQuery,
        analysis: &QueryAnalysis,
        settings: &AutonomySettings,
        draft: Draft,
    ) -> Option<LifeTwinAction> {
        let decision = self.thresholds.evaluate(draft.category, settings);
        let mut requires_approval = match decision {
            GateDecision::Withheld => return None,
            GateDecision::RequiresApproval => true,
            GateDecision::Autonomous => false,
        };
        // cross-module work also needs the cross-module gate open
        if analysis.scope.cross_module
            && self.thresholds.evaluate(AutonomyCategory::CrossModuleActions, settings) != GateDecision::Autonomous
        {
            requires_approval = true;
        }

        let mut data = Payload::new();
        data.insert("query".to_string(), json!(query.query));
        data.insert("category".to_string(), json!(draft.category.as_str()));
        data.insert("autonomyScore".to_string(), json!(settings.score(draft.category)));
        data.insert("urgency".to_string(), json!(analysis.urgency));

        Some(LifeTwinAction {
            id: uuid::Uuid::new_v4().to_string(),
            action_type: draft.action_type,
            module: draft.module.to_string(),
            description: draft.description,
            data,
            requires_approval,
            confidence: if requires_approval { 0.7 } else { 0.85 },
            priority: Priority::for_urgency(draft.base_priority, analysis.urgency),
            estimated_time: draft.estimated_time,
            people_affected: extract_people(&query.query),
            consequences: draft.consequences,
        })
    }
}

/// Downstream consumer of proposed actions
#[async_trait::async_trait]
pub trait ActionSink: Send + Sync {
    async fn emit(&self, user_id: &str, action: &LifeTwinAction) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingActionSink;

#[async_trait::async_trait]
impl ActionSink for LoggingActionSink {
    async fn emit(&self, user_id: &str, action: &LifeTwinAction) -> Result<()> {
        info!(
            "Action for {}: {:?} in {} (approval: {}, priority: {:?})",
            user_id, action.action_type, action.module, action.requires_approval, action.priority
        );
        Ok(())
    }
}

/// An action addressed to a user
#[derive(Debug, Clone)]
pub struct EmittedAction {
    pub user_id: String,
    pub action: LifeTwinAction,
}

/// Forwards actions over a bounded channel without waiting
#[derive(Clone)]
pub struct ChannelActionSink {
    tx: mpsc::Sender<EmittedAction>,
}

impl ChannelActionSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EmittedAction>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl ActionSink for ChannelActionSink {
    async fn emit(&self, user_id: &str, action: &LifeTwinAction) -> Result<()> {
        self.tx
            .try_send(EmittedAction {
                user_id: user_id.to_string(),
                action: action.clone(),
            })
            .map_err(|e| anyhow::anyhow!("Action channel unavailable: {}", e))
    }
}
