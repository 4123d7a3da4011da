//! Cross-module connection detection
//!
//! Heuristics only: module pairs named together in a query form workflows,
//! people affected by an action form relationships, and behavioral patterns
//! pointing at another module form pattern connections.

use serde::{Deserialize, Serialize};

use super::actions::{ActionType, LifeTwinAction};
use super::query::QueryAnalysis;
use crate::types::{LearningPattern, PatternType};

/// Known hand-offs between modules
const WORKFLOWS: &[(&str, &str, &str)] = &[
    ("calendar", "chat", "Meeting changes can be announced to attendees"),
    ("calendar", "tasks", "Meeting outcomes can become follow-up tasks"),
    ("chat", "tasks", "Requests in conversations can become tasks"),
    ("drive", "chat", "Documents can be shared in a conversation"),
    ("drive", "calendar", "Documents can be attached to a meeting"),
    ("tasks", "calendar", "Deadlines can be blocked out in the calendar"),
    ("analytics", "tasks", "Findings can be turned into action items"),
    ("hr", "calendar", "Leave can be reflected in availability"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Workflow,
    Relationship,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossModuleConnection {
    pub kind: ConnectionKind,
    pub source_module: String,
    pub target_module: String,
    pub description: String,
    pub strength: f64,
    pub actionable: bool,
}

pub fn detect_connections(
    analysis: &QueryAnalysis,
    actions: &[LifeTwinAction],
    patterns: &[LearningPattern],
) -> Vec<CrossModuleConnection> {
    let mut connections = workflow_connections(analysis);
    connections.extend(relationship_connections(actions));
    connections.extend(pattern_connections(analysis, patterns));
    connections
}

fn workflow_connections(analysis: &QueryAnalysis) -> Vec<CrossModuleConnection> {
    if !analysis.scope.cross_module {
        return Vec::new();
    }
    WORKFLOWS
        .iter()
        .filter(|(from, to, _)| analysis.scope.includes(from) && analysis.scope.includes(to))
        .map(|(from, to, description)| CrossModuleConnection {
            kind: ConnectionKind::Workflow,
            source_module: from.to_string(),
            target_module: to.to_string(),
            description: description.to_string(),
            strength: 0.7,
            actionable: true,
        })
        .collect()
}

fn relationship_connections(actions: &[LifeTwinAction]) -> Vec<CrossModuleConnection> {
    actions
        .iter()
        .filter(|a| !a.people_affected.is_empty() && a.action_type != ActionType::Communicate)
        .map(|a| CrossModuleConnection {
            kind: ConnectionKind::Relationship,
            source_module: a.module.clone(),
            target_module: "chat".to_string(),
            description: format!("Keep {} in the loop", a.people_affected.join(", ")),
            strength: (0.5 + 0.1 * a.people_affected.len() as f64).min(0.9),
            actionable: true,
        })
        .collect()
}

fn pattern_connections(analysis: &QueryAnalysis, patterns: &[LearningPattern]) -> Vec<CrossModuleConnection> {
    let primary = analysis.scope.primary();
    patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::Behavioral && p.kind() == "module_usage")
        .filter_map(|p| {
            let dominant = p.text("dominantModule");
            if dominant.is_empty() || analysis.scope.includes(dominant) {
                return None;
            }
            Some(CrossModuleConnection {
                kind: ConnectionKind::Pattern,
                source_module: primary.to_string(),
                target_module: dominant.to_string(),
                description: format!("Most of your recent activity happens in {}", dominant),
                strength: p.strength,
                actionable: p.strength > 0.6,
            })
        })
        .collect()
}
