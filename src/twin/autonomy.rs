//! Autonomy policy gate
//!
//! Each action category has a user score (0-100) and a floor/ceiling pair.
//! Below the floor no action is proposed, between floor and ceiling the
//! action needs approval, above the ceiling it runs autonomously.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Categories of actions gated by autonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutonomyCategory {
    Scheduling,
    Communication,
    FileManagement,
    TaskCreation,
    DataAnalysis,
    CrossModuleActions,
}

impl AutonomyCategory {
    pub const ALL: [AutonomyCategory; 6] = [
        AutonomyCategory::Scheduling,
        AutonomyCategory::Communication,
        AutonomyCategory::FileManagement,
        AutonomyCategory::TaskCreation,
        AutonomyCategory::DataAnalysis,
        AutonomyCategory::CrossModuleActions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyCategory::Scheduling => "scheduling",
            AutonomyCategory::Communication => "communication",
            AutonomyCategory::FileManagement => "fileManagement",
            AutonomyCategory::TaskCreation => "taskCreation",
            AutonomyCategory::DataAnalysis => "dataAnalysis",
            AutonomyCategory::CrossModuleActions => "crossModuleActions",
        }
    }
}

impl fmt::Display for AutonomyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category autonomy scores for a user, each in [0, 100]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutonomySettings {
    #[serde(default = "default_scheduling_score")]
    pub scheduling: u8,
    #[serde(default = "default_communication_score")]
    pub communication: u8,
    #[serde(default = "default_file_management_score")]
    pub file_management: u8,
    #[serde(default = "default_task_creation_score")]
    pub task_creation: u8,
    #[serde(default = "default_data_analysis_score")]
    pub data_analysis: u8,
    #[serde(default = "default_cross_module_score")]
    pub cross_module_actions: u8,
}

fn default_scheduling_score() -> u8 { 50 }
fn default_communication_score() -> u8 { 30 }
fn default_file_management_score() -> u8 { 40 }
fn default_task_creation_score() -> u8 { 60 }
fn default_data_analysis_score() -> u8 { 70 }
fn default_cross_module_score() -> u8 { 20 }

impl Default for AutonomySettings {
    fn default() -> Self {
        Self {
            scheduling: default_scheduling_score(),
            communication: default_communication_score(),
            file_management: default_file_management_score(),
            task_creation: default_task_creation_score(),
            data_analysis: default_data_analysis_score(),
            cross_module_actions: default_cross_module_score(),
        }
    }
}

impl AutonomySettings {
    /// Score for a category, capped at 100
    pub fn score(&self, category: AutonomyCategory) -> u8 {
        let raw = match category {
            AutonomyCategory::Scheduling => self.scheduling,
            AutonomyCategory::Communication => self.communication,
            AutonomyCategory::FileManagement => self.file_management,
            AutonomyCategory::TaskCreation => self.task_creation,
            AutonomyCategory::DataAnalysis => self.data_analysis,
            AutonomyCategory::CrossModuleActions => self.cross_module_actions,
        };
        raw.min(100)
    }

    pub fn set(&mut self, category: AutonomyCategory, score: u8) {
        let score = score.min(100);
        match category {
            AutonomyCategory::Scheduling => self.scheduling = score,
            AutonomyCategory::Communication => self.communication = score,
            AutonomyCategory::FileManagement => self.file_management = score,
            AutonomyCategory::TaskCreation => self.task_creation = score,
            AutonomyCategory::DataAnalysis => self.data_analysis = score,
            AutonomyCategory::CrossModuleActions => self.cross_module_actions = score,
        }
    }
}

/// Floor and ceiling for one category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gate {
    pub floor: u8,
    pub ceiling: u8,
}

impl Gate {
    pub const fn new(floor: u8, ceiling: u8) -> Self {
        Self { floor, ceiling }
    }
}

/// Outcome of gating a proposed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Score below the floor: do not propose
    Withheld,
    /// Proposed, but a human has to approve it
    RequiresApproval,
    /// Proposed and executable without approval
    Autonomous,
}

/// The central floor/ceiling table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutonomyThresholds {
    #[serde(default = "scheduling_gate")]
    pub scheduling: Gate,
    #[serde(default = "communication_gate")]
    pub communication: Gate,
    #[serde(default = "file_management_gate")]
    pub file_management: Gate,
    #[serde(default = "task_creation_gate")]
    pub task_creation: Gate,
    #[serde(default = "data_analysis_gate")]
    pub data_analysis: Gate,
    #[serde(default = "cross_module_gate")]
    pub cross_module_actions: Gate,
}

fn scheduling_gate() -> Gate { Gate::new(30, 70) }
fn communication_gate() -> Gate { Gate::new(40, 80) }
fn file_management_gate() -> Gate { Gate::new(30, 70) }
fn task_creation_gate() -> Gate { Gate::new(20, 60) }
fn data_analysis_gate() -> Gate { Gate::new(10, 50) }
fn cross_module_gate() -> Gate { Gate::new(50, 85) }

impl Default for AutonomyThresholds {
    fn default() -> Self {
        Self {
            scheduling: scheduling_gate(),
            communication: communication_gate(),
            file_management: file_management_gate(),
            task_creation: task_creation_gate(),
            data_analysis: data_analysis_gate(),
            cross_module_actions: cross_module_gate(),
        }
    }
}

impl AutonomyThresholds {
    pub fn get(&self, category: AutonomyCategory) -> Gate {
        match category {
            AutonomyCategory::Scheduling => self.scheduling,
            AutonomyCategory::Communication => self.communication,
            AutonomyCategory::FileManagement => self.file_management,
            AutonomyCategory::TaskCreation => self.task_creation,
            AutonomyCategory::DataAnalysis => self.data_analysis,
            AutonomyCategory::CrossModuleActions => self.cross_module_actions,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AutonomyCategory, Gate)> + '_ {
        AutonomyCategory::ALL.iter().map(move |c| (*c, self.get(*c)))
    }

    /// Gate a category for the given user settings
    pub fn evaluate(&self, category: AutonomyCategory, settings: &AutonomySettings) -> GateDecision {
        let gate = self.get(category);
        let score = settings.score(category);
        if score < gate.floor {
            GateDecision::Withheld
        } else if score > gate.ceiling {
            GateDecision::Autonomous
        } else {
            GateDecision::RequiresApproval
        }
    }
}

/// Source of per-user autonomy scores
#[async_trait::async_trait]
pub trait AutonomySettingsStore: Send + Sync {
    async fn get_autonomy(&self, user_id: &str) -> Result<Option<AutonomySettings>>;
}

/// Fetch settings, falling back to the default table when absent or failing
pub async fn load_settings(store: &dyn AutonomySettingsStore, user_id: &str) -> (AutonomySettings, Option<String>) {
    match store.get_autonomy(user_id).await {
        Ok(Some(settings)) => (settings, None),
        Ok(None) => (AutonomySettings::default(), None),
        Err(e) => {
            warn!("Autonomy settings unavailable for {}: {:#}", user_id, e);
            (AutonomySettings::default(), Some(format!("autonomy settings defaulted: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(category: AutonomyCategory, score: u8) -> AutonomySettings {
        let mut s = AutonomySettings::default();
        s.set(category, score);
        s
    }

    #[test]
    fn test_below_floor_is_withheld() {
        let t = AutonomyThresholds::default();
        let s = settings_with(AutonomyCategory::Scheduling, 20);
        assert_eq!(t.evaluate(AutonomyCategory::Scheduling, &s), GateDecision::Withheld);
    }

    #[test]
    fn test_between_floor_and_ceiling_requires_approval() {
        let t = AutonomyThresholds::default();
        for score in [30, 50, 70] {
            let s = settings_with(AutonomyCategory::Scheduling, score);
            assert_eq!(t.evaluate(AutonomyCategory::Scheduling, &s), GateDecision::RequiresApproval);
        }
    }

    #[test]
    fn test_above_ceiling_is_autonomous() {
        let t = AutonomyThresholds::default();
        let s = settings_with(AutonomyCategory::Scheduling, 71);
        assert_eq!(t.evaluate(AutonomyCategory::Scheduling, &s), GateDecision::Autonomous);
    }

    #[test]
    fn test_scores_capped_at_100() {
        let mut s = AutonomySettings::default();
        s.set(AutonomyCategory::DataAnalysis, 250);
        assert_eq!(s.score(AutonomyCategory::DataAnalysis), 100);
    }

    #[test]
    fn test_settings_json_uses_camel_case_and_defaults() {
        let s: AutonomySettings = serde_json::from_str(r#"{"fileManagement": 90}"#).unwrap();
        assert_eq!(s.file_management, 90);
        assert_eq!(s.scheduling, 50);
    }
}
