//! Query classification
//!
//! Plain keyword matching behind the `QueryClassifier` trait. An embedding
//! based classifier can replace `KeywordClassifier` without touching the
//! pipeline.

use once_cell::sync::Lazy;
use regex::Regex;

use super::query::{Complexity, LifeTwinQuery, QueryAnalysis, QueryScope, QueryType, Urgency};
use crate::types::{LearningPattern, PatternType};

/// Queries longer than this many tokens count as long
const LONG_QUERY_TOKENS: usize = 10;
/// More relevant patterns than this count as pattern-heavy
const PATTERN_HEAVY: usize = 3;

const WEIGHT_LONG_QUERY: u32 = 2;
const WEIGHT_CROSS_MODULE: u32 = 3;
const WEIGHT_PATTERN_HEAVY: u32 = 1;

/// Query-type keywords, checked in order; first match wins
pub const QUERY_TYPE_KEYWORDS: &[(QueryType, &[&str])] = &[
    (QueryType::Scheduling, &["schedule", "reschedule", "meeting", "calendar", "appointment", "book"]),
    (QueryType::Communication, &["email", "message", "send", "reply", "call", "contact", "notify"]),
    (QueryType::Organization, &["organize", "organise", "file", "folder", "sort", "arrange", "document"]),
    (QueryType::Analysis, &["analyze", "analyse", "analysis", "report", "trend", "statistics", "compare"]),
    (QueryType::TaskManagement, &["task", "todo", "to-do", "deadline", "project", "assign", "remind"]),
];

/// Module keyword map used for scope detection
pub const MODULE_KEYWORDS: &[(&str, &[&str])] = &[
    ("calendar", &["calendar", "schedule", "reschedule", "meeting", "appointment", "event", "availability"]),
    ("chat", &["chat", "message", "email", "reply", "send", "call", "contact", "team"]),
    ("drive", &["drive", "file", "document", "folder", "upload", "share", "doc"]),
    ("tasks", &["task", "todo", "to-do", "deadline", "project", "assign", "remind"]),
    ("analytics", &["analytics", "analyze", "analyse", "analysis", "report", "trend", "metric", "dashboard", "statistics"]),
    ("hr", &["hr", "leave", "vacation", "payroll", "employee", "hiring", "onboarding"]),
];

const QUESTION_WORDS: &[&str] = &["what", "how", "why", "when", "where", "who", "which", "can", "could", "is", "are", "does", "do", "should"];

static HIGH_URGENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(urgent\w*|asap|now)\b").expect("valid urgency regex"));
static MEDIUM_URGENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(soon|today)\b").expect("valid urgency regex"));

/// Lowercased word tokens, keeping in-word hyphens
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Endings a keyword may take and still count as the same word
const INFLECTIONS: &[&str] = &["s", "es", "d", "ed", "ing", "er", "ers", "ies", "ied", "ment", "ments"];

/// Whole-word match allowing common inflections: "schedule" matches
/// "scheduled" and "scheduling", "reply" matches "replies", "doc" does not
/// match "doctor". A hyphenated compound counts as its first part.
pub fn keyword_matches(token: &str, keyword: &str) -> bool {
    let stem = match keyword.strip_suffix(&['e', 'y'][..]) {
        Some(stem) if stem.len() >= 3 => stem,
        _ => keyword,
    };
    [keyword, stem].iter().any(|base| {
        token.strip_prefix(base).is_some_and(|rest| {
            rest.is_empty() || rest.starts_with('-') || INFLECTIONS.contains(&rest)
        })
    })
}

pub fn mentions(tokens: &[String], keywords: &[&str]) -> bool {
    tokens.iter().any(|t| keywords.iter().any(|k| keyword_matches(t, k)))
}

/// Modules whose keywords appear in the text, in map order
pub fn modules_mentioned(text: &str) -> Vec<String> {
    let tokens = tokens(text);
    MODULE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| mentions(&tokens, keywords))
        .map(|(module, _)| module.to_string())
        .collect()
}

pub fn infer_query_type(text: &str) -> QueryType {
    let tokens = tokens(text);
    if let Some((query_type, _)) = QUERY_TYPE_KEYWORDS.iter().find(|(_, keywords)| mentions(&tokens, keywords)) {
        return *query_type;
    }
    let asks = text.trim_end().ends_with('?')
        || tokens.first().is_some_and(|t| QUESTION_WORDS.contains(&t.as_str()));
    if asks {
        QueryType::Question
    } else {
        QueryType::General
    }
}

/// Explicit urgency wins; otherwise keywords decide
pub fn infer_urgency(text: &str, explicit: Option<Urgency>) -> Urgency {
    if let Some(urgency) = explicit {
        return urgency;
    }
    if HIGH_URGENCY.is_match(text) {
        Urgency::High
    } else if MEDIUM_URGENCY.is_match(text) {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

pub fn infer_scope(text: &str, current_module: &str) -> QueryScope {
    let mut modules = modules_mentioned(text);
    let current = current_module.trim().to_lowercase();
    if modules.is_empty() && !current.is_empty() {
        modules.push(current);
    }
    QueryScope::new(modules)
}

/// Patterns that say something about the modules in scope. User-wide
/// pattern families (temporal, preference, communication) always count.
pub fn relevant_pattern_count(patterns: &[LearningPattern], scope: &QueryScope) -> usize {
    patterns
        .iter()
        .filter(|p| match p.pattern_type {
            PatternType::Behavioral => {
                let dominant = p.text("dominantModule");
                dominant.is_empty() || scope.includes(dominant)
            }
            _ => true,
        })
        .count()
}

pub fn complexity(text: &str, scope: &QueryScope, relevant_patterns: usize) -> Complexity {
    let mut score = 0;
    if text.split_whitespace().count() > LONG_QUERY_TOKENS {
        score += WEIGHT_LONG_QUERY;
    }
    if scope.cross_module {
        score += WEIGHT_CROSS_MODULE;
    }
    if relevant_patterns > PATTERN_HEAVY {
        score += WEIGHT_PATTERN_HEAVY;
    }
    Complexity::from_score(score)
}

/// Pluggable intent/scope/urgency classifier
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, query: &LifeTwinQuery, patterns: &[LearningPattern]) -> QueryAnalysis;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, query: &LifeTwinQuery, patterns: &[LearningPattern]) -> QueryAnalysis {
        let scope = infer_scope(&query.query, &query.context.module);
        let relevant_patterns = relevant_pattern_count(patterns, &scope);
        QueryAnalysis {
            query_type: infer_query_type(&query.query),
            urgency: infer_urgency(&query.query, query.urgency),
            complexity: complexity(&query.query, &scope, relevant_patterns),
            scope,
            relevant_patterns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_schedule_meeting_for_new_user() {
        let query = LifeTwinQuery::new("new-user", "schedule a meeting tomorrow");
        let analysis = KeywordClassifier.classify(&query, &[]);
        assert_eq!(analysis.query_type, QueryType::Scheduling);
        assert_eq!(analysis.urgency, Urgency::Low);
        assert!(analysis.scope.includes("calendar"));
        assert!(!analysis.scope.cross_module);
        assert_eq!(analysis.complexity, Complexity::Low);
    }

    #[test]
    fn test_query_types() {
        assert_eq!(infer_query_type("reply to Sam's email"), QueryType::Communication);
        assert_eq!(infer_query_type("organize my files"), QueryType::Organization);
        assert_eq!(infer_query_type("show the revenue trend"), QueryType::Analysis);
        assert_eq!(infer_query_type("add a task for friday"), QueryType::TaskManagement);
        assert_eq!(infer_query_type("what is my busiest day"), QueryType::Question);
        assert_eq!(infer_query_type("good morning"), QueryType::General);
    }

    #[test]
    fn test_urgent_keyword_forces_high() {
        assert_eq!(infer_urgency("this is urgent, move the review", None), Urgency::High);
        assert_eq!(infer_urgency("Urgently need the slides", None), Urgency::High);
        assert_eq!(infer_urgency("send it asap", None), Urgency::High);
        assert_eq!(infer_urgency("finish it today", None), Urgency::Medium);
        assert_eq!(infer_urgency("whenever you can", None), Urgency::Low);
        // "nowhere" is not "now"
        assert_eq!(infer_urgency("nowhere to be", None), Urgency::Low);
    }

    #[test]
    fn test_explicit_urgency_wins() {
        assert_eq!(infer_urgency("urgent: reschedule", Some(Urgency::Low)), Urgency::Low);
        let query = LifeTwinQuery::new("u1", "do it today").with_urgency(Urgency::High);
        assert_eq!(KeywordClassifier.classify(&query, &[]).urgency, Urgency::High);
    }

    #[test]
    fn test_keywords_match_whole_words_and_inflections() {
        assert!(keyword_matches("scheduled", "schedule"));
        assert!(keyword_matches("scheduling", "schedule"));
        assert!(keyword_matches("replies", "reply"));
        assert!(keyword_matches("docs", "doc"));
        assert!(keyword_matches("follow-up", "follow"));
        assert!(!keyword_matches("doctor", "doc"));
        assert!(!keyword_matches("eventually", "event"));
        assert!(!keyword_matches("calling", "calendar"));
    }

    #[test]
    fn test_lookalike_words_do_not_widen_scope() {
        assert_eq!(modules_mentioned("book an appointment with the doctor"), vec!["calendar".to_string()]);
        assert!(modules_mentioned("it will eventually happen").is_empty());
        let query = LifeTwinQuery::new("u1", "schedule time with the doctor");
        let analysis = KeywordClassifier.classify(&query, &[]);
        assert!(!analysis.scope.cross_module);
        assert_eq!(analysis.complexity, Complexity::Low);
    }

    #[test]
    fn test_scope_falls_back_to_current_module() {
        let scope = infer_scope("thanks!", "Drive");
        assert_eq!(scope.modules, vec!["drive".to_string()]);
        assert!(infer_scope("thanks!", "").modules.is_empty());
    }

    #[test]
    fn test_cross_module_long_query_is_high_complexity() {
        let text = "schedule a meeting with the team and share the project document with everyone before friday";
        let query = LifeTwinQuery::new("u1", text);
        let analysis = KeywordClassifier.classify(&query, &[]);
        assert!(analysis.scope.cross_module);
        assert_eq!(analysis.complexity, Complexity::High);

        let short = LifeTwinQuery::new("u1", "meeting notes document");
        assert_eq!(KeywordClassifier.classify(&short, &[]).complexity, Complexity::Medium);
    }

    #[test]
    fn test_relevant_patterns_ignore_other_modules() {
        let mut data = Payload::new();
        data.insert("dominantModule".to_string(), json!("drive"));
        let behavioral = LearningPattern::new("u1", PatternType::Behavioral, 0.9, 0.5, 3, Utc::now(), data);
        let temporal = LearningPattern::new("u1", PatternType::Temporal, 0.8, 0.5, 3, Utc::now(), Payload::new());
        let scope = QueryScope::new(vec!["calendar".to_string()]);
        assert_eq!(relevant_pattern_count(&[behavioral, temporal], &scope), 1);
    }
}
