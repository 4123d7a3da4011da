//! Background fact extraction
//!
//! Finished interactions are handed to a fact extractor on a bounded queue.
//! A single worker drains it with capped exponential backoff between
//! attempts. Enqueueing never blocks and a failing extractor never reaches
//! the query response.

use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactQueueConfig {
    /// Jobs buffered before new ones are dropped
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Attempts per job, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Upper bound for the backoff, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_capacity() -> usize { 256 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 10_000 }

impl Default for FactQueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl FactQueueConfig {
    /// Backoff before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let ms = self.base_backoff_ms.saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

/// One finished interaction to mine for facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactJob {
    pub user_id: String,
    pub module: String,
    pub query: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// Extracts durable facts from an interaction and stores them elsewhere
#[async_trait::async_trait]
pub trait FactExtractor: Send + Sync {
    /// Returns how many facts were stored
    async fn extract(&self, job: &FactJob) -> Result<usize>;
}

/// A durable statement the user made about themselves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub user_id: String,
    pub module: String,
    pub statement: String,
    pub recorded_at: DateTime<Utc>,
}

/// Persistence for extracted facts. Statements are unique per user, ignoring case.
#[async_trait::async_trait]
pub trait FactStore: Send + Sync {
    /// Returns false when the user already has this statement
    async fn put_fact(&self, fact: &Fact) -> Result<bool>;

    /// Newest first
    async fn facts_for(&self, user_id: &str, limit: usize) -> Result<Vec<Fact>>;
}

static STATEMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:i (?:prefer|like|love|hate|usually|always|never|work|live)\b[^.!?;,]*|my [a-z]+(?: [a-z]+)? (?:is|are|lives|works)\b[^.!?;,]*)",
    )
    .expect("valid statement regex")
});

/// First-person statements ("I prefer mornings", "my manager is Dana"), trimmed and deduplicated
pub fn extract_statements(text: &str) -> Vec<String> {
    let mut statements: Vec<String> = Vec::new();
    for m in STATEMENTS.find_iter(text) {
        let statement = m.as_str().trim().to_string();
        if !statements.iter().any(|s| s.eq_ignore_ascii_case(&statement)) {
            statements.push(statement);
        }
    }
    statements
}

/// Stores the user's own first-person statements from the query text
pub struct StatementFactExtractor {
    store: Arc<dyn FactStore>,
}

impl StatementFactExtractor {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl FactExtractor for StatementFactExtractor {
    async fn extract(&self, job: &FactJob) -> Result<usize> {
        let mut stored = 0;
        for statement in extract_statements(&job.query) {
            let fact = Fact {
                user_id: job.user_id.clone(),
                module: job.module.clone(),
                statement,
                recorded_at: job.created_at,
            };
            if self.store.put_fact(&fact).await? {
                stored += 1;
            }
        }
        Ok(stored)
    }
}

/// Handle for submitting jobs to the background worker
#[derive(Clone)]
pub struct FactExtractionQueue {
    tx: mpsc::Sender<FactJob>,
}

impl FactExtractionQueue {
    /// Start the worker. It stops once every queue handle is dropped.
    pub fn spawn(extractor: Arc<dyn FactExtractor>, config: FactQueueConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let handle = tokio::spawn(run_worker(extractor, config, rx));
        (Self { tx }, handle)
    }

    /// Submit a job without waiting. Returns false when the queue is full or closed.
    pub fn enqueue(&self, job: FactJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Fact extraction queue full, dropping job for {}", job.user_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!("Fact extraction worker stopped, dropping job for {}", job.user_id);
                false
            }
        }
    }
}

async fn run_worker(extractor: Arc<dyn FactExtractor>, config: FactQueueConfig, mut rx: mpsc::Receiver<FactJob>) {
    info!("Fact extraction worker started");
    while let Some(job) = rx.recv().await {
        let attempts = config.max_attempts.max(1);
        for attempt in 0..attempts {
            match extractor.extract(&job).await {
                Ok(count) => {
                    debug!("Extracted {} facts for {}", count, job.user_id);
                    break;
                }
                Err(e) if attempt + 1 < attempts => {
                    let wait = config.backoff(attempt);
                    warn!(
                        "Fact extraction failed for {} (attempt {}/{}): {:#}, retrying in {:?}",
                        job.user_id, attempt + 1, attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    warn!("Giving up on fact extraction for {} after {} attempts: {:#}", job.user_id, attempts, e);
                }
            }
        }
    }
    info!("Fact extraction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::MemoryLearningStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl FactExtractor for Flaky {
        async fn extract(&self, _job: &FactJob) -> Result<usize> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("extractor offline");
            }
            Ok(1)
        }
    }

    fn job() -> FactJob {
        FactJob {
            user_id: "u1".to_string(),
            module: "chat".to_string(),
            query: "my sister lives in Lisbon".to_string(),
            response: "Noted.".to_string(),
            created_at: Utc::now(),
        }
    }

    fn fast_config() -> FactQueueConfig {
        FactQueueConfig { capacity: 4, max_attempts: 3, base_backoff_ms: 1, max_backoff_ms: 2 }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = FactQueueConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_millis(1000));
        assert_eq!(config.backoff(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_statements_are_first_person_and_deduplicated() {
        let statements = extract_statements("I prefer mornings. My manager is Dana Reyes, and i prefer mornings!");
        assert_eq!(statements, vec!["I prefer mornings".to_string(), "My manager is Dana Reyes".to_string()]);
        assert!(extract_statements("schedule a meeting tomorrow").is_empty());
        assert!(extract_statements("find the file I liked").is_empty());
    }

    #[tokio::test]
    async fn test_statement_extractor_stores_new_facts_once() {
        let store = Arc::new(MemoryLearningStore::new());
        let extractor = StatementFactExtractor::new(store.clone());
        assert_eq!(extractor.extract(&job()).await.unwrap(), 1);
        assert_eq!(extractor.extract(&job()).await.unwrap(), 0);

        let facts = store.facts_for("u1", 10).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].statement, "my sister lives in Lisbon");
        assert_eq!(facts[0].module, "chat");
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let extractor = Arc::new(Flaky { calls: AtomicU32::new(0), fail_first: 2 });
        let (queue, handle) = FactExtractionQueue::spawn(extractor.clone(), fast_config());
        assert!(queue.enqueue(job()));
        drop(queue);
        handle.await.unwrap();
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let extractor = Arc::new(Flaky { calls: AtomicU32::new(0), fail_first: 100 });
        let (queue, handle) = FactExtractionQueue::spawn(extractor.clone(), fast_config());
        assert!(queue.enqueue(job()));
        drop(queue);
        handle.await.unwrap();
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }
}
