//! Text-generation providers and the static routing policy
//!
//! Three named providers: default, high-capability and private. Sensitive
//! queries always go to the private (local) provider; otherwise high
//! complexity goes to the high-capability one.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::context::UserContext;
use super::query::{Complexity, LifeTwinQuery, QueryAnalysis};
use crate::config::{ProviderEndpoint, ProvidersConfig};
use crate::types::{normalize_confidence, truncate_safe, Message};

/// Terms that force the private provider
pub const SENSITIVE_KEYWORDS: &[&str] = &["password", "ssn", "credit card", "bank", "medical", "health"];

const SYSTEM_PROMPT: &str = "You are the user's digital twin: a personal assistant that knows their habits, \
preferences and current priorities across calendar, chat, drive, tasks and analytics. \
Answer concisely, in a tone that fits their personality, and suggest concrete next steps.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRoute {
    Default,
    HighCapability,
    Private,
}

impl ProviderRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderRoute::Default => "default",
            ProviderRoute::HighCapability => "high_capability",
            ProviderRoute::Private => "private",
        }
    }
}

/// Static policy table: sensitivity first, then complexity
pub fn select_provider(text: &str, complexity: Complexity) -> ProviderRoute {
    let lowered = text.to_lowercase();
    if SENSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ProviderRoute::Private
    } else if complexity == Complexity::High {
        ProviderRoute::HighCapability
    } else {
        ProviderRoute::Default
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// Oldest first
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub response: String,
    /// 0-1 once it leaves the provider
    pub confidence: f64,
    pub reasoning: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TextGenerationProvider: Send + Sync {
    async fn process(
        &self,
        request: &GenerationRequest,
        context: &UserContext,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse>;
}

/// The three named providers
#[derive(Clone)]
pub struct ProviderSet {
    pub default: Arc<dyn TextGenerationProvider>,
    pub high_capability: Arc<dyn TextGenerationProvider>,
    pub private: Arc<dyn TextGenerationProvider>,
}

impl ProviderSet {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            default: Arc::new(OpenAiCompatibleProvider::from_endpoint(&config.default)?),
            high_capability: Arc::new(OpenAiCompatibleProvider::from_endpoint(&config.high_capability)?),
            private: Arc::new(OpenAiCompatibleProvider::from_endpoint(&config.private)?),
        })
    }

    /// One provider for every route
    pub fn uniform(provider: Arc<dyn TextGenerationProvider>) -> Self {
        Self {
            default: provider.clone(),
            high_capability: provider.clone(),
            private: provider,
        }
    }

    pub fn get(&self, route: ProviderRoute) -> Arc<dyn TextGenerationProvider> {
        match route {
            ProviderRoute::Default => self.default.clone(),
            ProviderRoute::HighCapability => self.high_capability.clone(),
            ProviderRoute::Private => self.private.clone(),
        }
    }
}

/// Prompt embedding traits, life state, recent patterns/insights and hints
pub fn build_prompt(query: &LifeTwinQuery, analysis: &QueryAnalysis, context: &UserContext) -> GenerationRequest {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "## Personality");
    for (name, value) in &context.traits {
        let _ = writeln!(prompt, "- {}: {:.2}", name, value);
    }

    let state = &context.life_state;
    let _ = writeln!(prompt, "\n## Life state");
    let _ = writeln!(
        prompt,
        "productivity {:.2}, social {:.2}, organization {:.2}, wellbeing {:.2}",
        state.productivity, state.social, state.organization, state.wellbeing
    );

    if !context.recent_patterns.is_empty() {
        let _ = writeln!(prompt, "\n## Recent patterns");
        for pattern in context.recent_patterns.iter().take(5) {
            let _ = writeln!(
                prompt,
                "- {} {} (strength {:.2}, confidence {:.2})",
                pattern.pattern_type,
                pattern.kind(),
                pattern.strength,
                pattern.confidence
            );
        }
    }

    if !context.recent_insights.is_empty() {
        let _ = writeln!(prompt, "\n## Recent insights");
        for insight in context.recent_insights.iter().take(3) {
            let _ = writeln!(prompt, "- {}", insight.description);
        }
    }

    if !context.semantic_hints.is_empty() {
        let _ = writeln!(prompt, "\n## Hints");
        for hint in &context.semantic_hints {
            let _ = writeln!(prompt, "- {}", hint);
        }
    }

    let _ = writeln!(prompt, "\n## Request");
    let _ = writeln!(
        prompt,
        "type: {}, urgency: {}, modules: {}",
        analysis.query_type,
        analysis.urgency,
        if analysis.scope.modules.is_empty() {
            "general".to_string()
        } else {
            analysis.scope.modules.join(", ")
        }
    );
    if let Some(dashboard) = &query.context.dashboard {
        let _ = writeln!(prompt, "dashboard: {}", dashboard);
    }
    let _ = write!(prompt, "\n{}", query.query.trim());

    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        history: query.conversation_history.clone(),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompatibleProvider {
    client: Arc<Client>,
    endpoint: ProviderEndpoint,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn from_endpoint(endpoint: &ProviderEndpoint) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = endpoint
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());
        Ok(Self {
            client: Arc::new(client),
            endpoint: endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl TextGenerationProvider for OpenAiCompatibleProvider {
    async fn process(
        &self,
        request: &GenerationRequest,
        _context: &UserContext,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse> {
        let mut messages = vec![ChatMessage { role: "system", content: &request.system }];
        messages.extend(request.history.iter().map(|m| ChatMessage {
            role: m.role.to_openai_string(),
            content: &m.content,
        }));
        messages.push(ChatMessage { role: "user", content: &request.prompt });

        let body = ChatRequest {
            model: &self.endpoint.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/')));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = builder
            .json(&body)
            .send()
            .await
            .context("Failed to send request to text-generation provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Provider API error ({}): {}", status, truncate_safe(&text, 500));
        }

        let raw: serde_json::Value = response.json().await.context("Failed to parse provider response")?;
        let content = raw
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        if content.is_empty() {
            bail!("Provider {} returned an empty completion", self.endpoint.model);
        }
        debug!("Provider {} returned {} chars", self.endpoint.model, content.len());

        Ok(GenerationResponse {
            response: content,
            confidence: normalize_confidence(self.endpoint.confidence),
            reasoning: format!("Generated by {}", self.endpoint.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::classifier::{KeywordClassifier, QueryClassifier};

    #[test]
    fn test_sensitive_terms_force_private() {
        assert_eq!(select_provider("reset my password", Complexity::High), ProviderRoute::Private);
        assert_eq!(select_provider("reset my Password", Complexity::Low), ProviderRoute::Private);
        assert_eq!(select_provider("pay the Credit Card bill", Complexity::Medium), ProviderRoute::Private);
        assert_eq!(select_provider("book a medical checkup", Complexity::Low), ProviderRoute::Private);
    }

    #[test]
    fn test_complexity_routes_the_rest() {
        assert_eq!(select_provider("plan the offsite", Complexity::High), ProviderRoute::HighCapability);
        assert_eq!(select_provider("plan the offsite", Complexity::Medium), ProviderRoute::Default);
        assert_eq!(select_provider("plan the offsite", Complexity::Low), ProviderRoute::Default);
    }

    #[test]
    fn test_prompt_embeds_traits_and_query() {
        let query = LifeTwinQuery::new("u1", "schedule a meeting tomorrow")
            .with_dashboard("work")
            .with_history(vec![Message::user("hi"), Message::assistant("hello")]);
        let analysis = KeywordClassifier.classify(&query, &[]);
        let context = UserContext::default_for("u1");
        let request = build_prompt(&query, &analysis, &context);
        assert!(request.prompt.contains("openness: 0.50"));
        assert!(request.prompt.contains("type: scheduling"));
        assert!(request.prompt.contains("dashboard: work"));
        assert!(request.prompt.ends_with("schedule a meeting tomorrow"));
        assert_eq!(request.history.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_set_routes_to_named_provider() {
        let mut private = MockTextGenerationProvider::new();
        private.expect_process().times(1).returning(|_, _, _| {
            Ok(GenerationResponse {
                response: "handled locally".to_string(),
                confidence: 0.9,
                reasoning: "local".to_string(),
            })
        });
        let mut other = MockTextGenerationProvider::new();
        other.expect_process().times(0);
        let other: Arc<dyn TextGenerationProvider> = Arc::new(other);

        let set = ProviderSet {
            default: other.clone(),
            high_capability: other,
            private: Arc::new(private),
        };
        let route = select_provider("what's my bank balance", Complexity::Low);
        let request = GenerationRequest {
            system: String::new(),
            prompt: "what's my bank balance".to_string(),
            history: Vec::new(),
        };
        let response = set
            .get(route)
            .process(&request, &UserContext::default_for("u1"), &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(response.response, "handled locally");
    }
}
