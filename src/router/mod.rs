pub mod selection;
pub mod stats;

use futures::{ Stream, StreamExt };
use log::{ debug, info, warn };
use serde::Serialize;
use std::collections::{ BTreeMap, HashMap };
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{ Duration, Instant };
use thiserror::Error;

pub use selection::{ Selection, TaskType };
pub use stats::{ ModelUsageStats, UsageTracker };

use crate::config::Settings;
use crate::context::{ estimate_prompt_tokens, estimate_tokens };
use crate::llm::catalog::{ self, ModelInfo };
use crate::llm::chat::{
    new_client,
    ChatClient,
    CompletionRequest,
    PromptMessage,
    ProviderError,
    TokenStream,
    TokenUsage,
};
use crate::llm::{ Provider, ProviderConfig };
use crate::models::chat::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    HttpStatus,
    Transport,
    InvalidResponse,
    NotConfigured,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::HttpStatus => "http_status",
            FailureKind::Transport => "transport",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::NotConfigured => "not_configured",
        }
    }
}

impl From<&ProviderError> for FailureKind {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Timeout => FailureKind::Timeout,
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::Status { .. } => FailureKind::HttpStatus,
            ProviderError::Transport(_) => FailureKind::Transport,
            ProviderError::Decode(_) | ProviderError::EmptyResponse => FailureKind::InvalidResponse,
            ProviderError::Config(_) => FailureKind::NotConfigured,
        }
    }
}

/// One entry of the diagnostic trail left by a failed provider attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub provider: Provider,
    pub model: String,
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptFailure {
    fn from_error(provider: Provider, model: String, err: &ProviderError) -> Self {
        Self {
            provider,
            model,
            kind: FailureKind::from(err),
            message: err.to_string(),
        }
    }

    fn timed_out(provider: Provider, model: String, after: Duration) -> Self {
        Self {
            provider,
            model,
            kind: FailureKind::Timeout,
            message: format!("no response within {}s", after.as_secs_f32()),
        }
    }

    fn not_configured(config: Option<&ProviderConfig>, provider: Provider) -> Self {
        Self {
            provider,
            model: config.map(|c| c.model.clone()).unwrap_or_else(|| provider.default_model().to_string()),
            kind: FailureKind::NotConfigured,
            message: format!("{} is not set", provider.credential_env()),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {} ({})", self.provider, self.model, self.kind.as_str(), self.message)
    }
}

fn describe_trail(trail: &[AttemptFailure]) -> String {
    trail
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum RouterError {
    /// A stream failed after its first token was relayed.
    #[error("provider {provider} became unavailable: {source}")] ProviderUnavailable {
        provider: Provider,
        #[source]
        source: ProviderError,
    },
    #[error("all providers exhausted: {}", describe_trail(.0))] AllProvidersExhausted(
        Vec<AttemptFailure>,
    ),
    #[error("invalid request: {0}")] InvalidRequest(String),
    #[error("configuration missing: {0}")] ConfigurationMissing(String),
}

/// A provider-agnostic request handed to [`ProviderRouter`].
#[derive(Debug, Clone)]
pub struct RouterRequest {
    pub messages: Vec<PromptMessage>,
    pub selection: Selection,
    pub task: TaskType,
    pub fallback: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl RouterRequest {
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self {
            messages,
            selection: Selection::Auto,
            task: TaskType::Chat,
            fallback: true,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Single-turn request from prompt text plus an optional code snippet.
    pub fn from_prompt(prompt: &str, code_context: Option<&str>) -> Self {
        let content = match code_context.filter(|c| !c.trim().is_empty()) {
            Some(code) => format!("{}\n\nContext:\n```\n{}\n```", prompt, code),
            None => prompt.to_string(),
        };
        Self::new(vec![PromptMessage::new(Role::User, content)])
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_task(mut self, task: TaskType) -> Self {
        self.task = task;
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub content: String,
    pub provider: Provider,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    pub attempts: Vec<AttemptFailure>,
    pub latency: Duration,
}

pub type RouterStream = Pin<Box<dyn Stream<Item = Result<String, RouterError>> + Send>>;

pub struct RoutedStream {
    pub provider: Provider,
    pub model: String,
    pub attempts: Vec<AttemptFailure>,
    pub stream: RouterStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAttempt {
    pub provider: Provider,
    /// `None` uses the provider's configured model.
    pub model: Option<String>,
}

struct ProviderSlot {
    config: ProviderConfig,
    client: Option<Arc<dyn ChatClient>>,
}

pub struct ProviderRouter {
    slots: HashMap<Provider, ProviderSlot>,
    fallback_order: Vec<Provider>,
    timeout: Duration,
    usage: UsageTracker,
}

impl ProviderRouter {
    pub fn new(fallback_order: Vec<Provider>, timeout: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            fallback_order,
            timeout,
            usage: UsageTracker::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut router = Self::new(settings.fallback_order.clone(), settings.request_timeout);
        for config in &settings.providers {
            router.register(config.clone());
        }
        let configured: Vec<&str> = router
            .configured_providers()
            .iter()
            .map(|p| p.as_str())
            .collect();
        info!("Configured providers: [{}]", configured.join(", "));
        router
    }

    /// Builds the vendor client when the config carries a credential.
    pub fn register(&mut self, config: ProviderConfig) {
        let client = if config.is_configured() {
            match new_client(&config) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("Could not create client for {}: {}", config.provider, e);
                    None
                }
            }
        } else {
            debug!("{} not configured ({} unset)", config.provider, config.credential_env());
            None
        };
        self.slots.insert(config.provider, ProviderSlot { config, client });
    }

    pub fn register_client(&mut self, config: ProviderConfig, client: Arc<dyn ChatClient>) {
        self.slots.insert(config.provider, ProviderSlot { config, client: Some(client) });
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn fallback_order(&self) -> &[Provider] {
        &self.fallback_order
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        self.slots
            .get(&provider)
            .map(|s| s.client.is_some())
            .unwrap_or(false)
    }

    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::ALL.into_iter()
            .filter(|p| self.is_configured(*p))
            .collect()
    }

    pub fn provider_config(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.slots.get(&provider).map(|s| &s.config)
    }

    /// First configured provider in the task's table whose context window fits.
    pub fn select_auto(&self, task: TaskType, estimated_tokens: u32) -> Result<Provider, RouterError> {
        let mut first_configured = None;
        for provider in task.preference() {
            let Some(slot) = self.slots.get(provider) else {
                continue;
            };
            if slot.client.is_none() {
                continue;
            }
            if slot.config.context_window >= estimated_tokens {
                return Ok(*provider);
            }
            first_configured.get_or_insert(*provider);
        }

        first_configured.ok_or_else(|| {
            let keys: Vec<&str> = Provider::ALL.iter()
                .map(|p| p.credential_env())
                .collect();
            RouterError::ConfigurationMissing(
                format!("no provider is configured; set one of {}", keys.join(", "))
            )
        })
    }

    /// The ordered list of attempts for `request`: primary first, then the fallback order.
    pub fn plan(&self, request: &RouterRequest) -> Result<Vec<PlannedAttempt>, RouterError> {
        let primary = match &request.selection {
            Selection::Explicit { provider, model } => {
                if !self.is_configured(*provider) {
                    return Err(
                        RouterError::ConfigurationMissing(
                            format!(
                                "{} is not set; provider {} cannot be used",
                                provider.credential_env(),
                                provider
                            )
                        )
                    );
                }
                PlannedAttempt { provider: *provider, model: model.clone() }
            }
            Selection::Auto => {
                let estimate = estimate_prompt_tokens(&request.messages);
                let provider = self.select_auto(request.task, estimate)?;
                debug!("Auto-selected {} for {} ({} est. tokens)", provider, request.task, estimate);
                PlannedAttempt { provider, model: None }
            }
        };

        let mut plan = vec![primary];
        if request.fallback {
            for provider in &self.fallback_order {
                if plan.iter().all(|a| a.provider != *provider) {
                    plan.push(PlannedAttempt { provider: *provider, model: None });
                }
            }
        }
        Ok(plan)
    }

    fn model_name(&self, attempt: &PlannedAttempt) -> String {
        attempt.model
            .clone()
            .or_else(|| self.slots.get(&attempt.provider).map(|s| s.config.model.clone()))
            .unwrap_or_else(|| attempt.provider.default_model().to_string())
    }

    fn cost_per_1k(&self, provider: Provider, model: &str) -> f64 {
        catalog
            ::find_model(model)
            .filter(|m| m.provider == provider)
            .map(|m| m.cost_per_1k_tokens)
            .or_else(|| self.slots.get(&provider).map(|s| s.config.cost_per_1k_tokens))
            .unwrap_or(0.0)
    }

    fn completion_request(request: &RouterRequest, attempt: &PlannedAttempt) -> CompletionRequest {
        CompletionRequest {
            messages: request.messages.clone(),
            model: attempt.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn validate(request: &RouterRequest) -> Result<(), RouterError> {
        if request.messages.is_empty() {
            return Err(RouterError::InvalidRequest("request has no messages".to_string()));
        }
        if request.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(RouterError::InvalidRequest("request messages are empty".to_string()));
        }
        Ok(())
    }

    /// Tries each planned provider in turn until one answers.
    pub async fn route(&self, request: &RouterRequest) -> Result<RoutedResponse, RouterError> {
        Self::validate(request)?;
        let plan = self.plan(request)?;
        let mut attempts = Vec::new();

        for attempt in plan {
            let model = self.model_name(&attempt);
            let Some(client) = self.slots.get(&attempt.provider).and_then(|s| s.client.clone()) else {
                debug!("Skipping {}: not configured", attempt.provider);
                attempts.push(
                    AttemptFailure::not_configured(self.provider_config(attempt.provider), attempt.provider)
                );
                continue;
            };

            let completion = Self::completion_request(request, &attempt);
            let started = Instant::now();
            match tokio::time::timeout(self.timeout, client.complete(&completion)).await {
                Ok(Ok(resp)) => {
                    let latency = started.elapsed();
                    let tokens = resp.usage
                        .as_ref()
                        .map(|u| u.total_tokens)
                        .unwrap_or_else(|| {
                            estimate_prompt_tokens(&request.messages) + estimate_tokens(&resp.content)
                        });
                    self.usage.record_success(
                        &model,
                        latency,
                        tokens,
                        self.cost_per_1k(attempt.provider, &model)
                    );
                    if !attempts.is_empty() {
                        info!(
                            "{} answered after {} failed attempt(s)",
                            attempt.provider,
                            attempts.len()
                        );
                    }
                    return Ok(RoutedResponse {
                        content: resp.content,
                        provider: attempt.provider,
                        model: resp.model,
                        usage: resp.usage,
                        finish_reason: resp.finish_reason,
                        attempts,
                        latency,
                    });
                }
                Ok(Err(e)) => {
                    warn!("{} ({}) failed: {}", attempt.provider, model, e);
                    self.usage.record_failure(&model);
                    attempts.push(AttemptFailure::from_error(attempt.provider, model, &e));
                }
                Err(_) => {
                    warn!("{} ({}) timed out after {:?}", attempt.provider, model, self.timeout);
                    self.usage.record_failure(&model);
                    attempts.push(AttemptFailure::timed_out(attempt.provider, model, self.timeout));
                }
            }
        }

        Err(RouterError::AllProvidersExhausted(attempts))
    }

    /// Like [`route`](Self::route), but fallback only covers opening the stream
    /// and receiving its first token. Later failures are yielded as
    /// [`RouterError::ProviderUnavailable`] items.
    pub async fn route_stream(&self, request: &RouterRequest) -> Result<RoutedStream, RouterError> {
        Self::validate(request)?;
        let plan = self.plan(request)?;
        let mut attempts = Vec::new();

        for attempt in plan {
            let model = self.model_name(&attempt);
            let Some(client) = self.slots.get(&attempt.provider).and_then(|s| s.client.clone()) else {
                attempts.push(
                    AttemptFailure::not_configured(self.provider_config(attempt.provider), attempt.provider)
                );
                continue;
            };

            let completion = Self::completion_request(request, &attempt);
            let started = Instant::now();
            let opened = tokio::time::timeout(self.timeout, async {
                let mut stream = client.stream_completion(&completion).await?;
                let first = stream.next().await;
                Ok::<_, ProviderError>((stream, first))
            }).await;

            match opened {
                Ok(Ok((stream, Some(Ok(first))))) => {
                    let provider = attempt.provider;
                    self.usage.record_success(
                        &model,
                        started.elapsed(),
                        estimate_prompt_tokens(&request.messages),
                        self.cost_per_1k(provider, &model)
                    );
                    let rest = Self::relay_with_idle_timeout(stream, provider, self.timeout);
                    let stream: RouterStream = Box::pin(
                        futures::stream::once(async move { Ok(first) }).chain(rest)
                    );
                    return Ok(RoutedStream { provider, model, attempts, stream });
                }
                Ok(Ok((_, Some(Err(e))))) | Ok(Err(e)) => {
                    warn!("{} ({}) stream failed to start: {}", attempt.provider, model, e);
                    self.usage.record_failure(&model);
                    attempts.push(AttemptFailure::from_error(attempt.provider, model, &e));
                }
                Ok(Ok((_, None))) => {
                    warn!("{} ({}) stream ended without output", attempt.provider, model);
                    self.usage.record_failure(&model);
                    attempts.push(
                        AttemptFailure::from_error(attempt.provider, model, &ProviderError::EmptyResponse)
                    );
                }
                Err(_) => {
                    warn!("{} ({}) stream timed out after {:?}", attempt.provider, model, self.timeout);
                    self.usage.record_failure(&model);
                    attempts.push(AttemptFailure::timed_out(attempt.provider, model, self.timeout));
                }
            }
        }

        Err(RouterError::AllProvidersExhausted(attempts))
    }

    /// Each later token must arrive within `idle`. The first failure or stall
    /// is yielded as `ProviderUnavailable` and ends the stream.
    fn relay_with_idle_timeout(
        stream: TokenStream,
        provider: Provider,
        idle: Duration
    ) -> impl Stream<Item = Result<String, RouterError>> + Send {
        futures::stream::unfold(Some(stream), move |state| async move {
            let mut stream = state?;
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(token))) => Some((Ok(token), Some(stream))),
                Ok(Some(Err(source))) => {
                    warn!("{} stream failed midway: {}", provider, source);
                    Some((Err(RouterError::ProviderUnavailable { provider, source }), None))
                }
                Ok(None) => None,
                Err(_) => {
                    warn!("{} stream stalled for {:?}", provider, idle);
                    let source = ProviderError::Timeout;
                    Some((Err(RouterError::ProviderUnavailable { provider, source }), None))
                }
            }
        })
    }

    /// Catalog models whose provider is configured.
    pub fn available_models(&self) -> Vec<&'static ModelInfo> {
        catalog::MODELS
            .iter()
            .filter(|m| self.is_configured(m.provider))
            .collect()
    }

    /// Up to five available models fit for `task`, cheapest first.
    pub fn recommendations(&self, task: TaskType, context_length: u32) -> Vec<&'static ModelInfo> {
        let capability = task.capability();
        let mut candidates: Vec<&'static ModelInfo> = self
            .available_models()
            .into_iter()
            .filter(|m| m.supports(capability) && m.context_length >= context_length)
            .collect();
        candidates.sort_by(|a, b| a.cost_per_1k_tokens.total_cmp(&b.cost_per_1k_tokens));
        candidates.truncate(5);
        candidates
    }

    pub fn usage_stats(&self) -> BTreeMap<String, ModelUsageStats> {
        self.usage.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(provider: Provider) -> ProviderConfig {
        let config = ProviderConfig::new(provider);
        if provider.requires_api_key() {
            config.with_api_key("test-key")
        } else {
            config.with_base_url("http://localhost:11434")
        }
    }

    fn router(configured_providers: &[Provider], fallback: Vec<Provider>) -> ProviderRouter {
        let mut router = ProviderRouter::new(fallback, Duration::from_secs(30));
        for p in Provider::ALL {
            if configured_providers.contains(&p) {
                router.register(configured(p));
            } else {
                router.register(ProviderConfig::new(p));
            }
        }
        router
    }

    #[test]
    fn plan_deduplicates_primary() {
        let r = router(&[Provider::OpenAI, Provider::Groq], vec![
            Provider::Groq,
            Provider::OpenAI,
            Provider::Groq
        ]);
        let request = RouterRequest::from_prompt("hi", None).with_selection(
            Selection::provider(Provider::OpenAI)
        );
        let plan: Vec<Provider> = r
            .plan(&request)
            .unwrap()
            .into_iter()
            .map(|a| a.provider)
            .collect();
        assert_eq!(plan, vec![Provider::OpenAI, Provider::Groq]);

        let single = r.plan(&request.with_fallback(false)).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn auto_prefers_first_listed_configured() {
        let r = router(&[Provider::OpenAI, Provider::DeepSeek], vec![]);
        assert_eq!(r.select_auto(TaskType::Chat, 10).unwrap(), Provider::OpenAI);
        assert_eq!(r.select_auto(TaskType::CodeCompletion, 10).unwrap(), Provider::DeepSeek);
    }

    #[test]
    fn auto_skips_providers_whose_window_is_too_small() {
        let r = router(&[Provider::DeepSeek, Provider::Google], vec![]);
        // deepseek-chat: 32k window; gemini-1.5-flash: 1M
        assert_eq!(r.select_auto(TaskType::CodeCompletion, 100_000).unwrap(), Provider::Google);
        // nothing fits, first configured in table order wins
        assert_eq!(r.select_auto(TaskType::CodeCompletion, 5_000_000).unwrap(), Provider::DeepSeek);
    }

    #[test]
    fn auto_without_configuration_is_missing() {
        let r = router(&[], vec![]);
        assert!(matches!(r.select_auto(TaskType::Chat, 1), Err(RouterError::ConfigurationMissing(_))));
    }

    #[test]
    fn recommendations_sorted_by_cost() {
        let r = router(&[Provider::OpenAI, Provider::Anthropic], vec![]);
        let ids: Vec<&str> = r
            .recommendations(TaskType::CodeAnalysis, 100_000)
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["claude-3-5-sonnet", "gpt-4o", "gpt-4-turbo", "claude-3-opus"]);
        assert!(r.recommendations(TaskType::Chat, 1).len() <= 5);
    }

    #[test]
    fn from_prompt_fences_code_context() {
        let request = RouterRequest::from_prompt("why?", Some("let x = 1;"));
        assert_eq!(request.messages.len(), 1);
        assert!(request.messages[0].content.contains("```\nlet x = 1;\n```"));
        assert_eq!(request.selection, Selection::Auto);
    }
}
