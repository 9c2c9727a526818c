use futures::StreamExt;
use log::{ debug, info, warn };
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::code::analysis::{ compute_metrics, insights_to_issues, parse_ai_insights, style_issues };
use crate::code::completion::{ build_completion_context, parse_completions, placeholder_completion };
use crate::config::prompt::{ self, PromptConfig, PromptError };
use crate::config::Settings;
use crate::context::{ assemble, build_system_message, estimate_prompt_tokens, estimate_tokens };
use crate::history::ConversationStore;
use crate::llm::chat::PromptMessage;
use crate::llm::Provider;
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary, Role };
use crate::models::code::{
    CodeAction,
    CodeActionRequest,
    CodeActionResponse,
    CodeAnalysisRequest,
    CodeAnalysisResponse,
    CodeCompletionRequest,
    CodeCompletionResponse,
};
use crate::models::request::{ ChatRequest, ChatResponse, GenerateRequest, GenerateResponse };
use crate::router::{
    AttemptFailure,
    ProviderRouter,
    RoutedStream,
    RouterError,
    RouterRequest,
    Selection,
    TaskType,
};

const MAX_COMPLETIONS_ACCEPTED: usize = 20;
const COMPLETION_TEMPERATURE: f32 = 0.3;
const DEFAULT_TEST_FRAMEWORK: &str = "pytest";

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)] Router(#[from] RouterError),
    #[error(transparent)] Prompt(#[from] PromptError),
    #[error("conversation store error: {0}")] Store(String),
    #[error("conversation '{0}' not found")] NotFound(String),
}

fn store_error(err: Box<dyn Error + Send + Sync>) -> AssistantError {
    AssistantError::Store(err.to_string())
}

fn invalid(message: impl Into<String>) -> AssistantError {
    AssistantError::Router(RouterError::InvalidRequest(message.into()))
}

/// A chat reply being streamed back token by token.
pub struct ChatStream {
    pub conversation_id: String,
    pub provider: Provider,
    pub model: String,
    pub attempts: Vec<AttemptFailure>,
    pub tokens: ReceiverStream<Result<String, RouterError>>,
}

/// Everything a transport needs to serve editor requests.
pub struct Assistant {
    router: Arc<ProviderRouter>,
    store: Arc<dyn ConversationStore>,
    prompts: Arc<PromptConfig>,
    default_selection: Selection,
    max_history: usize,
    max_message_length: usize,
}

impl Assistant {
    pub fn new(
        router: Arc<ProviderRouter>,
        store: Arc<dyn ConversationStore>,
        prompts: PromptConfig,
        settings: &Settings
    ) -> Self {
        Self {
            router,
            store,
            prompts: Arc::new(prompts),
            default_selection: settings.default_selection.clone(),
            max_history: settings.max_history,
            max_message_length: settings.max_message_length,
        }
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    fn selection(&self, model: Option<&str>) -> Result<Selection, RouterError> {
        match model.map(str::trim).filter(|m| !m.is_empty()) {
            Some(raw) => Selection::parse(raw),
            None => Ok(self.default_selection.clone()),
        }
    }

    fn validate_message(&self, message: &str) -> Result<(), AssistantError> {
        if message.trim().is_empty() {
            return Err(invalid("message is empty"));
        }
        let len = message.chars().count();
        if len > self.max_message_length {
            return Err(
                invalid(format!("message is {} characters, limit is {}", len, self.max_message_length))
            );
        }
        Ok(())
    }

    /// Validates the request and builds the prompt from stored history.
    /// Returns the conversation id alongside the router request.
    async fn prepare_chat(&self, request: &ChatRequest) -> Result<(String, RouterRequest), AssistantError> {
        self.validate_message(&request.message)?;
        let conversation_id = request.conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = self.store
            .get(&conversation_id).await
            .map_err(store_error)?
            .map(|c| c.messages)
            .unwrap_or_default();

        let system = build_system_message(
            self.prompts.template(prompt::SYSTEM_PREAMBLE)?,
            request.context.as_ref()
        );
        let messages = assemble(system, &history, self.max_history, &request.message);
        let router_request = RouterRequest::new(messages)
            .with_selection(self.selection(request.model.as_deref())?)
            .with_task(TaskType::Chat)
            .with_fallback(request.fallback);
        Ok((conversation_id, router_request))
    }

    async fn store_exchange(
        store: &Arc<dyn ConversationStore>,
        conversation_id: &str,
        request: &ChatRequest,
        reply: &str
    ) -> Result<(), AssistantError> {
        store
            .append(conversation_id, ChatMessage::user(request.message.clone(), request.context.clone())).await
            .map_err(store_error)?;
        store.append(conversation_id, ChatMessage::assistant(reply)).await.map_err(store_error)?;
        Ok(())
    }

    pub async fn process_chat(&self, request: &ChatRequest) -> Result<ChatResponse, AssistantError> {
        let (conversation_id, router_request) = self.prepare_chat(request).await?;
        let routed = self.router.route(&router_request).await?;

        Self::store_exchange(&self.store, &conversation_id, request, &routed.content).await?;
        info!(
            "Chat {} answered by {}/{} in {:?}",
            conversation_id,
            routed.provider,
            routed.model,
            routed.latency
        );

        let tokens = routed.usage
            .as_ref()
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| {
                estimate_prompt_tokens(&router_request.messages) + estimate_tokens(&routed.content)
            });
        let mut response = ChatResponse::new(routed.content, conversation_id, routed.provider, routed.model);
        response.tokens_used = Some(tokens);
        response.attempts = routed.attempts;
        Ok(response)
    }

    /// Streams the reply. The exchange is stored once the stream finishes;
    /// if the receiver is dropped or the provider fails midway, nothing is stored.
    pub async fn process_chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, AssistantError> {
        let (conversation_id, router_request) = self.prepare_chat(request).await?;
        let RoutedStream { provider, model, attempts, mut stream } = self.router.route_stream(
            &router_request
        ).await?;

        let (tx, rx) = mpsc::channel(32);
        let store = Arc::clone(&self.store);
        let stored_request = request.clone();
        let id = conversation_id.clone();

        tokio::spawn(async move {
            let mut reply = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(token) => {
                        reply.push_str(&token);
                        if tx.send(Ok(token)).await.is_err() {
                            debug!("Stream receiver for {} dropped; discarding reply", id);
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Stream for {} failed: {}", id, e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            if let Err(e) = Self::store_exchange(&store, &id, &stored_request, &reply).await {
                warn!("Could not store streamed exchange for {}: {}", id, e);
            }
        });

        Ok(ChatStream {
            conversation_id,
            provider,
            model,
            attempts,
            tokens: ReceiverStream::new(rx),
        })
    }

    pub async fn analyze_code(&self, request: &CodeAnalysisRequest) -> Result<CodeAnalysisResponse, AssistantError> {
        if request.code.trim().is_empty() {
            return Err(invalid("code is empty"));
        }
        let started = Instant::now();
        let metrics = compute_metrics(&request.code, &request.language);
        let style = if request.wants("style") { style_issues(&request.code) } else { Vec::new() };

        let mut response = CodeAnalysisResponse {
            id: Uuid::new_v4().to_string(),
            language: request.language.clone(),
            file_path: request.file_path.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            style_issues: style,
            suggestions: Vec::new(),
            metrics,
            summary: None,
            recommendations: Vec::new(),
            processing_time_ms: 0,
            model_used: None,
        };

        if request.wants("suggestions") {
            let vars = [
                ("language", request.language.as_str()),
                ("code", request.code.as_str()),
            ];
            let messages = vec![
                PromptMessage::new(Role::System, self.prompts.render(prompt::ANALYSIS_SYSTEM, &vars)?),
                PromptMessage::new(Role::User, self.prompts.render(prompt::ANALYSIS, &vars)?)
            ];
            let router_request = RouterRequest::new(messages)
                .with_selection(self.selection(request.model.as_deref())?)
                .with_task(TaskType::CodeAnalysis);

            match self.router.route(&router_request).await {
                Ok(routed) => {
                    let insights = parse_ai_insights(&routed.content);
                    response.summary = insights.summary;
                    response.recommendations = insights.recommendations;
                    response.suggestions = insights_to_issues(&insights.issues);
                    response.model_used = Some(routed.model);
                }
                Err(RouterError::InvalidRequest(msg)) => {
                    return Err(invalid(msg));
                }
                Err(e) => warn!("AI analysis unavailable, returning local results only: {}", e),
            }
        }

        response.processing_time_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    pub async fn complete_code(
        &self,
        request: &CodeCompletionRequest
    ) -> Result<CodeCompletionResponse, AssistantError> {
        if !(1..=MAX_COMPLETIONS_ACCEPTED).contains(&request.max_completions) {
            return Err(
                invalid(
                    format!(
                        "max_completions must be between 1 and {}, got {}",
                        MAX_COMPLETIONS_ACCEPTED,
                        request.max_completions
                    )
                )
            );
        }
        if request.prefix.trim().is_empty() && request.suffix.trim().is_empty() {
            return Err(invalid("prefix and suffix are both empty"));
        }
        let started = Instant::now();

        let context = build_completion_context(request);
        let max_completions = request.max_completions.to_string();
        let vars = [
            ("language", request.language.as_str()),
            ("max_completions", max_completions.as_str()),
            ("context", context.as_str()),
            ("prefix", request.prefix.as_str()),
            ("suffix", request.suffix.as_str()),
        ];
        let messages = vec![
            PromptMessage::new(Role::System, self.prompts.render(prompt::COMPLETION_SYSTEM, &vars)?),
            PromptMessage::new(Role::User, self.prompts.render(prompt::COMPLETION, &vars)?)
        ];
        let router_request = RouterRequest::new(messages)
            .with_selection(self.selection(request.model.as_deref())?)
            .with_task(TaskType::CodeCompletion)
            .with_temperature(COMPLETION_TEMPERATURE);

        let routed = self.router.route(&router_request).await?;
        let mut completions = parse_completions(&routed.content, request.max_completions);
        if completions.is_empty() {
            debug!("No completion blocks in reply from {}", routed.provider);
            completions.push(placeholder_completion(&request.language));
        }

        Ok(CodeCompletionResponse {
            id: Uuid::new_v4().to_string(),
            completions,
            timestamp: chrono::Utc::now().timestamp(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            model_used: Some(routed.model),
        })
    }

    fn action_prompt(&self, action: CodeAction, request: &CodeActionRequest) -> Result<String, PromptError> {
        let key = match action {
            CodeAction::Explain => prompt::EXPLAIN,
            CodeAction::FindBugs => prompt::FIND_BUGS,
            CodeAction::GenerateTests => prompt::GENERATE_TESTS,
            CodeAction::Refactor =>
                match request.refactor_type.as_deref().unwrap_or("improve") {
                    "extract_method" => prompt::REFACTOR_EXTRACT_METHOD,
                    "simplify" => prompt::REFACTOR_SIMPLIFY,
                    "optimize" => prompt::REFACTOR_OPTIMIZE,
                    _ => prompt::REFACTOR_IMPROVE,
                }
        };
        let framework = request.test_framework
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_TEST_FRAMEWORK);
        self.prompts.render(key, &[
            ("language", request.language.as_str()),
            ("code", request.code.as_str()),
            ("test_framework", framework),
        ])
    }

    /// Explain, refactor, find bugs or generate tests. These never touch conversation history.
    pub async fn code_action(
        &self,
        action: CodeAction,
        request: &CodeActionRequest
    ) -> Result<CodeActionResponse, AssistantError> {
        if request.code.trim().is_empty() {
            return Err(invalid("code is empty"));
        }
        let task = match action {
            CodeAction::Explain => TaskType::Chat,
            _ => TaskType::CodeAnalysis,
        };
        let router_request = RouterRequest::from_prompt(&self.action_prompt(action, request)?, None)
            .with_selection(self.selection(request.model.as_deref())?)
            .with_task(task);

        let routed = self.router.route(&router_request).await?;
        Ok(CodeActionResponse {
            action,
            result: routed.content,
            model_used: routed.model,
            provider: routed.provider,
        })
    }

    fn generate_request(&self, request: &GenerateRequest) -> Result<RouterRequest, AssistantError> {
        let mut router_request = RouterRequest::new(request.messages.clone())
            .with_selection(self.selection(request.model.as_deref())?)
            .with_task(request.task_type)
            .with_fallback(request.fallback);
        router_request.max_tokens = request.max_tokens;
        router_request.temperature = request.temperature;
        Ok(router_request)
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, AssistantError> {
        let routed = self.router.route(&self.generate_request(request)?).await?;
        Ok(GenerateResponse {
            content: routed.content,
            model_id: routed.model,
            provider: routed.provider,
            usage: routed.usage,
            finish_reason: routed.finish_reason,
            attempts: routed.attempts,
        })
    }

    pub async fn generate_stream(&self, request: &GenerateRequest) -> Result<RoutedStream, AssistantError> {
        let router_request = self.generate_request(request)?;
        Ok(self.router.route_stream(&router_request).await?)
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, AssistantError> {
        self.store
            .get(conversation_id).await
            .map_err(store_error)?
            .ok_or_else(|| AssistantError::NotFound(conversation_id.to_string()))
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, AssistantError> {
        self.store.list().await.map_err(store_error)
    }

    pub async fn clear_conversation(&self, conversation_id: &str) -> Result<(), AssistantError> {
        if self.store.clear(conversation_id).await.map_err(store_error)? {
            info!("Cleared conversation {}", conversation_id);
            Ok(())
        } else {
            Err(AssistantError::NotFound(conversation_id.to_string()))
        }
    }

    pub async fn set_title(&self, conversation_id: &str, title: &str) -> Result<(), AssistantError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(invalid("title is empty"));
        }
        if self.store.set_title(conversation_id, title).await.map_err(store_error)? {
            Ok(())
        } else {
            Err(AssistantError::NotFound(conversation_id.to_string()))
        }
    }
}
