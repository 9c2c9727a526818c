use axum::extract::{ Path, State };
use axum::http::{ HeaderValue, StatusCode };
use axum::response::sse::{ Event, KeepAlive, Sse };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::{ middleware, Json, Router };
use futures::{ Stream, StreamExt };
use log::{ error, info, warn };
use serde::Serialize;
use serde_json::{ json, Value };
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

use super::auth::require_signature;
use crate::assistant::{ Assistant, AssistantError };
use crate::llm::Provider;
use crate::models::chat::Conversation;
use crate::models::code::{
    CodeAction,
    CodeActionRequest,
    CodeActionResponse,
    CodeAnalysisRequest,
    CodeAnalysisResponse,
    CodeCompletionRequest,
    CodeCompletionResponse,
};
use crate::models::request::{ ChatRequest, ChatResponse, GenerateRequest, ModelSelectionRequest, TitleRequest };
use crate::router::{ AttemptFailure, RouterError };

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
}

/// Maps service failures onto HTTP status codes with a JSON body.
#[derive(Debug)]
pub struct ApiError(AssistantError);

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        ApiError(err)
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        ApiError(AssistantError::Router(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attempts: Vec<AttemptFailure>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, attempts) = match &self.0 {
            AssistantError::Router(RouterError::InvalidRequest(_)) =>
                (StatusCode::BAD_REQUEST, "invalid_request", Vec::new()),
            AssistantError::Router(RouterError::ConfigurationMissing(_)) =>
                (StatusCode::SERVICE_UNAVAILABLE, "configuration_missing", Vec::new()),
            AssistantError::Router(RouterError::AllProvidersExhausted(trail)) =>
                (StatusCode::BAD_GATEWAY, "all_providers_exhausted", trail.clone()),
            AssistantError::Router(RouterError::ProviderUnavailable { .. }) =>
                (StatusCode::BAD_GATEWAY, "provider_unavailable", Vec::new()),
            AssistantError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", Vec::new()),
            AssistantError::Prompt(_) | AssistantError::Store(_) =>
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", Vec::new()),
        };
        if status.is_server_error() {
            error!("{}", self.0);
        }
        let body = ErrorBody { error: kind, message: self.0.to_string(), attempts };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

pub fn router(assistant: Arc<Assistant>, api_key: Option<String>, cors_origins: &[String]) -> Router {
    let state = AppState { assistant };

    let mut api = Router::new()
        .route("/status", get(status))
        .route("/chat/message", post(chat_message))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/conversations", get(list_conversations))
        .route("/chat/conversations/{id}", get(get_conversation).delete(clear_conversation))
        .route("/chat/conversations/{id}/title", post(set_title))
        .route("/code/analyze", post(analyze_code))
        .route("/code/complete", post(complete_code))
        .route("/code/explain", post(explain_code))
        .route("/code/refactor", post(refactor_code))
        .route("/code/find-bugs", post(find_bugs))
        .route("/code/generate-tests", post(generate_tests))
        .route("/models/available", get(available_models))
        .route("/models/providers", get(providers))
        .route("/models/select", post(select_model))
        .route("/models/generate", post(generate))
        .route("/models/usage", get(usage));

    if let Some(secret) = api_key.filter(|k| !k.is_empty()) {
        info!("HTTP API requires signed requests");
        api = api.route_layer(middleware::from_fn_with_state(Arc::new(secret), require_signature));
    }

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(
        json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    })
    )
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let configured = state.assistant.router().configured_providers();
    let status = if configured.is_empty() { "degraded" } else { "healthy" };
    Json(
        json!({
        "status": status,
        "timestamp": chrono::Utc::now().timestamp(),
        "configured_providers": configured.len(),
    })
    )
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let router = state.assistant.router();
    Json(
        json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "configured_providers": router.configured_providers(),
        "fallback_order": router.fallback_order(),
        "request_timeout_secs": router.timeout().as_secs(),
    })
    )
}

async fn chat_message(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> ApiResult<ChatResponse> {
    Ok(Json(state.assistant.process_chat(&request).await?))
}

/// Relays tokens as `token` events, then a final `done` event, or an `error`
/// event if the provider fails midway.
fn token_events<S>(tokens: S, done: Value) -> impl Stream<Item = Result<Event, Infallible>>
    where S: Stream<Item = Result<String, RouterError>> + Send + Unpin + 'static
{
    futures::stream::unfold(Some(tokens), move |state| {
        let done = done.clone();
        async move {
            let mut tokens = state?;
            let (event, next) = match tokens.next().await {
                Some(Ok(chunk)) => (Event::default().event("token").data(chunk), Some(tokens)),
                Some(Err(e)) => (Event::default().event("error").data(e.to_string()), None),
                None => (Event::default().event("done").data(done.to_string()), None),
            };
            Some((Ok::<_, Infallible>(event), next))
        }
    })
}

async fn chat_stream(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Response, ApiError> {
    let chat = state.assistant.process_chat_stream(&request).await?;
    let done =
        json!({
        "conversation_id": chat.conversation_id,
        "provider": chat.provider,
        "model_used": chat.model,
        "attempts": chat.attempts,
    });
    Ok(Sse::new(token_events(chat.tokens, done)).keep_alive(KeepAlive::default()).into_response())
}

async fn list_conversations(State(state): State<AppState>) -> ApiResult<Value> {
    let conversations = state.assistant.conversations().await?;
    Ok(Json(json!({ "conversations": conversations })))
}

async fn get_conversation(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Conversation> {
    Ok(Json(state.assistant.conversation(&id).await?))
}

async fn clear_conversation(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    state.assistant.clear_conversation(&id).await?;
    Ok(Json(json!({ "status": "cleared", "conversation_id": id })))
}

async fn set_title(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TitleRequest>
) -> ApiResult<Value> {
    state.assistant.set_title(&id, &request.title).await?;
    Ok(Json(json!({ "status": "updated", "conversation_id": id, "title": request.title.trim() })))
}

async fn analyze_code(
    State(state): State<AppState>,
    Json(request): Json<CodeAnalysisRequest>
) -> ApiResult<CodeAnalysisResponse> {
    Ok(Json(state.assistant.analyze_code(&request).await?))
}

async fn complete_code(
    State(state): State<AppState>,
    Json(request): Json<CodeCompletionRequest>
) -> ApiResult<CodeCompletionResponse> {
    Ok(Json(state.assistant.complete_code(&request).await?))
}

async fn code_action(state: AppState, action: CodeAction, request: CodeActionRequest) -> ApiResult<CodeActionResponse> {
    Ok(Json(state.assistant.code_action(action, &request).await?))
}

async fn explain_code(
    State(state): State<AppState>,
    Json(request): Json<CodeActionRequest>
) -> ApiResult<CodeActionResponse> {
    code_action(state, CodeAction::Explain, request).await
}

async fn refactor_code(
    State(state): State<AppState>,
    Json(request): Json<CodeActionRequest>
) -> ApiResult<CodeActionResponse> {
    code_action(state, CodeAction::Refactor, request).await
}

async fn find_bugs(
    State(state): State<AppState>,
    Json(request): Json<CodeActionRequest>
) -> ApiResult<CodeActionResponse> {
    code_action(state, CodeAction::FindBugs, request).await
}

async fn generate_tests(
    State(state): State<AppState>,
    Json(request): Json<CodeActionRequest>
) -> ApiResult<CodeActionResponse> {
    code_action(state, CodeAction::GenerateTests, request).await
}

async fn available_models(State(state): State<AppState>) -> Json<Value> {
    let models = state.assistant.router().available_models();
    Json(json!({ "models": models }))
}

async fn providers(State(state): State<AppState>) -> Json<Value> {
    let router = state.assistant.router();
    let providers: Vec<Value> = Provider::ALL.iter()
        .map(|p| {
            let config = router.provider_config(*p);
            json!({
                "provider": p,
                "configured": router.is_configured(*p),
                "model": config.map(|c| c.model.as_str()).unwrap_or(p.default_model()),
                "context_window": config.map(|c| c.context_window),
                "credential_env": p.credential_env(),
            })
        })
        .collect();
    Json(json!({ "providers": providers }))
}

async fn select_model(State(state): State<AppState>, Json(request): Json<ModelSelectionRequest>) -> Json<Value> {
    let recommendations = state.assistant.router().recommendations(request.task_type, request.context_length);
    Json(
        json!({
        "task_type": request.task_type,
        "context_length": request.context_length,
        "recommendations": recommendations,
    })
    )
}

async fn generate(State(state): State<AppState>, Json(request): Json<GenerateRequest>) -> Result<Response, ApiError> {
    if request.stream {
        let routed = state.assistant.generate_stream(&request).await?;
        let done = json!({
            "provider": routed.provider,
            "model_id": routed.model,
            "attempts": routed.attempts,
        });
        return Ok(Sse::new(token_events(routed.stream, done)).keep_alive(KeepAlive::default()).into_response());
    }
    let response = state.assistant.generate(&request).await?;
    Ok(Json(response).into_response())
}

async fn usage(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "usage": state.assistant.router().usage_stats() }))
}
