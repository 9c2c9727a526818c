use assistant_backend::assistant::{ Assistant, AssistantError };
use assistant_backend::config::{ PromptConfig, Settings };
use assistant_backend::history::{ ConversationStore, InMemoryConversationStore };
use assistant_backend::llm::chat::{
    ChatClient,
    CompletionRequest,
    CompletionResponse,
    ProviderError,
    TokenStream,
};
use assistant_backend::llm::{ Provider, ProviderConfig };
use assistant_backend::models::chat::Role;
use assistant_backend::models::code::{
    CodeAction,
    CodeActionRequest,
    CodeAnalysisRequest,
    CodeCompletionRequest,
};
use assistant_backend::models::request::ChatRequest;
use assistant_backend::router::{ ProviderRouter, RouterError, Selection };
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{ Arc, Mutex };
use std::time::Duration;

/// Replies with a fixed text and remembers every request it saw.
struct ScriptedClient {
    reply: Result<&'static str, u16>,
    /// When set, streams stall forever after the first chunk.
    stall_stream: bool,
    seen: Arc<Mutex<Vec<CompletionRequest>>>,
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.seen.lock().unwrap().push(request.clone());
        match self.reply {
            Ok(text) =>
                Ok(CompletionResponse {
                    content: text.to_string(),
                    model: self.model(),
                    usage: None,
                    finish_reason: Some("stop".to_string()),
                }),
            Err(status) => Err(ProviderError::from_status(status, "scripted failure".to_string())),
        }
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        let content = self.complete(request).await?.content;
        let chunks: Vec<Result<String, ProviderError>> = content
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        if self.stall_stream {
            let first = futures::stream::iter(chunks.into_iter().take(1));
            return Ok(Box::pin(first.chain(futures::stream::pending())));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn model(&self) -> String {
        "gpt-4o-mini".to_string()
    }
}

struct Fixture {
    assistant: Assistant,
    store: Arc<InMemoryConversationStore>,
    seen: Arc<Mutex<Vec<CompletionRequest>>>,
}

fn settings() -> Settings {
    Settings {
        providers: Vec::new(),
        default_selection: Selection::Auto,
        fallback_order: Vec::new(),
        request_timeout: Duration::from_secs(5),
        max_history: 4,
        max_message_length: 100,
        cors_origins: vec!["*".to_string()],
        prompts_path: None,
    }
}

fn fixture(reply: Result<&'static str, u16>, stall_stream: bool) -> Fixture {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let client = ScriptedClient { reply, stall_stream, seen: Arc::clone(&seen) };

    let settings = settings();
    let mut router = ProviderRouter::new(Vec::new(), settings.request_timeout);
    router.register_client(ProviderConfig::new(Provider::OpenAI).with_api_key("test-key"), Arc::new(client));

    let store = Arc::new(InMemoryConversationStore::new(settings.max_history));
    let assistant = Assistant::new(
        Arc::new(router),
        store.clone() as Arc<dyn ConversationStore>,
        PromptConfig::default(),
        &settings
    );
    Fixture { assistant, store, seen }
}

fn chat(message: &str, conversation_id: Option<&str>) -> ChatRequest {
    let mut request = ChatRequest::new(message);
    request.conversation_id = conversation_id.map(str::to_string);
    request
}

#[tokio::test]
async fn chat_stores_exchange_and_replays_history() {
    let f = fixture(Ok("Hi there"), false);

    let first = f.assistant.process_chat(&chat("hello", None)).await.unwrap();
    assert_eq!(first.response, "Hi there");
    assert_eq!(first.provider, Provider::OpenAI);
    assert!(first.tokens_used.unwrap() > 0);

    let second = f.assistant.process_chat(&chat("and again", Some(&first.conversation_id))).await.unwrap();
    assert_eq!(second.conversation_id, first.conversation_id);

    let seen = f.seen.lock().unwrap();
    let roles: Vec<Role> = seen[1].messages
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    drop(seen);

    let stored = f.store.get(&first.conversation_id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 4);
}

#[tokio::test]
async fn rejects_empty_and_oversized_messages() {
    let f = fixture(Ok("unused"), false);
    for message in ["   ".to_string(), "x".repeat(101)] {
        let err = f.assistant.process_chat(&chat(&message, None)).await.unwrap_err();
        assert!(matches!(err, AssistantError::Router(RouterError::InvalidRequest(_))));
    }
    assert!(f.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_chat_stores_nothing() {
    let f = fixture(Err(503), false);
    let err = f.assistant.process_chat(&chat("hello", Some("c1"))).await.unwrap_err();
    assert!(matches!(err, AssistantError::Router(RouterError::AllProvidersExhausted(_))));
    assert!(f.store.get("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn completed_stream_is_stored() {
    let f = fixture(Ok("streamed reply here"), false);
    let stream = f.assistant.process_chat_stream(&chat("hello", Some("s1"))).await.unwrap();
    let chunks: Vec<String> = stream.tokens
        .map(|t| t.unwrap())
        .collect().await;
    assert_eq!(chunks.concat(), "streamed reply here");

    let stored = f.store.get("s1").await.unwrap().unwrap();
    assert_eq!(stored.messages[1].content, "streamed reply here");
}

#[tokio::test]
async fn abandoned_stream_is_not_stored() {
    let f = fixture(Ok("never finishes"), true);
    let mut stream = f.assistant.process_chat_stream(&chat("hello", Some("s2"))).await.unwrap();
    assert_eq!(stream.tokens.next().await.unwrap().unwrap(), "never ");
    drop(stream);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(f.store.get("s2").await.unwrap().is_none());
}

#[tokio::test]
async fn completion_blocks_are_parsed() {
    let reply =
        "COMPLETION_START\nreturn a + b\nCOMPLETION_END\nDESCRIPTION: sum\nKIND: snippet\n\
         COMPLETION_START\nreturn sum((a, b))\nCOMPLETION_END\nDESCRIPTION: builtin\nKIND: function\n";
    let f = fixture(Ok(reply), false);
    let request: CodeCompletionRequest = serde_json
        ::from_value(
            serde_json::json!({ "prefix": "def add(a, b):\n    ", "language": "python", "max_completions": 1 })
        )
        .unwrap();

    let response = f.assistant.complete_code(&request).await.unwrap();
    assert_eq!(response.completions.len(), 1);
    assert_eq!(response.completions[0].text, "return a + b");

    let seen = f.seen.lock().unwrap();
    assert_eq!(seen[0].temperature, Some(0.3));
    assert!(seen[0].messages[1].content.contains("Current function: add"));
}

#[tokio::test]
async fn unparseable_completion_gets_placeholder() {
    let f = fixture(Ok("I cannot help with that."), false);
    let request: CodeCompletionRequest = serde_json
        ::from_value(serde_json::json!({ "prefix": "let x = ", "language": "javascript" }))
        .unwrap();
    let response = f.assistant.complete_code(&request).await.unwrap();
    assert_eq!(response.completions.len(), 1);
    assert_eq!(response.completions[0].kind, "comment");

    let too_many: CodeCompletionRequest = serde_json
        ::from_value(serde_json::json!({ "prefix": "x", "language": "python", "max_completions": 21 }))
        .unwrap();
    assert!(f.assistant.complete_code(&too_many).await.is_err());
}

#[tokio::test]
async fn analysis_survives_provider_failure() {
    let f = fixture(Err(500), false);
    let request: CodeAnalysisRequest = serde_json
        ::from_value(serde_json::json!({ "code": "x = 1 \n# TODO\n", "language": "python" }))
        .unwrap();

    let analysis = f.assistant.analyze_code(&request).await.unwrap();
    assert_eq!(analysis.metrics.total_lines, 2);
    assert_eq!(analysis.style_issues.len(), 2);
    assert!(analysis.summary.is_none());
    assert!(analysis.model_used.is_none());
}

#[tokio::test]
async fn analysis_includes_ai_insights() {
    let f = fixture(Ok(r#"{"summary":"Sets x","recommendations":["Name it"],"issues":["Magic number"]}"#), false);
    let request: CodeAnalysisRequest = serde_json
        ::from_value(serde_json::json!({ "code": "x = 1", "language": "python" }))
        .unwrap();

    let analysis = f.assistant.analyze_code(&request).await.unwrap();
    assert_eq!(analysis.summary.as_deref(), Some("Sets x"));
    assert_eq!(analysis.recommendations, vec!["Name it"]);
    assert_eq!(analysis.suggestions[0].message, "Magic number");
}

#[tokio::test]
async fn unknown_refactor_type_uses_improve_prompt() {
    let f = fixture(Ok("refactored"), false);
    let request = CodeActionRequest {
        code: "def f(): pass".to_string(),
        language: "python".to_string(),
        refactor_type: Some("rename_everything".to_string()),
        test_framework: None,
        model: None,
    };

    let response = f.assistant.code_action(CodeAction::Refactor, &request).await.unwrap();
    assert_eq!(response.result, "refactored");
    let seen = f.seen.lock().unwrap();
    assert!(seen[0].messages[0].content.contains("readability, performance, and best practices"));
    assert_eq!(seen[0].messages.len(), 1);
}

#[tokio::test]
async fn missing_conversation_is_not_found() {
    let f = fixture(Ok("unused"), false);
    assert!(matches!(f.assistant.conversation("nope").await, Err(AssistantError::NotFound(_))));
    assert!(matches!(f.assistant.clear_conversation("nope").await, Err(AssistantError::NotFound(_))));
    assert!(matches!(f.assistant.set_title("nope", "t").await, Err(AssistantError::NotFound(_))));
}
