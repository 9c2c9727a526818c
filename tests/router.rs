use assistant_backend::llm::chat::{
    ChatClient,
    CompletionRequest,
    CompletionResponse,
    ProviderError,
    TokenStream,
};
use assistant_backend::llm::{ Provider, ProviderConfig };
use assistant_backend::router::{
    FailureKind,
    ProviderRouter,
    RouterError,
    RouterRequest,
    Selection,
    TaskType,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
enum Behavior {
    Reply(&'static str),
    RateLimited,
    ServerError,
    Hang,
    StreamThenFail(Vec<&'static str>),
    StallAfterFirst(&'static str),
}

struct FakeClient {
    provider: Provider,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatClient for FakeClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(text) =>
                Ok(CompletionResponse {
                    content: text.to_string(),
                    model: self.model(),
                    usage: None,
                    finish_reason: Some("stop".to_string()),
                }),
            Behavior::RateLimited => Err(ProviderError::from_status(429, "slow down".to_string())),
            Behavior::ServerError => Err(ProviderError::from_status(500, "boom".to_string())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout)
            }
            Behavior::StallAfterFirst(first) =>
                Ok(CompletionResponse {
                    content: first.to_string(),
                    model: self.model(),
                    usage: None,
                    finish_reason: None,
                }),
            Behavior::StreamThenFail(chunks) =>
                Ok(CompletionResponse {
                    content: chunks.concat(),
                    model: self.model(),
                    usage: None,
                    finish_reason: None,
                }),
        }
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        if let Behavior::StreamThenFail(chunks) = &self.behavior {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items: Vec<Result<String, ProviderError>> = chunks
                .iter()
                .map(|c| Ok(c.to_string()))
                .chain(std::iter::once(Err(ProviderError::Transport("connection reset".to_string()))))
                .collect();
            return Ok(Box::pin(futures::stream::iter(items)));
        }
        if let Behavior::StallAfterFirst(first) = &self.behavior {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let head = futures::stream::once(futures::future::ready(Ok(first.to_string())));
            return Ok(Box::pin(head.chain(futures::stream::pending())));
        }
        let content = self.complete(request).await?.content;
        let words: Vec<Result<String, ProviderError>> = content
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(words)))
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> String {
        self.provider.default_model().to_string()
    }
}

struct Harness {
    router: ProviderRouter,
    calls: Vec<(Provider, Arc<AtomicUsize>)>,
}

impl Harness {
    fn new(fallback: Vec<Provider>) -> Self {
        Self {
            router: ProviderRouter::new(fallback, Duration::from_millis(50)),
            calls: Vec::new(),
        }
    }

    fn with(mut self, provider: Provider, behavior: Behavior) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient { provider, behavior, calls: Arc::clone(&calls) };
        let config = ProviderConfig::new(provider).with_api_key("test-key");
        self.router.register_client(config, Arc::new(client));
        self.calls.push((provider, calls));
        self
    }

    fn unconfigured(mut self, provider: Provider) -> Self {
        self.router.register(ProviderConfig::new(provider));
        self
    }

    fn calls(&self, provider: Provider) -> usize {
        self.calls
            .iter()
            .find(|(p, _)| *p == provider)
            .map(|(_, c)| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

fn request_for(provider: Provider) -> RouterRequest {
    RouterRequest::from_prompt("hello there", None).with_selection(Selection::provider(provider))
}

#[tokio::test]
async fn falls_through_to_last_provider() {
    let h = Harness::new(vec![Provider::OpenAI, Provider::Anthropic, Provider::Google])
        .with(Provider::OpenAI, Behavior::ServerError)
        .with(Provider::Anthropic, Behavior::RateLimited)
        .with(Provider::Google, Behavior::Reply("third time lucky"));

    let routed = h.router.route(&request_for(Provider::OpenAI)).await.unwrap();
    assert_eq!(routed.content, "third time lucky");
    assert_eq!(routed.provider, Provider::Google);
    let kinds: Vec<FailureKind> = routed.attempts
        .iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(kinds, vec![FailureKind::HttpStatus, FailureKind::RateLimited]);
}

#[tokio::test]
async fn timeout_and_rate_limit_are_skipped() {
    let h = Harness::new(vec![Provider::OpenAI, Provider::Groq, Provider::Mistral])
        .with(Provider::OpenAI, Behavior::Hang)
        .with(Provider::Groq, Behavior::RateLimited)
        .with(Provider::Mistral, Behavior::Reply("ok"));

    let routed = h.router.route(&request_for(Provider::OpenAI)).await.unwrap();
    assert_eq!(routed.content, "ok");
    let trail: Vec<(Provider, FailureKind)> = routed.attempts
        .iter()
        .map(|a| (a.provider, a.kind))
        .collect();
    assert_eq!(trail, vec![
        (Provider::OpenAI, FailureKind::Timeout),
        (Provider::Groq, FailureKind::RateLimited)
    ]);
}

#[tokio::test]
async fn exhausted_when_every_provider_fails() {
    let h = Harness::new(vec![Provider::OpenAI, Provider::Groq])
        .with(Provider::OpenAI, Behavior::ServerError)
        .with(Provider::Groq, Behavior::Hang);

    match h.router.route(&request_for(Provider::OpenAI)).await {
        Err(RouterError::AllProvidersExhausted(trail)) => {
            assert_eq!(trail.len(), 2);
            assert_eq!(trail[1].kind, FailureKind::Timeout);
        }
        other => panic!("expected AllProvidersExhausted, got {:?}", other.map(|r| r.content)),
    }
}

#[tokio::test]
async fn explicit_provider_without_credential_makes_no_call() {
    let h = Harness::new(vec![Provider::Groq])
        .unconfigured(Provider::OpenAI)
        .with(Provider::Groq, Behavior::Reply("unused"));

    let err = h.router.route(&request_for(Provider::OpenAI)).await.unwrap_err();
    assert!(matches!(err, RouterError::ConfigurationMissing(_)));
    assert!(err.to_string().contains("OPENAI_API_KEY"));
    assert_eq!(h.calls(Provider::Groq), 0);
}

#[tokio::test]
async fn fallback_disabled_tries_primary_only() {
    let h = Harness::new(vec![Provider::Groq])
        .with(Provider::OpenAI, Behavior::RateLimited)
        .with(Provider::Groq, Behavior::Reply("unused"));

    let request = request_for(Provider::OpenAI).with_fallback(false);
    match h.router.route(&request).await {
        Err(RouterError::AllProvidersExhausted(trail)) => assert_eq!(trail.len(), 1),
        other => panic!("unexpected result: {:?}", other.map(|r| r.content)),
    }
    assert_eq!(h.calls(Provider::Groq), 0);
}

#[tokio::test]
async fn unconfigured_fallback_is_recorded_and_skipped() {
    let h = Harness::new(vec![Provider::Anthropic, Provider::Groq])
        .with(Provider::OpenAI, Behavior::ServerError)
        .unconfigured(Provider::Anthropic)
        .with(Provider::Groq, Behavior::Reply("from groq"));

    let routed = h.router.route(&request_for(Provider::OpenAI)).await.unwrap();
    assert_eq!(routed.content, "from groq");
    assert_eq!(routed.attempts[1].provider, Provider::Anthropic);
    assert_eq!(routed.attempts[1].kind, FailureKind::NotConfigured);
}

#[tokio::test]
async fn auto_uses_first_configured_in_task_table() {
    let h = Harness::new(Vec::new())
        .with(Provider::OpenAI, Behavior::Reply("openai"))
        .with(Provider::Groq, Behavior::Reply("groq"));

    let chat = RouterRequest::from_prompt("hi", None);
    assert_eq!(h.router.route(&chat).await.unwrap().provider, Provider::OpenAI);

    let cheap = RouterRequest::from_prompt("hi", None).with_task(TaskType::CostEffective);
    assert_eq!(h.router.route(&cheap).await.unwrap().provider, Provider::Groq);
}

#[tokio::test]
async fn auto_without_any_provider_is_configuration_missing() {
    let h = Harness::new(vec![Provider::OpenAI]).unconfigured(Provider::OpenAI);
    let err = h.router.route(&RouterRequest::from_prompt("hi", None)).await.unwrap_err();
    assert!(matches!(err, RouterError::ConfigurationMissing(_)));
}

#[tokio::test]
async fn empty_prompt_is_invalid() {
    let h = Harness::new(Vec::new()).with(Provider::OpenAI, Behavior::Reply("x"));
    let err = h.router.route(&RouterRequest::from_prompt("   ", None)).await.unwrap_err();
    assert!(matches!(err, RouterError::InvalidRequest(_)));
    assert_eq!(h.calls(Provider::OpenAI), 0);
}

#[tokio::test]
async fn stream_falls_back_before_first_token() {
    let h = Harness::new(vec![Provider::OpenAI, Provider::Groq])
        .with(Provider::OpenAI, Behavior::RateLimited)
        .with(Provider::Groq, Behavior::Reply("hello streaming world"));

    let routed = h.router.route_stream(&request_for(Provider::OpenAI)).await.unwrap();
    assert_eq!(routed.provider, Provider::Groq);
    assert_eq!(routed.attempts.len(), 1);

    let chunks: Vec<String> = routed.stream
        .map(|item| item.unwrap())
        .collect().await;
    assert_eq!(chunks.concat(), "hello streaming world");
}

#[tokio::test]
async fn mid_stream_failure_does_not_switch_provider() {
    let h = Harness::new(vec![Provider::OpenAI, Provider::Groq])
        .with(Provider::OpenAI, Behavior::StreamThenFail(vec!["par", "tial"]))
        .with(Provider::Groq, Behavior::Reply("unused"));

    let routed = h.router.route_stream(&request_for(Provider::OpenAI)).await.unwrap();
    let items: Vec<Result<String, RouterError>> = routed.stream.collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_deref().unwrap(), "par");
    assert_eq!(items[1].as_deref().unwrap(), "tial");
    assert!(
        matches!(&items[2], Err(RouterError::ProviderUnavailable { provider: Provider::OpenAI, .. }))
    );
    assert_eq!(h.calls(Provider::Groq), 0);
}

#[tokio::test]
async fn stalled_stream_ends_with_timeout() {
    let h = Harness::new(vec![Provider::OpenAI, Provider::Groq])
        .with(Provider::OpenAI, Behavior::StallAfterFirst("tok"))
        .with(Provider::Groq, Behavior::Reply("unused"));

    let routed = h.router.route_stream(&request_for(Provider::OpenAI)).await.unwrap();
    let items: Vec<Result<String, RouterError>> = tokio::time
        ::timeout(Duration::from_secs(2), routed.stream.collect())
        .await
        .expect("stream should end once the idle timeout fires");

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "tok");
    assert!(
        matches!(&items[1], Err(RouterError::ProviderUnavailable {
            provider: Provider::OpenAI,
            source: ProviderError::Timeout,
        }))
    );
    assert_eq!(h.calls(Provider::Groq), 0);
}

#[tokio::test]
async fn successful_calls_update_usage() {
    let h = Harness::new(Vec::new()).with(Provider::Groq, Behavior::Reply("twelve chars"));
    h.router.route(&request_for(Provider::Groq)).await.unwrap();
    h.router.route(&request_for(Provider::Groq)).await.unwrap();

    let stats = h.router.usage_stats();
    let groq = stats.get(Provider::Groq.default_model()).unwrap();
    assert_eq!(groq.total_requests, 2);
    assert_eq!(groq.error_count, 0);
    assert!(groq.total_tokens > 0);
}
