use clap::Parser;
use std::num::NonZeroU32;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Flat KEY=VALUE file loaded into the environment before the remaining options are read.
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<String>,

    // --- Provider credentials ---
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, env = "OPENAI_MODEL")]
    pub openai_model: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    #[arg(long, env = "ANTHROPIC_MODEL")]
    pub anthropic_model: Option<String>,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_BASE_URL")]
    pub google_base_url: Option<String>,

    #[arg(long, env = "GOOGLE_MODEL")]
    pub google_model: Option<String>,

    #[arg(long, env = "XAI_API_KEY", hide_env_values = true)]
    pub xai_api_key: Option<String>,

    #[arg(long, env = "XAI_BASE_URL")]
    pub xai_base_url: Option<String>,

    #[arg(long, env = "XAI_MODEL")]
    pub xai_model: Option<String>,

    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub deepseek_api_key: Option<String>,

    #[arg(long, env = "DEEPSEEK_BASE_URL")]
    pub deepseek_base_url: Option<String>,

    #[arg(long, env = "DEEPSEEK_MODEL")]
    pub deepseek_model: Option<String>,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "GROQ_BASE_URL")]
    pub groq_base_url: Option<String>,

    #[arg(long, env = "GROQ_MODEL")]
    pub groq_model: Option<String>,

    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    pub mistral_api_key: Option<String>,

    #[arg(long, env = "MISTRAL_BASE_URL")]
    pub mistral_base_url: Option<String>,

    #[arg(long, env = "MISTRAL_MODEL")]
    pub mistral_model: Option<String>,

    /// Ollama has no key; setting its URL is what enables it.
    #[arg(long, env = "OLLAMA_BASE_URL")]
    pub ollama_base_url: Option<String>,

    #[arg(long, env = "OLLAMA_MODEL")]
    pub ollama_model: Option<String>,

    // --- Routing ---
    /// Default model selection: auto, a provider, provider/model, or a catalog model id.
    #[arg(long, env = "DEFAULT_MODEL", default_value = "auto")]
    pub default_model: String,

    /// Comma-separated provider order tried after the primary fails.
    #[arg(
        long,
        env = "FALLBACK_ORDER",
        default_value = "openai,anthropic,google,deepseek,groq,mistral,xai,ollama"
    )]
    pub fallback_order: String,

    /// Per-attempt provider timeout in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    #[arg(long, env = "MAX_TOKENS", default_value = "2048")]
    pub max_tokens: u32,

    #[arg(long, env = "TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    // --- Conversations ---
    /// Maximum messages kept per conversation.
    #[arg(long, env = "MAX_HISTORY", default_value = "20")]
    pub max_history: usize,

    #[arg(long, env = "MAX_MESSAGE_LENGTH", default_value = "10000")]
    pub max_message_length: usize,

    /// Optional JSON file overriding the built-in prompt templates.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- Server ---
    /// Host address and port for the WebSocket server.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API (same host as SERVER_ADDR).
    #[arg(long, env = "HTTP_PORT", default_value = "4001")]
    pub http_port: u16,

    /// Shared secret for signed requests. When unset, auth is disabled.
    #[arg(long, env = "SERVER_API_KEY", hide_env_values = true)]
    pub server_api_key: Option<String>,

    /// Comma-separated allowed CORS origins, or `*`.
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// New WebSocket connections accepted per second.
    #[arg(long, env = "WS_CONNECTIONS_PER_SECOND", default_value = "10")]
    pub ws_connections_per_second: NonZeroU32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
