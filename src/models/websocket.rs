use serde::{ Serialize, Deserialize };
use serde_json::Value;

use super::code::{ CodeAnalysisRequest, CodeAnalysisResponse, CodeCompletion, CodeCompletionRequest };
use super::request::{ ChatRequest, ChatResponse };
use crate::router::AttemptFailure;

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat(ChatRequest),
    #[serde(alias = "code_analysis")] Analysis(CodeAnalysisRequest),
    Completion(CodeCompletionRequest),
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, PartialEq)]
pub enum EnvelopeError {
    InvalidJson,
    UnknownType(String),
    Invalid(String),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::InvalidJson => write!(f, "Invalid JSON format"),
            EnvelopeError::UnknownType(t) => write!(f, "Unknown message type: {}", t),
            EnvelopeError::Invalid(e) => write!(f, "Invalid message: {}", e),
        }
    }
}

const KNOWN_TYPES: [&str; 5] = ["chat", "analysis", "code_analysis", "completion", "ping"];

/// Splits a text frame into its echoed `id` and the typed message.
///
/// The id is returned even when the body fails to parse, so errors can still
/// be correlated by the client.
pub fn parse_envelope(text: &str) -> (Option<String>, Result<ClientMessage, EnvelopeError>) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v @ Value::Object(_)) => v,
        _ => {
            return (None, Err(EnvelopeError::InvalidJson));
        }
    };

    let id = match value.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return (id, Err(EnvelopeError::UnknownType(kind)));
    }

    let parsed = serde_json::from_value::<ClientMessage>(value).map_err(|e| EnvelopeError::Invalid(e.to_string()));
    (id, parsed)
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        status: String,
        connection_id: String,
        message: String,
    },
    ChatStatus {
        id: Option<String>,
        status: String,
        message: String,
    },
    ChatResponse {
        id: Option<String>,
        #[serde(flatten)]
        response: ChatResponse,
    },
    ChatStream {
        id: Option<String>,
        conversation_id: String,
        chunk: String,
        is_complete: bool,
    },
    ChatError {
        id: Option<String>,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        attempts: Vec<AttemptFailure>,
    },
    AnalysisStatus {
        id: Option<String>,
        status: String,
        message: String,
    },
    AnalysisResponse {
        id: Option<String>,
        analysis: CodeAnalysisResponse,
    },
    AnalysisError {
        id: Option<String>,
        message: String,
    },
    CompletionResponse {
        id: Option<String>,
        completions: Vec<CodeCompletion>,
    },
    CompletionError {
        id: Option<String>,
        message: String,
    },
    Pong {
        id: Option<String>,
        timestamp: Option<Value>,
    },
    Error {
        id: Option<String>,
        message: String,
    },
}
