use serde::{ Serialize, Deserialize };
use uuid::Uuid;

use super::request::EditorContext;

const PREVIEW_CHARS: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EditorContext>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
            context: None,
        }
    }

    pub fn user(content: impl Into<String>, context: Option<EditorContext>) -> Self {
        let mut message = Self::new(Role::User, content);
        message.context = context;
        message
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            title: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        let preview = self.messages
            .last()
            .map(|m| {
                if m.content.chars().count() > PREVIEW_CHARS {
                    let cut: String = m.content.chars().take(PREVIEW_CHARS - 3).collect();
                    format!("{}...", cut)
                } else {
                    m.content.clone()
                }
            })
            .unwrap_or_default();

        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            preview,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub message_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
    pub preview: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_preview_is_bounded() {
        let mut conversation = Conversation::new("c1");
        conversation.messages.push(ChatMessage::assistant("x".repeat(200)));
        let summary = conversation.summary();
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.preview.chars().count(), PREVIEW_CHARS);
        assert!(summary.preview.ends_with("..."));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::new(Role::Assistant, "hi")).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        assert!(!json.contains("context"));
    }
}
