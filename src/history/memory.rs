use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ ConversationStore, StoreResult };
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };

/// Process-local store; everything is lost on restart.
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    max_history: usize,
}

impl InMemoryConversationStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }
}

fn trim_front(conversation: &mut Conversation, max_messages: usize) {
    let excess = conversation.messages.len().saturating_sub(max_messages);
    if excess > 0 {
        conversation.messages.drain(..excess);
        debug!("Trimmed {} old message(s) from {}", excess, conversation.id);
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn append(&self, conversation_id: &str, message: ChatMessage) -> StoreResult<usize> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id));

        conversation.updated_at = message.timestamp.max(conversation.updated_at);
        conversation.messages.push(message);
        trim_front(conversation, self.max_history);
        Ok(conversation.messages.len())
    }

    async fn trim(&self, conversation_id: &str, max_messages: usize) -> StoreResult<()> {
        if let Some(conversation) = self.conversations.write().await.get_mut(conversation_id) {
            trim_front(conversation, max_messages);
        }
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<ConversationSummary>> {
        let conversations = self.conversations.read().await;
        let mut summaries: Vec<ConversationSummary> = conversations
            .values()
            .map(Conversation::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn clear(&self, conversation_id: &str) -> StoreResult<bool> {
        Ok(self.conversations.write().await.remove(conversation_id).is_some())
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> StoreResult<bool> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.title = Some(title.trim().to_string());
                conversation.updated_at = chrono::Utc::now().timestamp();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
