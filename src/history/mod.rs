mod memory;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

pub use memory::InMemoryConversationStore;

use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };

pub type StoreResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Conversation storage injected into the request handlers.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<Conversation>>;

    /// Appends `message`, creating the conversation if needed, then trims it.
    /// Returns the number of messages kept.
    async fn append(&self, conversation_id: &str, message: ChatMessage) -> StoreResult<usize>;

    /// Drops the oldest messages until at most `max_messages` remain.
    async fn trim(&self, conversation_id: &str, max_messages: usize) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<ConversationSummary>>;

    /// Returns whether a conversation was removed.
    async fn clear(&self, conversation_id: &str) -> StoreResult<bool>;

    /// Returns whether the conversation exists.
    async fn set_title(&self, conversation_id: &str, title: &str) -> StoreResult<bool>;
}

pub fn initialize_conversation_store(max_history: usize) -> Arc<dyn ConversationStore> {
    info!("Chat history kept in memory, {} messages per conversation", max_history);
    Arc::new(InMemoryConversationStore::new(max_history))
}
