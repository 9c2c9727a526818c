use assistant_backend::history::{ ConversationStore, InMemoryConversationStore };
use assistant_backend::models::chat::{ ChatMessage, Role };

fn contents(messages: &[ChatMessage]) -> Vec<&str> {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect()
}

#[tokio::test]
async fn keeps_most_recent_messages() {
    let store = InMemoryConversationStore::new(3);
    for text in ["1", "2", "3", "4"] {
        store.append("c1", ChatMessage::new(Role::User, text)).await.unwrap();
    }

    let conversation = store.get("c1").await.unwrap().unwrap();
    assert_eq!(contents(&conversation.messages), vec!["2", "3", "4"]);
}

#[tokio::test]
async fn trim_drops_oldest_first() {
    let store = InMemoryConversationStore::new(10);
    for text in ["a", "b", "c", "d"] {
        store.append("c1", ChatMessage::new(Role::User, text)).await.unwrap();
    }
    store.trim("c1", 2).await.unwrap();
    store.trim("missing", 2).await.unwrap();

    let conversation = store.get("c1").await.unwrap().unwrap();
    assert_eq!(contents(&conversation.messages), vec!["c", "d"]);
}

#[tokio::test]
async fn conversations_are_independent() {
    let store = InMemoryConversationStore::new(2);
    store.append("a", ChatMessage::new(Role::User, "for a")).await.unwrap();
    for text in ["b1", "b2", "b3"] {
        store.append("b", ChatMessage::new(Role::User, text)).await.unwrap();
    }

    assert_eq!(store.get("a").await.unwrap().unwrap().messages.len(), 1);
    assert_eq!(store.get("b").await.unwrap().unwrap().messages.len(), 2);
    assert!(store.get("c").await.unwrap().is_none());
}

#[tokio::test]
async fn list_title_and_clear() {
    let store = InMemoryConversationStore::new(5);
    store.append("c1", ChatMessage::user("how do I sort a vec?", None)).await.unwrap();
    store.append("c1", ChatMessage::assistant("Use `sort` or `sort_by`.")).await.unwrap();

    assert!(store.set_title("c1", "  Sorting  ").await.unwrap());
    assert!(!store.set_title("nope", "x").await.unwrap());

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].title.as_deref(), Some("Sorting"));
    assert_eq!(summaries[0].message_count, 2);
    assert_eq!(summaries[0].preview, "Use `sort` or `sort_by`.");

    assert!(store.clear("c1").await.unwrap());
    assert!(!store.clear("c1").await.unwrap());
    assert!(store.list().await.unwrap().is_empty());
}
