use crate::llm::chat::PromptMessage;
use crate::models::chat::{ ChatMessage, Role };
use crate::models::request::EditorContext;

/// Rough prompt size used for context-window checks: one token per four chars, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

pub fn estimate_prompt_tokens(messages: &[PromptMessage]) -> u32 {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum()
}

pub fn build_system_message(preamble: &str, context: Option<&EditorContext>) -> String {
    let mut parts = vec![preamble.trim().to_string()];

    if let Some(ctx) = context {
        if let Some(file) = ctx.file_name() {
            parts.push(format!("Current file: {}", file));
        }
        if let Some(language) = ctx.language() {
            parts.push(format!("Language: {}", language));
        }
        if let Some(selected) = ctx.selected_text() {
            parts.push(format!("Selected code:\n```\n{}\n```", selected));
        }
        if let Some(workspace) = ctx.workspace_name() {
            parts.push(format!("Workspace: {}", workspace));
        }
        if let Some(project_type) = ctx.project_type() {
            parts.push(format!("Project type: {}", project_type));
        }
    }

    parts.retain(|p| !p.is_empty());
    parts.join("\n\n")
}

/// System message, then the most recent `max_history` turns, then the new user message.
pub fn assemble(
    system: String,
    history: &[ChatMessage],
    max_history: usize,
    user_message: &str
) -> Vec<PromptMessage> {
    let skip = history.len().saturating_sub(max_history);
    let mut messages = Vec::with_capacity(history.len() - skip + 2);

    if !system.is_empty() {
        messages.push(PromptMessage::new(Role::System, system));
    }
    messages.extend(
        history[skip..]
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| PromptMessage::new(m.role, m.content.clone()))
    );
    messages.push(PromptMessage::new(Role::User, user_message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_round_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn system_message_includes_editor_state() {
        let context = EditorContext {
            editor: Some(serde_json::json!({ "fileName": "lib.rs", "language": "rust" })),
            selection: Some(serde_json::json!({ "text": "let a = 1;" })),
            ..Default::default()
        };
        let system = build_system_message("You help.", Some(&context));
        assert!(system.starts_with("You help."));
        assert!(system.contains("Current file: lib.rs"));
        assert!(system.contains("Language: rust"));
        assert!(system.contains("```\nlet a = 1;\n```"));
        assert!(!system.contains("Workspace"));
    }

    #[test]
    fn assemble_keeps_latest_history() {
        let history: Vec<ChatMessage> = (1..=5)
            .map(|i| ChatMessage::new(if i % 2 == 1 { Role::User } else { Role::Assistant }, i.to_string()))
            .collect();
        let messages = assemble("sys".into(), &history, 2, "next");
        let contents: Vec<&str> = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["sys", "4", "5", "next"]);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[3].role, Role::User);
    }
}
